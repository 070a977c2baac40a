//! The authoritative money ledger.
//!
//! The only component permitted to mutate balances. All state lives inside a
//! single-owner actor task; callers hold clonable handles and every primitive
//! serializes through the actor's inbox, which yields a total order over
//! money-moving operations without locks at call sites.

pub mod actor;
pub mod commands;
pub mod error;
pub mod events;
pub mod handle;
pub mod hours;
pub mod state;
pub mod token;

pub use actor::{spawn, LedgerActor};
pub use commands::{LedgerCommand, ParamUpdate};
pub use error::LedgerError;
pub use events::{LedgerEvent, PauseReason};
pub use handle::{AdminHandle, LedgerHandle};
pub use hours::TradingHoursGuard;
pub use state::{
    BatchOutcome, LeafSign, LedgerParams, LedgerState, LedgerStatus, NetLeaf, Obligation,
    PoolsView, SeizeOutcome, UserBalances,
};
pub use token::{InMemoryToken, StableToken, TokenError};
