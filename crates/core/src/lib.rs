//! Shared foundation for the crossvault engine.
//!
//! Fixed-point money arithmetic, keccak reference-id construction, the
//! engine-wide logical clock, the bounded event bus, and the configuration
//! surface. Everything here is pure or purely in-memory; no I/O.

pub mod bus;
pub mod clock;
pub mod config;
pub mod events;
pub mod fixed;
pub mod keys;

pub use bus::EventBus;
pub use clock::{Clock, SharedClock, SimClock, SystemClock};
pub use config::{EngineConfig, OracleDefaults, RetryConfig};
pub use events::{
    PositionClose, PositionEvent, PositionState, ShortfallClaim, Side, UpdateIntent, VenueId,
    VenueUpdate,
};
pub use fixed::{FixedPointError, Money, Price, SignedMoney};
pub use keys::{RefId, UserKey};
