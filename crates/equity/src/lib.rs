//! Per-venue equity computation and update emission.
//!
//! Reads the position store and user collateral, applies the asymmetric
//! haircut formula, detects overspend, and emits sequenced venue updates.
//! Triggers are debounced per user so a burst of events produces one
//! computation.

pub mod compute;
pub mod engine;

pub use compute::{compute_user, UserComputation, VenueEquity};
pub use engine::{
    spawn, EngineClosed, EngineParams, EquityCommand, EquityEngine, EquityHandle, TriggerReason,
};
