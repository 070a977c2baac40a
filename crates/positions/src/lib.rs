//! Current position snapshot per `(user, venue, instrument)`.
//!
//! Venue adapters publish snapshot and delta events; the store merges them
//! into a consistent map. Sharding is by user, so a user's positions always
//! live under one guard and `iter_user` returns a consistent point-in-time
//! view.

pub mod store;

pub use store::{ClosedPosition, Position, PositionKey, PositionStore};
