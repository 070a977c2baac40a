//! Venue adapter contract and plumbing.
//!
//! The engine consumes venues through [`VenueAdapter`]; transports (REST,
//! WebSocket) live behind concrete implementations. The crate ships the
//! reconnect/backoff policy and `SimVenue`, the in-memory adapter used by
//! tests and the demo runner.

pub mod adapter;
pub mod backoff;
pub mod sim;

pub use adapter::{PriceUpdate, VenueAdapter, VenueError};
pub use backoff::{connect_with_backoff, Backoff};
pub use sim::SimVenue;
