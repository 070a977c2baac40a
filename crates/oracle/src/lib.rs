//! Price validation for the crossvault engine.
//!
//! Feeds deliver raw samples in feed-native scales; the oracle normalizes
//! them to 10^8, applies staleness and deviation-band checks, and falls back
//! to the last good price inside a bounded age. Reference prices move only
//! through the explicit operator refresh.

pub mod feed;
pub mod oracle;
pub mod rpc;

pub use feed::{FeedError, FeedScale, MockFeed, PriceFetcher, RawSample};
pub use oracle::{OracleError, PriceOracle, SymbolConfig, ValidatedPrice};
pub use rpc::{AggregatorRpcFeed, ExpoRestFeed};
