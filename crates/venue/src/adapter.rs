//! The adapter trait every venue integration implements.

use async_trait::async_trait;
use crossvault_core::events::{PositionEvent, ShortfallClaim, VenueId, VenueUpdate};
use crossvault_core::fixed::{Money, Price};
use crossvault_core::keys::UserKey;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// A venue-quoted top-of-book update. Venues quote decimal strings; the
/// conversion into engine price units happens at this boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    /// Venue timestamp, unix seconds.
    pub timestamp: u64,
    pub venue: VenueId,
}

impl PriceUpdate {
    /// Mid price in 10^8 units, or `None` for crossed/unrepresentable books.
    #[must_use]
    pub fn mid_price(&self) -> Option<Price> {
        let mid = (self.bid + self.ask) / Decimal::from(2);
        if mid <= Decimal::ZERO {
            return None;
        }
        (mid * Decimal::from(100_000_000u64))
            .trunc()
            .to_u64()
            .map(Price::from_units)
    }
}

/// Venue I/O failures, split by retry semantics.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VenueError {
    /// Worth retrying: timeouts, disconnects, throttling.
    #[error("transient venue failure: {0}")]
    Transient(String),

    /// Not worth retrying: authentication, unknown user, protocol breakage.
    #[error("fatal venue failure: {0}")]
    Fatal(String),
}

impl VenueError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Contract between the engine core and a venue integration.
///
/// Event streams are taken once by the orchestrator; outbound calls carry
/// deadlines at the call site (`tokio::time::timeout`), not here.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn venue_id(&self) -> &VenueId;

    /// Establishes the venue session for the given symbols. Transient
    /// failures are retried by [`crate::connect_with_backoff`].
    async fn connect(&self, symbols: &[String]) -> Result<(), VenueError>;

    /// The top-of-book quote stream. Returns `None` after the first take.
    fn take_price_stream(&self) -> Option<mpsc::Receiver<PriceUpdate>>;

    /// The position snapshot/delta/close stream. Returns `None` after the
    /// first take.
    fn take_position_stream(&self) -> Option<mpsc::Receiver<PositionEvent>>;

    /// The liquidation shortfall claim stream. Returns `None` after the
    /// first take.
    fn take_claim_stream(&self) -> Option<mpsc::Receiver<ShortfallClaim>>;

    /// Pushes a target equity. The adapter applies the update only when
    /// `update.sequence` exceeds the last applied sequence and returns the
    /// sequence now in effect.
    async fn set_user_balance(&self, update: &VenueUpdate) -> Result<u64, VenueError>;

    /// Overspend response: stop accepting new orders for the user.
    async fn freeze_new_orders(&self, user: UserKey) -> Result<(), VenueError>;

    /// Forwards recovered funds for a shortfall claim.
    async fn settle_claim(&self, claim_id: &str, amount: Money) -> Result<(), VenueError>;
}
