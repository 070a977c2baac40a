//! Engine-wide event types exchanged between components.

use crate::fixed::{Money, Price};
use crate::keys::{RefId, UserKey};
use serde::{Deserialize, Serialize};

/// Identifies an external trading venue.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VenueId(pub String);

impl VenueId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VenueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    #[must_use]
    pub const fn is_long(self) -> bool {
        matches!(self, Self::Long)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A venue-reported open position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionState {
    pub user: UserKey,
    pub venue: VenueId,
    pub instrument: String,
    pub position_id: String,
    pub side: Side,
    /// Contract size in 10^6 units of the underlying.
    pub size: Money,
    pub entry_price: Price,
    /// Venue-reported initial margin locked against this position.
    pub initial_margin: Money,
}

/// A venue-reported position close carrying realized-PnL inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionClose {
    pub user: UserKey,
    pub venue: VenueId,
    pub instrument: String,
    pub position_id: String,
    pub side: Side,
    pub size: Money,
    pub entry_price: Price,
    pub exit_price: Price,
    /// Engine time of the close, seconds.
    pub closed_at: u64,
}

/// Stream items published by a venue adapter's position stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PositionEvent {
    /// Full replacement of a user's positions on the reporting venue.
    Snapshot {
        user: UserKey,
        venue: VenueId,
        positions: Vec<PositionState>,
    },
    /// Upsert of a single position.
    Update(PositionState),
    /// Position removed; realized PnL must be settled.
    Close(PositionClose),
}

/// Target equity pushed to a venue for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueUpdate {
    pub user: UserKey,
    pub venue: VenueId,
    pub equity: Money,
    /// Strictly increasing per `(user, venue)`; adapters apply only newer
    /// sequences.
    pub sequence: u64,
}

/// Intents emitted by the equity engine toward venue adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UpdateIntent {
    Equity(VenueUpdate),
    /// Overspend response: the venue must stop accepting new orders.
    Freeze { user: UserKey, venue: VenueId },
}

/// A venue's claim for the unrecovered part of a liquidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortfallClaim {
    pub venue: VenueId,
    pub claim_id: String,
    pub user: UserKey,
    pub amount: Money,
}

impl ShortfallClaim {
    /// The dedup id every claim settles under.
    #[must_use]
    pub fn ref_id(&self) -> RefId {
        crate::keys::shortfall_ref_id(self.venue.as_str(), &self.claim_id)
    }
}
