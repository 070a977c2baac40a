//! Pure equity math. Never suspends.

use crossvault_core::events::VenueId;
use crossvault_core::fixed::{Money, SignedMoney};
use crossvault_positions::Position;
use std::collections::BTreeMap;

/// Target equity for one venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenueEquity {
    pub venue: VenueId,
    pub equity: Money,
    /// The venue hosts a stale-priced position; no update should be pushed.
    pub skipped_stale: bool,
}

/// Result of one per-user computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserComputation {
    /// Per-venue equities, venue-sorted for deterministic emission.
    pub equities: Vec<VenueEquity>,
    /// Sum of initial margins across every venue.
    pub margin_in_use: Money,
    /// Margin in use exceeds collateral: freeze new orders everywhere.
    pub overspent: bool,
    /// Margin exceeded `(1 + α) · collateral`: equities were scaled down
    /// proportionally to force venue-local reduction.
    pub scaled: bool,
}

/// Computes per-venue equities for one user under the haircut rule:
///
/// ```text
/// venueEquity(v) = collateral + ownPnL(v)
///                + haircut · max(0, crossPnL(v))
///                + min(0, crossPnL(v))
/// ```
///
/// Positive cross-venue PnL is credited at the haircut rate; negative cross
/// PnL is applied in full. Stale positions contribute nothing to other
/// venues, and a venue hosting one keeps its local view (no update).
#[must_use]
pub fn compute_user(
    collateral: Money,
    positions: &[Position],
    haircut_bps: u64,
    alpha_bps: u64,
) -> UserComputation {
    // Venue -> (own pnl over marked positions, hosts a stale position).
    let mut venues: BTreeMap<VenueId, (SignedMoney, bool)> = BTreeMap::new();
    let mut total_marked = SignedMoney::ZERO;
    let mut margin_in_use = Money::ZERO;

    for position in positions {
        let entry = venues
            .entry(position.venue.clone())
            .or_insert((SignedMoney::ZERO, false));
        margin_in_use = margin_in_use
            .checked_add(position.initial_margin)
            .unwrap_or(Money::from_units(u64::MAX));
        match position.unrealized_pnl {
            Some(pnl) => {
                entry.0 = entry.0.checked_add(pnl).unwrap_or(entry.0);
                total_marked = total_marked.checked_add(pnl).unwrap_or(total_marked);
            }
            None => entry.1 = true,
        }
    }

    let overspent = margin_in_use > collateral;
    let severe_threshold = collateral
        .mul_bps(10_000 + alpha_bps)
        .unwrap_or(Money::from_units(u64::MAX));
    let scaled = margin_in_use > severe_threshold && !margin_in_use.is_zero();

    let equities = venues
        .into_iter()
        .map(|(venue, (own, hosts_stale))| {
            let cross = total_marked
                .checked_add(-own)
                .unwrap_or(SignedMoney::ZERO);
            let credited = own
                .checked_add(cross.positive_part().mul_bps(haircut_bps))
                .and_then(|acc| acc.checked_add(cross.negative_part()))
                .and_then(|acc| acc.checked_add(SignedMoney::from(collateral)))
                .unwrap_or(SignedMoney::ZERO);
            // A venue balance cannot go negative; the floor is zero.
            let mut equity = if credited.is_negative() {
                Money::ZERO
            } else {
                credited.abs_money().unwrap_or(Money::from_units(u64::MAX))
            };
            if scaled {
                equity = scale_proportionally(equity, collateral, margin_in_use);
            }
            VenueEquity {
                venue,
                equity,
                skipped_stale: hosts_stale,
            }
        })
        .collect();

    UserComputation {
        equities,
        margin_in_use,
        overspent,
        scaled,
    }
}

/// `equity · collateral / margin_in_use`, truncating.
fn scale_proportionally(equity: Money, collateral: Money, margin_in_use: Money) -> Money {
    if margin_in_use.is_zero() {
        return equity;
    }
    let scaled =
        u128::from(equity.units()) * u128::from(collateral.units()) / u128::from(margin_in_use.units());
    Money::from_units(u64::try_from(scaled).unwrap_or(u64::MAX))
}
