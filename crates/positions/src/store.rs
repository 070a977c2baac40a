//! The position store.

use crossvault_core::events::{PositionClose, PositionState, Side, VenueId};
use crossvault_core::fixed::{position_pnl, Money, Price, SignedMoney};
use crossvault_core::keys::{position_close_ref_id, RefId, UserKey};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use tracing::{debug, warn};

const SHARDS: usize = 16;

/// Identity of one position slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub user: UserKey,
    pub venue: VenueId,
    pub instrument: String,
}

/// One open position plus its latest mark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub user: UserKey,
    pub venue: VenueId,
    pub instrument: String,
    pub position_id: String,
    pub side: Side,
    pub size: Money,
    pub entry_price: Price,
    pub initial_margin: Money,
    /// Last validated mark; `None` until the first mark-to-market pass.
    pub mark_price: Option<Price>,
    pub unrealized_pnl: Option<SignedMoney>,
}

impl Position {
    #[must_use]
    pub fn key(&self) -> PositionKey {
        PositionKey {
            user: self.user,
            venue: self.venue.clone(),
            instrument: self.instrument.clone(),
        }
    }

    /// Revalues at `mark`; an overflowing product leaves the position
    /// unmarked (and therefore stale).
    pub fn mark(&mut self, mark: Price) {
        match position_pnl(self.entry_price, mark, self.size, self.side.is_long()) {
            Ok(pnl) => {
                self.mark_price = Some(mark);
                self.unrealized_pnl = Some(pnl);
            }
            Err(e) => {
                warn!(instrument = %self.instrument, error = %e, "mark-to-market overflow");
                self.mark_price = None;
                self.unrealized_pnl = None;
            }
        }
    }

    /// A position with no validated mark is excluded from cross-venue
    /// equity updates.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.unrealized_pnl.is_none()
    }
}

impl From<PositionState> for Position {
    fn from(state: PositionState) -> Self {
        Self {
            user: state.user,
            venue: state.venue,
            instrument: state.instrument,
            position_id: state.position_id,
            side: state.side,
            size: state.size,
            entry_price: state.entry_price,
            initial_margin: state.initial_margin,
            mark_price: None,
            unrealized_pnl: None,
        }
    }
}

/// A close removed from the store, ready for settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub close: PositionClose,
    /// `keccak(venue ‖ position_id)`: the settlement dedup id.
    pub ref_id: RefId,
}

/// Sharded position map. One writer at a time per shard, unlimited readers
/// across shards; all of a user's positions share a shard.
pub struct PositionStore {
    shards: Vec<RwLock<HashMap<PositionKey, Position>>>,
}

impl Default for PositionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard_for(&self, user: UserKey) -> &RwLock<HashMap<PositionKey, Position>> {
        let mut hasher = DefaultHasher::new();
        user.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        &self.shards[index]
    }

    /// Replaces every position the user holds on `venue` with the snapshot.
    /// Marks from a previous pass are retained for unchanged entries.
    pub fn apply_snapshot(&self, user: UserKey, venue: &VenueId, positions: Vec<PositionState>) {
        let mut shard = self.shard_for(user).write();
        shard.retain(|key, _| !(key.user == user && key.venue == *venue));
        for state in positions {
            let position = Position::from(state);
            shard.insert(position.key(), position);
        }
    }

    /// Upserts one position, preserving arrival order per key under the
    /// shard's write guard.
    pub fn apply_update(&self, state: PositionState) {
        let position = Position::from(state);
        let mut shard = self.shard_for(position.user).write();
        shard.insert(position.key(), position);
    }

    /// Removes the closed position and returns the realized-PnL signal. An
    /// unknown key still produces the signal: the close may race a snapshot,
    /// and settlement dedup makes redelivery harmless.
    pub fn apply_close(&self, close: PositionClose) -> ClosedPosition {
        let key = PositionKey {
            user: close.user,
            venue: close.venue.clone(),
            instrument: close.instrument.clone(),
        };
        let removed = self.shard_for(close.user).write().remove(&key);
        if removed.is_none() {
            debug!(
                venue = %close.venue,
                instrument = %close.instrument,
                "close for untracked position"
            );
        }
        let ref_id = position_close_ref_id(close.venue.as_str(), &close.position_id);
        ClosedPosition { close, ref_id }
    }

    /// Revalues every position on `instrument` at `mark`.
    pub fn mark_instrument(&self, instrument: &str, mark: Price) {
        for shard in &self.shards {
            let mut shard = shard.write();
            for position in shard.values_mut() {
                if position.instrument == instrument {
                    position.mark(mark);
                }
            }
        }
    }

    /// Consistent point-in-time view of one user's positions.
    #[must_use]
    pub fn iter_user(&self, user: UserKey) -> Vec<Position> {
        self.shard_for(user)
            .read()
            .values()
            .filter(|p| p.user == user)
            .cloned()
            .collect()
    }

    /// All positions, shard by shard.
    #[must_use]
    pub fn iter_all(&self) -> Vec<Position> {
        self.shards
            .iter()
            .flat_map(|shard| shard.read().values().cloned().collect::<Vec<_>>())
            .collect()
    }

    #[must_use]
    pub fn get(&self, key: &PositionKey) -> Option<Position> {
        self.shard_for(key.user).read().get(key).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Users currently holding at least one position.
    #[must_use]
    pub fn users(&self) -> Vec<UserKey> {
        let mut users: Vec<UserKey> = self
            .shards
            .iter()
            .flat_map(|shard| shard.read().keys().map(|k| k.user).collect::<Vec<_>>())
            .collect();
        users.sort_unstable();
        users.dedup();
        users
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(tag: u8) -> UserKey {
        UserKey::from_tag(tag)
    }

    fn state(u: UserKey, venue: &str, instrument: &str, entry_whole: u64) -> PositionState {
        PositionState {
            user: u,
            venue: VenueId::new(venue),
            instrument: instrument.to_string(),
            position_id: format!("{venue}-{instrument}"),
            side: Side::Long,
            size: Money::from_whole(1).unwrap(),
            entry_price: Price::from_whole(entry_whole).unwrap(),
            initial_margin: Money::from_whole(100).unwrap(),
        }
    }

    // ==================== Merge Tests ====================

    #[test]
    fn test_update_then_snapshot_replaces_venue_positions() {
        let store = PositionStore::new();
        let u = user(1);
        store.apply_update(state(u, "kraken", "BTC-PERP", 100));
        store.apply_update(state(u, "kraken", "ETH-PERP", 10));
        store.apply_update(state(u, "bybit", "BTC-PERP", 100));
        assert_eq!(store.len(), 3);

        // Snapshot for kraken drops its stale entries only.
        store.apply_snapshot(
            u,
            &VenueId::new("kraken"),
            vec![state(u, "kraken", "SOL-PERP", 20)],
        );
        assert_eq!(store.len(), 2);
        let instruments: Vec<String> = store
            .iter_user(u)
            .into_iter()
            .map(|p| format!("{}:{}", p.venue, p.instrument))
            .collect();
        assert!(instruments.contains(&"kraken:SOL-PERP".to_string()));
        assert!(instruments.contains(&"bybit:BTC-PERP".to_string()));
    }

    #[test]
    fn test_update_overwrites_same_key() {
        let store = PositionStore::new();
        let u = user(1);
        store.apply_update(state(u, "kraken", "BTC-PERP", 100));
        store.apply_update(state(u, "kraken", "BTC-PERP", 105));
        assert_eq!(store.len(), 1);
        let positions = store.iter_user(u);
        assert_eq!(positions[0].entry_price, Price::from_whole(105).unwrap());
    }

    #[test]
    fn test_close_removes_and_builds_ref_id() {
        let store = PositionStore::new();
        let u = user(1);
        store.apply_update(state(u, "kraken", "BTC-PERP", 100));

        let close = PositionClose {
            user: u,
            venue: VenueId::new("kraken"),
            instrument: "BTC-PERP".to_string(),
            position_id: "kraken-BTC-PERP".to_string(),
            side: Side::Long,
            size: Money::from_whole(1).unwrap(),
            entry_price: Price::from_whole(100).unwrap(),
            exit_price: Price::from_whole(110).unwrap(),
            closed_at: 42,
        };
        let closed = store.apply_close(close);
        assert!(store.is_empty());
        assert_eq!(
            closed.ref_id,
            position_close_ref_id("kraken", "kraken-BTC-PERP")
        );
    }

    #[test]
    fn test_close_for_unknown_position_still_signals() {
        let store = PositionStore::new();
        let close = PositionClose {
            user: user(9),
            venue: VenueId::new("kraken"),
            instrument: "BTC-PERP".to_string(),
            position_id: "p".to_string(),
            side: Side::Short,
            size: Money::from_whole(1).unwrap(),
            entry_price: Price::from_whole(100).unwrap(),
            exit_price: Price::from_whole(90).unwrap(),
            closed_at: 1,
        };
        let closed = store.apply_close(close);
        assert_eq!(closed.ref_id, position_close_ref_id("kraken", "p"));
    }

    // ==================== Mark Tests ====================

    #[test]
    fn test_mark_instrument_updates_unrealized() {
        let store = PositionStore::new();
        let a = user(1);
        let b = user(2);
        store.apply_update(state(a, "kraken", "BTC-PERP", 100));
        store.apply_update(state(b, "bybit", "BTC-PERP", 120));
        store.apply_update(state(a, "kraken", "ETH-PERP", 10));

        store.mark_instrument("BTC-PERP", Price::from_whole(110).unwrap());

        let a_positions = store.iter_user(a);
        let btc = a_positions
            .iter()
            .find(|p| p.instrument == "BTC-PERP")
            .unwrap();
        assert_eq!(
            btc.unrealized_pnl,
            Some(SignedMoney::from_units(10_000_000))
        );
        // ETH untouched and stale.
        let eth = a_positions
            .iter()
            .find(|p| p.instrument == "ETH-PERP")
            .unwrap();
        assert!(eth.is_stale());

        let b_positions = store.iter_user(b);
        assert_eq!(
            b_positions[0].unrealized_pnl,
            Some(SignedMoney::from_units(-10_000_000))
        );
    }

    #[test]
    fn test_users_lists_holders() {
        let store = PositionStore::new();
        store.apply_update(state(user(1), "kraken", "BTC-PERP", 100));
        store.apply_update(state(user(2), "kraken", "BTC-PERP", 100));
        store.apply_update(state(user(1), "bybit", "ETH-PERP", 10));
        let users = store.users();
        assert_eq!(users.len(), 2);
    }
}
