//! In-memory venue for tests and the demo runner.

use crate::adapter::{PriceUpdate, VenueAdapter, VenueError};
use async_trait::async_trait;
use crossvault_core::events::{PositionEvent, ShortfallClaim, VenueId, VenueUpdate};
use crossvault_core::fixed::Money;
use crossvault_core::keys::UserKey;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// Applied balance state per user on the simulated venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedBalance {
    pub equity: Money,
    pub sequence: u64,
}

/// A scriptable venue: tests feed position events and claims in, and observe
/// balance updates, freezes, and claim settlements coming out.
pub struct SimVenue {
    id: VenueId,
    connected: AtomicBool,
    /// Remaining transient connect failures to inject.
    connect_failures: AtomicU32,
    /// Remaining transient `set_user_balance` failures to inject.
    balance_failures: AtomicU32,
    /// Remaining transient `settle_claim` failures to inject.
    claim_failures: AtomicU32,
    price_tx: mpsc::Sender<PriceUpdate>,
    price_rx: Mutex<Option<mpsc::Receiver<PriceUpdate>>>,
    position_tx: mpsc::Sender<PositionEvent>,
    position_rx: Mutex<Option<mpsc::Receiver<PositionEvent>>>,
    claim_tx: mpsc::Sender<ShortfallClaim>,
    claim_rx: Mutex<Option<mpsc::Receiver<ShortfallClaim>>>,
    balances: RwLock<HashMap<UserKey, AppliedBalance>>,
    frozen: RwLock<HashSet<UserKey>>,
    claim_settlements: RwLock<Vec<(String, Money)>>,
}

impl SimVenue {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let (price_tx, price_rx) = mpsc::channel(256);
        let (position_tx, position_rx) = mpsc::channel(256);
        let (claim_tx, claim_rx) = mpsc::channel(64);
        Self {
            id: VenueId::new(id),
            price_tx,
            price_rx: Mutex::new(Some(price_rx)),
            connected: AtomicBool::new(false),
            connect_failures: AtomicU32::new(0),
            balance_failures: AtomicU32::new(0),
            claim_failures: AtomicU32::new(0),
            position_tx,
            position_rx: Mutex::new(Some(position_rx)),
            claim_tx,
            claim_rx: Mutex::new(Some(claim_rx)),
            balances: RwLock::new(HashMap::new()),
            frozen: RwLock::new(HashSet::new()),
            claim_settlements: RwLock::new(Vec::new()),
        }
    }

    /// Makes the next `n` connect attempts fail transiently.
    pub fn fail_next_connects(&self, n: u32) {
        self.connect_failures.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` balance pushes fail transiently.
    pub fn fail_next_balance_updates(&self, n: u32) {
        self.balance_failures.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` claim settlements fail transiently.
    pub fn fail_next_claim_settlements(&self, n: u32) {
        self.claim_failures.store(n, Ordering::SeqCst);
    }

    /// Feeds a top-of-book quote into the price stream.
    ///
    /// # Panics
    /// Panics if the stream consumer has gone away (test wiring error).
    pub async fn publish_price(&self, update: PriceUpdate) {
        self.price_tx
            .send(update)
            .await
            .expect("price stream consumer gone");
    }

    /// Feeds a position event into the stream the orchestrator consumes.
    ///
    /// # Panics
    /// Panics if the stream consumer has gone away (test wiring error).
    pub async fn publish_position_event(&self, event: PositionEvent) {
        self.position_tx
            .send(event)
            .await
            .expect("position stream consumer gone");
    }

    /// Feeds a shortfall claim into the claim stream.
    ///
    /// # Panics
    /// Panics if the stream consumer has gone away (test wiring error).
    pub async fn publish_claim(&self, claim: ShortfallClaim) {
        self.claim_tx
            .send(claim)
            .await
            .expect("claim stream consumer gone");
    }

    #[must_use]
    pub fn applied_balance(&self, user: UserKey) -> Option<AppliedBalance> {
        self.balances.read().get(&user).copied()
    }

    #[must_use]
    pub fn is_frozen(&self, user: UserKey) -> bool {
        self.frozen.read().contains(&user)
    }

    #[must_use]
    pub fn claim_settlements(&self) -> Vec<(String, Money)> {
        self.claim_settlements.read().clone()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn take_injected_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl VenueAdapter for SimVenue {
    fn venue_id(&self) -> &VenueId {
        &self.id
    }

    async fn connect(&self, _symbols: &[String]) -> Result<(), VenueError> {
        if Self::take_injected_failure(&self.connect_failures) {
            return Err(VenueError::Transient("simulated connect failure".into()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn take_price_stream(&self) -> Option<mpsc::Receiver<PriceUpdate>> {
        self.price_rx.lock().take()
    }

    fn take_position_stream(&self) -> Option<mpsc::Receiver<PositionEvent>> {
        self.position_rx.lock().take()
    }

    fn take_claim_stream(&self) -> Option<mpsc::Receiver<ShortfallClaim>> {
        self.claim_rx.lock().take()
    }

    async fn set_user_balance(&self, update: &VenueUpdate) -> Result<u64, VenueError> {
        if Self::take_injected_failure(&self.balance_failures) {
            return Err(VenueError::Transient("simulated balance failure".into()));
        }
        let mut balances = self.balances.write();
        let current = balances.get(&update.user).copied();
        match current {
            Some(applied) if update.sequence <= applied.sequence => {
                debug!(
                    venue = %self.id,
                    sequence = update.sequence,
                    last_applied = applied.sequence,
                    "ignoring stale balance update"
                );
                Ok(applied.sequence)
            }
            _ => {
                balances.insert(
                    update.user,
                    AppliedBalance {
                        equity: update.equity,
                        sequence: update.sequence,
                    },
                );
                Ok(update.sequence)
            }
        }
    }

    async fn freeze_new_orders(&self, user: UserKey) -> Result<(), VenueError> {
        self.frozen.write().insert(user);
        Ok(())
    }

    async fn settle_claim(&self, claim_id: &str, amount: Money) -> Result<(), VenueError> {
        if Self::take_injected_failure(&self.claim_failures) {
            return Err(VenueError::Transient("simulated claim failure".into()));
        }
        self.claim_settlements
            .write()
            .push((claim_id.to_string(), amount));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::{connect_with_backoff, Backoff};
    use std::time::Duration;

    fn update(user: UserKey, equity: u64, sequence: u64) -> VenueUpdate {
        VenueUpdate {
            user,
            venue: VenueId::new("sim"),
            equity: Money::from_units(equity),
            sequence,
        }
    }

    #[tokio::test]
    async fn test_balance_applies_only_newer_sequences() {
        let venue = SimVenue::new("sim");
        let user = UserKey::from_tag(1);

        assert_eq!(venue.set_user_balance(&update(user, 100, 1)).await, Ok(1));
        assert_eq!(venue.set_user_balance(&update(user, 300, 3)).await, Ok(3));
        // An out-of-order update is ignored but acked with the live sequence.
        assert_eq!(venue.set_user_balance(&update(user, 200, 2)).await, Ok(3));

        let applied = venue.applied_balance(user).unwrap();
        assert_eq!(applied.equity, Money::from_units(300));
        assert_eq!(applied.sequence, 3);
    }

    #[tokio::test]
    async fn test_connect_retries_through_injected_failures() {
        let venue = SimVenue::new("sim");
        venue.fail_next_connects(2);
        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(2), 5);
        connect_with_backoff(&venue, &[], backoff).await.unwrap();
        assert!(venue.is_connected());
    }

    #[tokio::test]
    async fn test_connect_budget_exhaustion_surfaces_error() {
        let venue = SimVenue::new("sim");
        venue.fail_next_connects(10);
        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(2), 2);
        let err = connect_with_backoff(&venue, &[], backoff).await.unwrap_err();
        assert!(err.is_transient());
        assert!(!venue.is_connected());
    }

    #[tokio::test]
    async fn test_streams_taken_once() {
        let venue = SimVenue::new("sim");
        assert!(venue.take_price_stream().is_some());
        assert!(venue.take_price_stream().is_none());
        assert!(venue.take_position_stream().is_some());
        assert!(venue.take_position_stream().is_none());
        assert!(venue.take_claim_stream().is_some());
        assert!(venue.take_claim_stream().is_none());
    }

    #[tokio::test]
    async fn test_freeze_and_claim_settlement_recorded() {
        let venue = SimVenue::new("sim");
        let user = UserKey::from_tag(2);
        venue.freeze_new_orders(user).await.unwrap();
        assert!(venue.is_frozen(user));

        venue
            .settle_claim("claim-1", Money::from_units(500))
            .await
            .unwrap();
        assert_eq!(
            venue.claim_settlements(),
            vec![("claim-1".to_string(), Money::from_units(500))]
        );
    }
}
