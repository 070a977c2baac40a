//! The settlement coordinator.
//!
//! Consumes position closes and venue shortfall claims, selects the correct
//! ledger primitive, and retries transient failures with exponential backoff.
//! `DuplicateRefId` is proof of prior success and is dropped silently; a job
//! that exhausts its retry budget or fails validation is parked on the
//! operator queue and never retried automatically.

use crossvault_core::config::RetryConfig;
use crossvault_core::events::{ShortfallClaim, VenueId};
use crossvault_core::fixed::{position_pnl, Money};
use crossvault_ledger::{LedgerError, LedgerHandle};
use crossvault_positions::ClosedPosition;
use crossvault_venue::{VenueAdapter, VenueError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Deadline on outbound venue calls.
const VENUE_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// One unit of settlement work.
#[derive(Debug, Clone)]
pub enum SettlementJob {
    PositionClosed(ClosedPosition),
    VenueShortfall(ShortfallClaim),
    /// Forward recovered funds to the venue after a shortfall seizure. Split
    /// from the seizure so the ledger is never retried speculatively.
    ForwardClaim {
        venue: VenueId,
        claim_id: String,
        amount: Money,
    },
}

/// A job the coordinator gave up on; surfaced to the operator.
#[derive(Debug, Clone)]
pub struct OperatorAlert {
    pub job: SettlementJob,
    pub attempts: u32,
    pub error: String,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("settlement coordinator has shut down")]
pub struct CoordinatorClosed;

/// Clonable entry point for settlement work.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Envelope>,
    inflight: Arc<AtomicUsize>,
}

impl CoordinatorHandle {
    /// Settlement jobs submitted but not yet fully processed. The
    /// orchestrator's backpressure watermarks read this gauge.
    #[must_use]
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::SeqCst)
    }

    /// # Errors
    /// Fails if the coordinator task has shut down.
    pub async fn on_position_closed(&self, closed: ClosedPosition) -> Result<(), CoordinatorClosed> {
        self.submit(SettlementJob::PositionClosed(closed)).await
    }

    /// # Errors
    /// Fails if the coordinator task has shut down.
    pub async fn on_venue_shortfall(&self, claim: ShortfallClaim) -> Result<(), CoordinatorClosed> {
        self.submit(SettlementJob::VenueShortfall(claim)).await
    }

    async fn submit(&self, job: SettlementJob) -> Result<(), CoordinatorClosed> {
        self.inflight.fetch_add(1, Ordering::SeqCst);
        let sent = self.tx.send(Envelope { job, attempt: 0 }).await;
        if sent.is_err() {
            self.inflight.fetch_sub(1, Ordering::SeqCst);
            return Err(CoordinatorClosed);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Envelope {
    job: SettlementJob,
    attempt: u32,
}

/// Spawns the coordinator; alerts arrive on the returned receiver.
#[must_use]
pub fn spawn(
    ledger: LedgerHandle,
    venues: HashMap<VenueId, Arc<dyn VenueAdapter>>,
    retry: RetryConfig,
    capacity: usize,
) -> (
    CoordinatorHandle,
    mpsc::Receiver<OperatorAlert>,
    JoinHandle<()>,
) {
    let (tx, rx) = mpsc::channel(capacity);
    let (operator_tx, operator_rx) = mpsc::channel(capacity);
    let inflight = Arc::new(AtomicUsize::new(0));
    let coordinator = SettlementCoordinator {
        ledger,
        venues,
        retry,
        rx,
        self_tx: tx.clone(),
        operator_tx,
        inflight: inflight.clone(),
    };
    let join = tokio::spawn(coordinator.run());
    (CoordinatorHandle { tx, inflight }, operator_rx, join)
}

pub struct SettlementCoordinator {
    ledger: LedgerHandle,
    venues: HashMap<VenueId, Arc<dyn VenueAdapter>>,
    retry: RetryConfig,
    rx: mpsc::Receiver<Envelope>,
    self_tx: mpsc::Sender<Envelope>,
    operator_tx: mpsc::Sender<OperatorAlert>,
    /// Envelopes queued or in flight, including scheduled retries.
    inflight: Arc<AtomicUsize>,
}

impl SettlementCoordinator {
    pub async fn run(mut self) {
        info!("settlement coordinator started");
        while let Some(envelope) = self.rx.recv().await {
            self.process(envelope).await;
        }
        info!("settlement coordinator stopped");
    }

    async fn process(&self, envelope: Envelope) {
        let Envelope { job, attempt } = envelope;
        match self.execute(&job).await {
            Outcome::Done => {}
            Outcome::AlreadySettled => {
                debug!(?job, "duplicate reference id; already settled");
            }
            Outcome::Transient(error) => self.schedule_retry(job, attempt, error).await,
            Outcome::Permanent(error) => self.park(job, attempt, error).await,
        }
        self.inflight.fetch_sub(1, Ordering::SeqCst);
    }

    async fn execute(&self, job: &SettlementJob) -> Outcome {
        match job {
            SettlementJob::PositionClosed(closed) => self.settle_close(closed).await,
            SettlementJob::VenueShortfall(claim) => self.settle_shortfall(claim).await,
            SettlementJob::ForwardClaim {
                venue,
                claim_id,
                amount,
            } => self.forward_claim(venue, claim_id, *amount).await,
        }
    }

    /// Realized PnL settles as a broker-pool credit when the user won and a
    /// capped seizure when the user lost.
    async fn settle_close(&self, closed: &ClosedPosition) -> Outcome {
        let close = &closed.close;
        let realized = match position_pnl(
            close.entry_price,
            close.exit_price,
            close.size,
            close.side.is_long(),
        ) {
            Ok(pnl) => pnl,
            Err(e) => return Outcome::Permanent(format!("pnl computation failed: {e}")),
        };
        if realized.units() == 0 {
            debug!(position_id = %close.position_id, "flat close; nothing to settle");
            return Outcome::Done;
        }
        let amount = match realized.abs_money() {
            Ok(amount) => amount,
            Err(e) => return Outcome::Permanent(format!("pnl magnitude overflow: {e}")),
        };

        let result = if realized.is_negative() {
            self.ledger
                .seize_collateral_capped(close.user, amount, closed.ref_id)
                .await
                .map(|outcome| {
                    info!(
                        user = %close.user,
                        venue = %close.venue,
                        position_id = %close.position_id,
                        seized = %outcome.seized,
                        shortfall = %outcome.shortfall,
                        "losing close settled"
                    );
                })
        } else {
            self.ledger
                .credit_pnl(close.user, amount, closed.ref_id, None)
                .await
                .map(|()| {
                    info!(
                        user = %close.user,
                        venue = %close.venue,
                        position_id = %close.position_id,
                        amount = %amount,
                        "winning close settled"
                    );
                })
        };
        Outcome::from_ledger(result)
    }

    /// Shortfall claims seize whatever the user still has, draw on the
    /// insurance fund, and forward the recovered part back to the venue.
    async fn settle_shortfall(&self, claim: &ShortfallClaim) -> Outcome {
        let result = self
            .ledger
            .seize_collateral_capped(claim.user, claim.amount, claim.ref_id())
            .await;
        match result {
            Ok(outcome) => {
                let recovered = claim.amount.saturating_sub(outcome.socialized);
                info!(
                    user = %claim.user,
                    venue = %claim.venue,
                    claim_id = %claim.claim_id,
                    recovered = %recovered,
                    socialized = %outcome.socialized,
                    "shortfall claim settled"
                );
                if recovered.is_zero() {
                    return Outcome::Done;
                }
                // Forwarding retries independently; the seizure must not be
                // replayed.
                let forward = Envelope {
                    job: SettlementJob::ForwardClaim {
                        venue: claim.venue.clone(),
                        claim_id: claim.claim_id.clone(),
                        amount: recovered,
                    },
                    attempt: 0,
                };
                self.inflight.fetch_add(1, Ordering::SeqCst);
                if self.self_tx.send(forward).await.is_err() {
                    self.inflight.fetch_sub(1, Ordering::SeqCst);
                    warn!("coordinator inbox closed while forwarding claim");
                }
                Outcome::Done
            }
            Err(e) => Outcome::from_ledger_err(e),
        }
    }

    async fn forward_claim(&self, venue: &VenueId, claim_id: &str, amount: Money) -> Outcome {
        let Some(adapter) = self.venues.get(venue) else {
            return Outcome::Permanent(format!("no adapter registered for venue {venue}"));
        };
        let call = adapter.settle_claim(claim_id, amount);
        match tokio::time::timeout(VENUE_CALL_TIMEOUT, call).await {
            Ok(Ok(())) => {
                info!(venue = %venue, claim_id = %claim_id, amount = %amount, "claim funds forwarded");
                Outcome::Done
            }
            Ok(Err(VenueError::Transient(e))) => Outcome::Transient(e),
            Ok(Err(VenueError::Fatal(e))) => Outcome::Permanent(e),
            Err(_) => Outcome::Transient("venue call deadline exceeded".to_string()),
        }
    }

    async fn schedule_retry(&self, job: SettlementJob, attempt: u32, error: String) {
        if attempt >= self.retry.max_retries {
            self.park(job, attempt, error).await;
            return;
        }
        let delay = Duration::from_millis(self.retry.delay_ms(attempt));
        debug!(
            ?job,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "transient settlement failure; retrying"
        );
        let tx = self.self_tx.clone();
        let inflight = self.inflight.clone();
        inflight.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx
                .send(Envelope {
                    job,
                    attempt: attempt + 1,
                })
                .await
                .is_err()
            {
                inflight.fetch_sub(1, Ordering::SeqCst);
            }
        });
    }

    async fn park(&self, job: SettlementJob, attempts: u32, error: String) {
        warn!(?job, attempts, error = %error, "settlement parked for operator");
        let _ = self
            .operator_tx
            .send(OperatorAlert {
                job,
                attempts,
                error,
            })
            .await;
    }
}

enum Outcome {
    Done,
    AlreadySettled,
    Transient(String),
    Permanent(String),
}

impl Outcome {
    fn from_ledger(result: Result<(), LedgerError>) -> Self {
        match result {
            Ok(()) => Self::Done,
            Err(e) => Self::from_ledger_err(e),
        }
    }

    fn from_ledger_err(e: LedgerError) -> Self {
        match e {
            LedgerError::DuplicateRefId => Self::AlreadySettled,
            e if e.is_transient() => Self::Transient(e.to_string()),
            e => Self::Permanent(e.to_string()),
        }
    }
}
