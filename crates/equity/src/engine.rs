//! The equity engine actor: triggers, debounce, sequencing, emission.

use crate::compute::compute_user;
use crossvault_core::clock::SharedClock;
use crossvault_core::events::{UpdateIntent, VenueId, VenueUpdate};
use crossvault_core::fixed::{deviation_bps, Price};
use crossvault_core::keys::UserKey;
use crossvault_ledger::LedgerHandle;
use crossvault_positions::PositionStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What prompted a recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    PriceMove,
    PositionChanged,
    BalanceChanged,
    Heartbeat,
    Operator,
}

/// Requests accepted by the engine.
#[derive(Debug)]
pub enum EquityCommand {
    Trigger {
        user: UserKey,
        reason: TriggerReason,
    },
    /// A validated mark for one instrument; marks the store and triggers
    /// holders when the move exceeds the instrument's threshold.
    PriceTick {
        instrument: String,
        price: Price,
    },
    SetHaircutBps(u64),
    SetAlphaBps(u64),
    SetTriggerThreshold {
        instrument: String,
        bps: u64,
    },
}

/// The engine task has shut down.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("equity engine has shut down")]
pub struct EngineClosed;

/// Clonable handle to the engine.
#[derive(Clone)]
pub struct EquityHandle {
    tx: mpsc::Sender<EquityCommand>,
}

impl EquityHandle {
    /// # Errors
    /// Fails if the engine task has shut down.
    pub async fn trigger(&self, user: UserKey, reason: TriggerReason) -> Result<(), EngineClosed> {
        self.tx
            .send(EquityCommand::Trigger { user, reason })
            .await
            .map_err(|_| EngineClosed)
    }

    /// # Errors
    /// Fails if the engine task has shut down.
    pub async fn price_tick(&self, instrument: &str, price: Price) -> Result<(), EngineClosed> {
        self.tx
            .send(EquityCommand::PriceTick {
                instrument: instrument.to_string(),
                price,
            })
            .await
            .map_err(|_| EngineClosed)
    }

    /// # Errors
    /// Fails if the engine task has shut down.
    pub async fn send(&self, cmd: EquityCommand) -> Result<(), EngineClosed> {
        self.tx.send(cmd).await.map_err(|_| EngineClosed)
    }
}

/// Engine construction parameters.
#[derive(Debug, Clone)]
pub struct EngineParams {
    pub haircut_bps: u64,
    pub alpha_bps: u64,
    pub heartbeat_secs: u64,
    pub debounce: Duration,
    pub default_trigger_bps: u64,
}

impl From<&crossvault_core::config::EngineConfig> for EngineParams {
    fn from(config: &crossvault_core::config::EngineConfig) -> Self {
        Self {
            haircut_bps: config.haircut_bps,
            alpha_bps: config.overspend_alpha_bps,
            heartbeat_secs: config.heartbeat_secs,
            debounce: Duration::from_millis(config.debounce_ms),
            default_trigger_bps: config.default_trigger_bps,
        }
    }
}

/// Spawns the engine; emitted intents arrive on the returned receiver.
#[must_use]
pub fn spawn(
    store: Arc<PositionStore>,
    ledger: LedgerHandle,
    clock: SharedClock,
    params: EngineParams,
    channel_capacity: usize,
) -> (EquityHandle, mpsc::Receiver<UpdateIntent>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(channel_capacity);
    let (out, intents) = mpsc::channel(channel_capacity);
    let engine = EquityEngine {
        store,
        ledger,
        clock,
        out,
        rx,
        haircut_bps: params.haircut_bps,
        alpha_bps: params.alpha_bps,
        heartbeat_secs: params.heartbeat_secs,
        debounce: params.debounce,
        default_trigger_bps: params.default_trigger_bps,
        trigger_bps: HashMap::new(),
        last_price: HashMap::new(),
        sequences: HashMap::new(),
        last_update_at: HashMap::new(),
        pending: HashMap::new(),
    };
    let join = tokio::spawn(engine.run());
    (EquityHandle { tx }, intents, join)
}

pub struct EquityEngine {
    store: Arc<PositionStore>,
    ledger: LedgerHandle,
    clock: SharedClock,
    out: mpsc::Sender<UpdateIntent>,
    rx: mpsc::Receiver<EquityCommand>,
    haircut_bps: u64,
    alpha_bps: u64,
    heartbeat_secs: u64,
    debounce: Duration,
    default_trigger_bps: u64,
    trigger_bps: HashMap<String, u64>,
    last_price: HashMap<String, Price>,
    sequences: HashMap<(UserKey, VenueId), u64>,
    /// Engine-clock time of the last emitted update per user.
    last_update_at: HashMap<UserKey, u64>,
    /// Users awaiting a debounced computation.
    pending: HashMap<UserKey, Instant>,
}

impl EquityEngine {
    pub async fn run(mut self) {
        info!("equity engine started");
        loop {
            let next_deadline = self.pending.values().min().copied();
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => break,
                },
                () = sleep_until_deadline(next_deadline), if next_deadline.is_some() => {
                    self.flush_due().await;
                }
            }
        }
        info!("equity engine stopped");
    }

    async fn handle(&mut self, cmd: EquityCommand) {
        match cmd {
            EquityCommand::Trigger { user, reason } => {
                if reason == TriggerReason::Heartbeat {
                    let last = self.last_update_at.get(&user).copied().unwrap_or(0);
                    if self.clock.now().saturating_sub(last) < self.heartbeat_secs {
                        return;
                    }
                }
                self.schedule(user);
            }
            EquityCommand::PriceTick { instrument, price } => {
                self.on_price_tick(&instrument, price);
            }
            EquityCommand::SetHaircutBps(bps) => {
                info!(haircut_bps = bps, "haircut updated");
                self.haircut_bps = bps;
            }
            EquityCommand::SetAlphaBps(bps) => self.alpha_bps = bps,
            EquityCommand::SetTriggerThreshold { instrument, bps } => {
                self.trigger_bps.insert(instrument, bps);
            }
        }
    }

    /// Marks the store at every tick; triggers holders only when the move
    /// from the last trigger price goes beyond the instrument threshold.
    fn on_price_tick(&mut self, instrument: &str, price: Price) {
        self.store.mark_instrument(instrument, price);

        let threshold = self
            .trigger_bps
            .get(instrument)
            .copied()
            .unwrap_or(self.default_trigger_bps);
        let moved = match self.last_price.get(instrument) {
            Some(last) => deviation_bps(price, *last).map_or(true, |bps| bps > threshold),
            None => true,
        };
        if !moved {
            return;
        }
        self.last_price.insert(instrument.to_string(), price);

        let holders: Vec<UserKey> = self
            .store
            .iter_all()
            .into_iter()
            .filter(|p| p.instrument == instrument)
            .map(|p| p.user)
            .collect();
        for user in holders {
            self.schedule(user);
        }
    }

    /// Collapses triggers inside the debounce window into one computation.
    fn schedule(&mut self, user: UserKey) {
        self.pending
            .entry(user)
            .or_insert_with(|| Instant::now() + self.debounce);
    }

    async fn flush_due(&mut self) {
        let now = Instant::now();
        let due: Vec<UserKey> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(user, _)| *user)
            .collect();
        for user in due {
            self.pending.remove(&user);
            self.recompute(user).await;
        }
    }

    async fn recompute(&mut self, user: UserKey) {
        let collateral = match self.ledger.user_balances(user).await {
            Ok(balances) => balances.collateral,
            Err(e) => {
                warn!(user = %user, error = %e, "collateral read failed; skipping recompute");
                return;
            }
        };
        let positions = self.store.iter_user(user);
        if positions.is_empty() {
            return;
        }
        let result = compute_user(collateral, &positions, self.haircut_bps, self.alpha_bps);

        if result.overspent {
            warn!(
                user = %user,
                margin_in_use = %result.margin_in_use,
                collateral = %collateral,
                scaled = result.scaled,
                "user overspent across venues"
            );
            for entry in &result.equities {
                let intent = UpdateIntent::Freeze {
                    user,
                    venue: entry.venue.clone(),
                };
                if self.out.send(intent).await.is_err() {
                    return;
                }
            }
        }

        for entry in result.equities {
            if entry.skipped_stale {
                debug!(user = %user, venue = %entry.venue, "stale mark; venue keeps local view");
                continue;
            }
            let sequence = self
                .sequences
                .entry((user, entry.venue.clone()))
                .and_modify(|s| *s += 1)
                .or_insert(1);
            let update = VenueUpdate {
                user,
                venue: entry.venue,
                equity: entry.equity,
                sequence: *sequence,
            };
            debug!(
                user = %update.user,
                venue = %update.venue,
                equity = %update.equity,
                sequence = update.sequence,
                "venue equity update"
            );
            if self.out.send(UpdateIntent::Equity(update)).await.is_err() {
                return;
            }
        }
        self.last_update_at.insert(user, self.clock.now());
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        // Guarded out by the select precondition.
        None => std::future::pending().await,
    }
}
