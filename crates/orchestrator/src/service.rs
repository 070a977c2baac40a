//! Service assembly and task wiring.

use crate::admin::AdminApi;
use crate::pressure::Watermarks;
use crate::registry::VenueRegistry;
use anyhow::{Context, Result};
use crossvault_core::clock::SharedClock;
use crossvault_core::config::EngineConfig;
use crossvault_core::events::{PositionEvent, ShortfallClaim, UpdateIntent, VenueId};
use crossvault_equity::{EngineParams, EquityHandle, TriggerReason};
use crossvault_ledger::{
    LedgerEvent, LedgerHandle, LedgerParams, LedgerState, StableToken, TradingHoursGuard,
};
use crossvault_oracle::PriceOracle;
use crossvault_positions::PositionStore;
use crossvault_settlement::{CoordinatorHandle, NettingEngine, OperatorAlert};
use crossvault_venue::{connect_with_backoff, Backoff, PriceUpdate, VenueAdapter};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Deadline on outbound venue balance/freeze calls.
const VENUE_PUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// A fully wired engine. Dropping the service leaves the spawned tasks
/// running; call [`EngineService::shutdown`] to stop them.
pub struct EngineService {
    pub ledger: LedgerHandle,
    pub admin: AdminApi,
    pub equity: EquityHandle,
    pub coordinator: CoordinatorHandle,
    pub store: Arc<PositionStore>,
    pub oracle: Arc<PriceOracle>,
    alerts: Option<mpsc::Receiver<OperatorAlert>>,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineService {
    /// Builds and starts the engine: spawns the ledger actor, equity engine,
    /// settlement coordinator and netting executor, connects every venue,
    /// and wires all streams.
    ///
    /// # Errors
    /// Fails when a venue cannot be connected within its backoff budget or a
    /// venue's streams were already taken.
    pub async fn start(
        config: EngineConfig,
        clock: SharedClock,
        token: Box<dyn StableToken>,
        oracle: Arc<PriceOracle>,
        registry: VenueRegistry,
        hours: TradingHoursGuard,
    ) -> Result<Self> {
        let mut tasks = Vec::new();

        let state = LedgerState::new(LedgerParams::from(&config), token);
        let (ledger, ledger_admin, ledger_events, ledger_task) = crossvault_ledger::spawn(
            state,
            clock.clone(),
            hours,
            Some(oracle.clone()),
            config.bus_capacity,
            config.bus_capacity,
        );
        tasks.push(ledger_task);

        let store = Arc::new(PositionStore::new());
        let (equity, intents, equity_task) = crossvault_equity::spawn(
            store.clone(),
            ledger.clone(),
            clock.clone(),
            EngineParams::from(&config),
            config.bus_capacity,
        );
        tasks.push(equity_task);

        let (coordinator, alerts, coordinator_task) = crossvault_settlement::spawn(
            ledger.clone(),
            registry.map(),
            config.retry.clone(),
            config.bus_capacity,
        );
        tasks.push(coordinator_task);

        let admin = AdminApi::new(ledger_admin, equity.clone(), oracle.clone());
        let watermarks = Watermarks::from_config(&config);
        let symbols = oracle.symbols();

        // Venue sessions and stream consumers.
        for venue_id in registry.ids() {
            let adapter = registry
                .get(&venue_id)
                .context("registry lookup after ids()")?;
            connect_with_backoff(adapter.as_ref(), &symbols, Backoff::for_reconnect())
                .await
                .with_context(|| format!("connecting venue {venue_id}"))?;

            let positions = adapter
                .take_position_stream()
                .with_context(|| format!("position stream for {venue_id} already taken"))?;
            tasks.push(spawn_position_consumer(
                venue_id.clone(),
                positions,
                store.clone(),
                equity.clone(),
                coordinator.clone(),
                watermarks,
            ));

            let claims = adapter
                .take_claim_stream()
                .with_context(|| format!("claim stream for {venue_id} already taken"))?;
            tasks.push(spawn_claim_consumer(
                venue_id.clone(),
                claims,
                coordinator.clone(),
                watermarks,
            ));

            let quotes = adapter
                .take_price_stream()
                .with_context(|| format!("price stream for {venue_id} already taken"))?;
            tasks.push(spawn_quote_consumer(
                venue_id,
                quotes,
                store.clone(),
                equity.clone(),
            ));
        }

        tasks.push(spawn_intent_router(intents, registry.map()));
        tasks.push(spawn_ledger_event_consumer(ledger_events, equity.clone()));
        tasks.push(spawn_price_poller(
            oracle.clone(),
            equity.clone(),
            config.price_poll_secs,
        ));
        tasks.push(spawn_heartbeat(
            store.clone(),
            equity.clone(),
            config.heartbeat_secs,
        ));
        tasks.push(spawn_netting(
            NettingEngine::new(ledger.clone()),
            config.netting_window_secs,
        ));

        info!(venues = registry.len(), "engine service started");
        Ok(Self {
            ledger,
            admin,
            equity,
            coordinator,
            store,
            oracle,
            alerts: Some(alerts),
            tasks,
        })
    }

    /// The operator alert queue (settlement jobs given up on). Takeable once.
    pub fn take_alerts(&mut self) -> Option<mpsc::Receiver<OperatorAlert>> {
        self.alerts.take()
    }

    /// Stops every spawned task.
    pub fn shutdown(self) {
        info!("engine service shutting down");
        for task in self.tasks {
            task.abort();
        }
    }
}

fn spawn_position_consumer(
    venue_id: VenueId,
    mut stream: mpsc::Receiver<PositionEvent>,
    store: Arc<PositionStore>,
    equity: EquityHandle,
    coordinator: CoordinatorHandle,
    watermarks: Watermarks,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = stream.recv().await {
            let gauge_reader = coordinator.clone();
            watermarks
                .wait_for_capacity(move || gauge_reader.inflight())
                .await;
            match event {
                PositionEvent::Snapshot {
                    user,
                    venue,
                    positions,
                } => {
                    store.apply_snapshot(user, &venue, positions);
                    let _ = equity.trigger(user, TriggerReason::PositionChanged).await;
                }
                PositionEvent::Update(state) => {
                    let user = state.user;
                    store.apply_update(state);
                    let _ = equity.trigger(user, TriggerReason::PositionChanged).await;
                }
                PositionEvent::Close(close) => {
                    let user = close.user;
                    let closed = store.apply_close(close);
                    let _ = equity.trigger(user, TriggerReason::PositionChanged).await;
                    if coordinator.on_position_closed(closed).await.is_err() {
                        warn!(venue = %venue_id, "coordinator gone; dropping close");
                        return;
                    }
                }
            }
        }
        debug!(venue = %venue_id, "position stream ended");
    })
}

/// Venue quotes prompt recomputation for holders of the symbol; the mark
/// itself always comes from the validated oracle path.
fn spawn_quote_consumer(
    venue_id: VenueId,
    mut stream: mpsc::Receiver<PriceUpdate>,
    store: Arc<PositionStore>,
    equity: EquityHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(quote) = stream.recv().await {
            if quote.mid_price().is_none() {
                debug!(venue = %venue_id, symbol = %quote.symbol, "unusable venue quote");
                continue;
            }
            let holders: Vec<_> = store
                .iter_all()
                .into_iter()
                .filter(|p| p.instrument == quote.symbol)
                .map(|p| p.user)
                .collect();
            for user in holders {
                if equity.trigger(user, TriggerReason::PriceMove).await.is_err() {
                    return;
                }
            }
        }
        debug!(venue = %venue_id, "price stream ended");
    })
}

fn spawn_claim_consumer(
    venue_id: VenueId,
    mut stream: mpsc::Receiver<ShortfallClaim>,
    coordinator: CoordinatorHandle,
    watermarks: Watermarks,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(claim) = stream.recv().await {
            let gauge_reader = coordinator.clone();
            watermarks
                .wait_for_capacity(move || gauge_reader.inflight())
                .await;
            if coordinator.on_venue_shortfall(claim).await.is_err() {
                warn!(venue = %venue_id, "coordinator gone; dropping claim");
                return;
            }
        }
        debug!(venue = %venue_id, "claim stream ended");
    })
}

fn spawn_intent_router(
    mut intents: mpsc::Receiver<UpdateIntent>,
    venues: HashMap<VenueId, Arc<dyn VenueAdapter>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(intent) = intents.recv().await {
            match intent {
                UpdateIntent::Equity(update) => {
                    let Some(adapter) = venues.get(&update.venue) else {
                        warn!(venue = %update.venue, "equity update for unregistered venue");
                        continue;
                    };
                    let push = adapter.set_user_balance(&update);
                    match tokio::time::timeout(VENUE_PUSH_TIMEOUT, push).await {
                        Ok(Ok(applied)) => {
                            debug!(
                                venue = %update.venue,
                                user = %update.user,
                                sequence = applied,
                                "venue balance acknowledged"
                            );
                        }
                        Ok(Err(e)) => {
                            // A newer sequenced update supersedes this one;
                            // no retry here.
                            warn!(venue = %update.venue, error = %e, "balance push failed");
                        }
                        Err(_) => {
                            warn!(venue = %update.venue, "balance push deadline exceeded");
                        }
                    }
                }
                UpdateIntent::Freeze { user, venue } => {
                    let Some(adapter) = venues.get(&venue) else {
                        continue;
                    };
                    let freeze = adapter.freeze_new_orders(user);
                    match tokio::time::timeout(VENUE_PUSH_TIMEOUT, freeze).await {
                        Ok(Ok(())) => {
                            info!(venue = %venue, user = %user, "new orders frozen");
                        }
                        Ok(Err(e)) => warn!(venue = %venue, error = %e, "freeze failed"),
                        Err(_) => warn!(venue = %venue, "freeze deadline exceeded"),
                    }
                }
            }
        }
    })
}

fn spawn_ledger_event_consumer(
    mut events: mpsc::Receiver<LedgerEvent>,
    equity: EquityHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match &event {
                LedgerEvent::CollateralDeposited { user, .. }
                | LedgerEvent::CollateralWithdrawn { user, .. } => {
                    let _ = equity.trigger(*user, TriggerReason::BalanceChanged).await;
                }
                LedgerEvent::Shortfall {
                    user,
                    shortfall,
                    socialized,
                    ..
                } => {
                    warn!(user = %user, shortfall = %shortfall, socialized = %socialized, "shortfall recorded");
                }
                LedgerEvent::Paused { reason } => warn!(?reason, "ledger paused"),
                LedgerEvent::Unpaused => info!("ledger unpaused"),
                other => debug!(?other, "ledger event"),
            }
        }
    })
}

fn spawn_price_poller(
    oracle: Arc<PriceOracle>,
    equity: EquityHandle,
    poll_secs: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(poll_secs.max(1)));
        loop {
            ticker.tick().await;
            for symbol in oracle.symbols() {
                match oracle.get_validated_price(&symbol).await {
                    Ok(validated) => {
                        if equity.price_tick(&symbol, validated.price).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => debug!(symbol = %symbol, error = %e, "price poll failed"),
                }
            }
        }
    })
}

fn spawn_heartbeat(
    store: Arc<PositionStore>,
    equity: EquityHandle,
    heartbeat_secs: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(heartbeat_secs.max(1)));
        // The first tick fires immediately; skip it so heartbeats start one
        // interval in.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            for user in store.users() {
                if equity.trigger(user, TriggerReason::Heartbeat).await.is_err() {
                    return;
                }
            }
        }
    })
}

fn spawn_netting(mut engine: NettingEngine, window_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(window_secs.max(1)));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match engine.run_window().await {
                Ok(reports) => {
                    for report in reports {
                        info!(
                            vault_id = %report.vault_id,
                            savings = %report.savings,
                            "netting window settled"
                        );
                    }
                }
                Err(e) => {
                    warn!(error = %e, "netting window failed");
                    return;
                }
            }
        }
    })
}
