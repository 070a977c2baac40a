//! Demo runner: the full engine against two simulated venues.

use anyhow::Result;
use crossvault_core::clock::{Clock, SharedClock, SystemClock};
use crossvault_core::config::EngineConfig;
use crossvault_core::events::{PositionEvent, PositionState, Side};
use crossvault_core::fixed::{Money, Price};
use crossvault_core::keys::UserKey;
use crossvault_ledger::{InMemoryToken, TradingHoursGuard};
use crossvault_oracle::{MockFeed, PriceOracle, SymbolConfig};
use crossvault_orchestrator::{EngineService, VenueRegistry};
use crossvault_venue::{SimVenue, VenueAdapter};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const SYMBOL: &str = "BTC-PERP";
const BASE_PRICE: u64 = 60_000;

/// A repeating drift pattern keeps the demo deterministic.
const DRIFT: [i64; 8] = [250, 600, -150, 900, -450, 300, -700, 120];

pub async fn run_engine(config: EngineConfig) -> Result<()> {
    let clock: SharedClock = Arc::new(SystemClock);
    let user = UserKey::from_tag(0x01);
    let operator = UserKey::from_tag(0xff);

    let mut token = InMemoryToken::new();
    token.mint(user, Money::from_whole(10_000_000)?);
    token.mint(operator, Money::from_whole(10_000_000)?);

    let oracle = Arc::new(PriceOracle::new(clock.clone()));
    let feed = Arc::new(MockFeed::new());
    feed.push_price(Price::from_whole(BASE_PRICE)?, clock.now());
    oracle.configure_symbol(SYMBOL, SymbolConfig::from(&config.oracle), feed.clone());

    let kraken = Arc::new(SimVenue::new("kraken"));
    let bybit = Arc::new(SimVenue::new("bybit"));
    let mut registry = VenueRegistry::new();
    registry.register(kraken.clone());
    registry.register(bybit.clone());

    let poll_secs = config.price_poll_secs;
    let service = EngineService::start(
        config,
        clock.clone(),
        Box::new(token),
        oracle,
        registry,
        TradingHoursGuard::always_open(),
    )
    .await?;

    service
        .admin
        .broker_deposit(operator, Money::from_whole(1_000_000)?)
        .await?;
    service
        .admin
        .insurance_deposit(operator, Money::from_whole(50_000)?)
        .await?;
    service
        .ledger
        .deposit_collateral(user, Money::from_whole(100_000)?)
        .await?;

    // A hedged pair: long on kraken, short on bybit.
    for (venue, side) in [(&kraken, Side::Long), (&bybit, Side::Short)] {
        venue
            .publish_position_event(PositionEvent::Update(PositionState {
                user,
                venue: venue.venue_id().clone(),
                instrument: SYMBOL.to_string(),
                position_id: format!("{}-demo", venue.venue_id()),
                side,
                size: Money::from_whole(2)?,
                entry_price: Price::from_whole(BASE_PRICE)?,
                initial_margin: Money::from_whole(12_000)?,
            }))
            .await;
    }

    // Drifting mark price.
    {
        let feed = feed.clone();
        let clock = clock.clone();
        tokio::spawn(async move {
            let mut level = i64::try_from(BASE_PRICE).unwrap_or(0);
            let mut ticker = tokio::time::interval(Duration::from_secs(poll_secs.max(1)));
            loop {
                ticker.tick().await;
                for delta in DRIFT {
                    level += delta;
                    if let Ok(price) = Price::from_whole(level.unsigned_abs()) {
                        feed.push_price(price, clock.now());
                    }
                    ticker.tick().await;
                }
            }
        });
    }

    // Periodic status line.
    {
        let ledger = service.ledger.clone();
        let kraken = kraken.clone();
        let bybit = bybit.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            loop {
                ticker.tick().await;
                let Ok(pools) = ledger.pools().await else {
                    return;
                };
                let Ok(balances) = ledger.user_balances(user).await else {
                    return;
                };
                info!(
                    collateral = %balances.collateral,
                    pnl = %balances.pnl,
                    broker_pool = %pools.broker_pool,
                    insurance = %pools.insurance_fund,
                    kraken_equity = %kraken
                        .applied_balance(user)
                        .map_or_else(|| "-".to_string(), |b| b.equity.to_string()),
                    bybit_equity = %bybit
                        .applied_balance(user)
                        .map_or_else(|| "-".to_string(), |b| b.equity.to_string()),
                    "engine status"
                );
            }
        });
    }

    info!("engine running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    service.shutdown();
    Ok(())
}
