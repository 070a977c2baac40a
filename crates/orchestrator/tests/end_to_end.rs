//! End-to-end engine flows against simulated venues and a scripted feed.

use crossvault_core::clock::SimClock;
use crossvault_core::config::EngineConfig;
use crossvault_core::events::{
    PositionClose, PositionEvent, PositionState, ShortfallClaim, Side, VenueId,
};
use crossvault_core::fixed::{Money, Price};
use crossvault_core::keys::UserKey;
use crossvault_ledger::{InMemoryToken, LedgerStatus, Obligation, TradingHoursGuard};
use crossvault_oracle::{MockFeed, PriceOracle, SymbolConfig};
use crossvault_orchestrator::{EngineService, VenueRegistry};
use crossvault_venue::SimVenue;
use std::sync::Arc;
use std::time::Duration;

const NOW: u64 = 1_700_000_000;

fn whole(n: u64) -> Money {
    Money::from_whole(n).unwrap()
}

fn price(n: u64) -> Price {
    Price::from_whole(n).unwrap()
}

struct Rig {
    service: EngineService,
    kraken: Arc<SimVenue>,
    bybit: Arc<SimVenue>,
    feed: Arc<MockFeed>,
    user: UserKey,
    operator: UserKey,
}

async fn start_rig() -> Rig {
    let clock = Arc::new(SimClock::new(NOW));
    let user = UserKey::from_tag(0xaa);
    let operator = UserKey::from_tag(0xff);

    let mut token = InMemoryToken::new();
    token.mint(user, whole(10_000_000));
    token.mint(operator, whole(10_000_000));

    let oracle = Arc::new(PriceOracle::new(clock.clone()));
    let feed = Arc::new(MockFeed::new());
    feed.push_price(price(60_000), NOW);
    oracle.configure_symbol(
        "BTC-PERP",
        SymbolConfig {
            max_staleness_secs: 300,
            price_band_bps: 10_000,
            max_fallback_age_secs: 300,
        },
        feed.clone(),
    );

    let kraken = Arc::new(SimVenue::new("kraken"));
    let bybit = Arc::new(SimVenue::new("bybit"));
    let mut registry = VenueRegistry::new();
    registry.register(kraken.clone());
    registry.register(bybit.clone());

    let config = EngineConfig {
        price_poll_secs: 1,
        netting_window_secs: 1,
        debounce_ms: 10,
        ..EngineConfig::default()
    };

    let service = EngineService::start(
        config,
        clock,
        Box::new(token),
        oracle,
        registry,
        TradingHoursGuard::always_open(),
    )
    .await
    .unwrap();

    Rig {
        service,
        kraken,
        bybit,
        feed,
        user,
        operator,
    }
}

fn open_position(user: UserKey, venue: &str, side: Side, entry: u64) -> PositionState {
    PositionState {
        user,
        venue: VenueId::new(venue),
        instrument: "BTC-PERP".to_string(),
        position_id: format!("{venue}-btc-1"),
        side,
        size: Money::from_whole(1).unwrap(),
        entry_price: Price::from_whole(entry).unwrap(),
        initial_margin: whole(5_000),
    }
}

/// Polls until `check` passes or the deadline elapses.
async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition never held: {what}");
}

#[tokio::test]
async fn test_cross_venue_equity_flow() {
    let rig = start_rig().await;

    rig.service
        .admin
        .broker_deposit(rig.operator, whole(500_000))
        .await
        .unwrap();
    rig.service
        .ledger
        .deposit_collateral(rig.user, whole(50_000))
        .await
        .unwrap();

    // Long on kraken, short on bybit, both at 60_000.
    rig.kraken
        .publish_position_event(PositionEvent::Update(open_position(
            rig.user, "kraken", Side::Long, 60_000,
        )))
        .await;
    rig.bybit
        .publish_position_event(PositionEvent::Update(open_position(
            rig.user, "bybit", Side::Short, 60_000,
        )))
        .await;

    // Mark moves to 64_000: kraken +4_000, bybit −4_000.
    rig.feed.push_price(price(64_000), NOW);

    let kraken = rig.kraken.clone();
    let user = rig.user;
    eventually("kraken equity reaches 52_000", move || {
        kraken
            .applied_balance(user)
            .is_some_and(|b| b.equity == whole(52_000))
    })
    .await;

    let bybit = rig.bybit.clone();
    eventually("bybit equity reaches 48_000", move || {
        bybit
            .applied_balance(user)
            .is_some_and(|b| b.equity == whole(48_000))
    })
    .await;

    // Close the kraken leg at 64_000: +4_000 realized PnL, exactly once.
    rig.kraken
        .publish_position_event(PositionEvent::Close(PositionClose {
            user: rig.user,
            venue: VenueId::new("kraken"),
            instrument: "BTC-PERP".to_string(),
            position_id: "kraken-btc-1".to_string(),
            side: Side::Long,
            size: Money::from_whole(1).unwrap(),
            entry_price: price(60_000),
            exit_price: price(64_000),
            closed_at: NOW,
        }))
        .await;

    let mut credited = false;
    for _ in 0..100 {
        let balances = rig.service.ledger.user_balances(rig.user).await.unwrap();
        if balances.pnl == whole(4_000) {
            credited = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(credited, "realized pnl never credited");

    // Identity intact and ledger still active.
    let pools = rig.service.ledger.pools().await.unwrap();
    let balances = rig.service.ledger.user_balances(rig.user).await.unwrap();
    let attributed = balances.collateral.units()
        + balances.pnl.units()
        + pools.broker_pool.units()
        + pools.insurance_fund.units();
    assert_eq!(attributed, pools.vault_balance.units());
    assert_eq!(
        rig.service.ledger.status().await.unwrap(),
        LedgerStatus::Active
    );

    rig.service.shutdown();
}

#[tokio::test]
async fn test_shortfall_claim_waterfall_and_forwarding() {
    let rig = start_rig().await;

    rig.service
        .admin
        .insurance_deposit(rig.operator, whole(10_000))
        .await
        .unwrap();
    rig.service
        .ledger
        .deposit_collateral(rig.user, whole(50_000))
        .await
        .unwrap();

    // The venue claims 70_000 after liquidating the user.
    rig.bybit
        .publish_claim(ShortfallClaim {
            venue: VenueId::new("bybit"),
            claim_id: "liq-77".to_string(),
            user: rig.user,
            amount: whole(70_000),
        })
        .await;

    let bybit = rig.bybit.clone();
    eventually("claim funds forwarded", move || {
        bybit.claim_settlements() == vec![("liq-77".to_string(), whole(60_000))]
    })
    .await;

    let pools = rig.service.ledger.pools().await.unwrap();
    assert_eq!(pools.insurance_fund, Money::ZERO);
    assert_eq!(pools.socialized_loss, whole(10_000));
    assert_eq!(pools.broker_pool, whole(60_000));
    let balances = rig.service.ledger.user_balances(rig.user).await.unwrap();
    assert_eq!(balances.collateral, Money::ZERO);

    rig.service.shutdown();
}

#[tokio::test]
async fn test_netting_task_settles_enqueued_obligations() {
    let rig = start_rig().await;
    let other = UserKey::from_tag(0xbb);

    rig.service
        .admin
        .broker_deposit(rig.operator, whole(1_000))
        .await
        .unwrap();
    // Give `other` PnL to debit against.
    rig.service
        .ledger
        .credit_pnl(
            other,
            whole(60),
            crossvault_core::keys::RefId::from_tag(1),
            None,
        )
        .await
        .unwrap();

    for (user, amount) in [(rig.user, 100i128), (other, -60), (rig.user, -30)] {
        rig.service
            .ledger
            .enqueue_obligation(Obligation {
                user,
                vault_id: "vault-a".to_string(),
                amount: amount * 1_000_000,
            })
            .await
            .unwrap();
    }

    let mut netted = false;
    for _ in 0..100 {
        let balances = rig.service.ledger.user_balances(rig.user).await.unwrap();
        if balances.pnl == whole(70) {
            netted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(netted, "net credit never applied");

    let other_balances = rig.service.ledger.user_balances(other).await.unwrap();
    assert_eq!(other_balances.pnl, Money::ZERO);

    rig.service.shutdown();
}
