//! Scripted settlement scenarios against a fresh ledger.
//!
//! Exercises the credit path, the capped-seize waterfall, the circuit
//! breaker, and a netting window, printing the ledger state after each step.

use anyhow::Result;
use crossvault_core::clock::{SharedClock, SystemClock};
use crossvault_core::config::EngineConfig;
use crossvault_core::fixed::Money;
use crossvault_core::keys::{RefId, UserKey};
use crossvault_ledger::{
    InMemoryToken, LedgerError, LedgerParams, LedgerState, Obligation, ParamUpdate,
    TradingHoursGuard,
};
use crossvault_settlement::NettingEngine;
use std::sync::Arc;
use tracing::info;

pub async fn run_scenarios(config: EngineConfig) -> Result<()> {
    let clock: SharedClock = Arc::new(SystemClock);
    let alice = UserKey::from_tag(0x0a);
    let bob = UserKey::from_tag(0x0b);
    let operator = UserKey::from_tag(0xff);

    let mut token = InMemoryToken::new();
    for holder in [alice, bob, operator] {
        token.mint(holder, Money::from_whole(10_000_000)?);
    }
    let state = LedgerState::new(LedgerParams::from(&config), Box::new(token));
    let (ledger, admin, mut events, _task) = crossvault_ledger::spawn(
        state,
        clock,
        TradingHoursGuard::always_open(),
        None,
        config.bus_capacity,
        config.bus_capacity,
    );
    // Drain events in the background so the actor never blocks on the bus.
    tokio::spawn(async move { while events.recv().await.is_some() {} });

    info!("--- scenario 1: credit with dedup ---");
    admin
        .broker_deposit(operator, Money::from_whole(1_000_000)?)
        .await?;
    ledger
        .credit_pnl(alice, Money::from_whole(250)?, RefId::from_tag(1), None)
        .await?;
    let duplicate = ledger
        .credit_pnl(alice, Money::from_whole(999)?, RefId::from_tag(1), None)
        .await;
    info!(
        pnl = %ledger.user_balances(alice).await?.pnl,
        duplicate = %duplicate.unwrap_err(),
        "credit applied exactly once"
    );

    info!("--- scenario 2: capped seize waterfall ---");
    admin
        .insurance_deposit(operator, Money::from_whole(50)?)
        .await?;
    ledger
        .deposit_collateral(alice, Money::from_whole(80)?)
        .await?;
    // Alice just credited 250 PnL; the claim touches only collateral.
    let outcome = ledger
        .seize_collateral_capped(alice, Money::from_whole(100)?, RefId::from_tag(2))
        .await?;
    info!(
        seized = %outcome.seized,
        shortfall = %outcome.shortfall,
        covered = %outcome.covered_by_insurance,
        socialized = %outcome.socialized,
        "waterfall split"
    );

    info!("--- scenario 3: circuit breaker ---");
    admin
        .set_params(ParamUpdate::Breaker {
            threshold: Money::from_whole(1_000)?,
            window_secs: 3_600,
        })
        .await?;
    for tag in 3..5 {
        ledger
            .credit_pnl(bob, Money::from_whole(400)?, RefId::from_tag(tag), None)
            .await?;
    }
    let tripped = ledger
        .credit_pnl(bob, Money::from_whole(400)?, RefId::from_tag(5), None)
        .await;
    assert!(matches!(tripped, Err(LedgerError::CircuitBreakerTriggered)));
    info!(status = ?ledger.status().await?, "breaker tripped; unpausing");
    admin.unpause().await?;
    admin
        .set_params(ParamUpdate::Breaker {
            threshold: Money::ZERO,
            window_secs: 3_600,
        })
        .await?;

    info!("--- scenario 4: netting window ---");
    for (user, amount) in [(alice, 100i128), (bob, -60), (alice, -30), (bob, 10)] {
        ledger
            .enqueue_obligation(Obligation {
                user,
                vault_id: "vault-main".to_string(),
                amount: amount * 1_000_000,
            })
            .await?;
    }
    let mut netting = NettingEngine::new(ledger.clone());
    for report in netting.run_window().await? {
        info!(
            vault = %report.vault_id,
            gross = %report.gross_volume,
            netted = %report.netted_volume,
            savings = %report.savings,
            batch_id = %report.batch_id,
            "netting batch applied"
        );
    }

    let pools = ledger.pools().await?;
    info!(
        broker_pool = %pools.broker_pool,
        insurance = %pools.insurance_fund,
        socialized = %pools.socialized_loss,
        vault = %pools.vault_balance,
        "final ledger state"
    );
    Ok(())
}
