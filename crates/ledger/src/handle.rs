//! Clonable handles to the ledger actor.
//!
//! `LedgerHandle` carries the user and settlement primitives; `AdminHandle`
//! carries the operator surface. Authorization is capability-based: only the
//! process wiring that spawned the actor can hand out an `AdminHandle`.

use crate::commands::{LedgerCommand, ParamUpdate};
use crate::error::LedgerError;
use crate::state::{
    BatchOutcome, LedgerStatus, NetLeaf, Obligation, PoolsView, SeizeOutcome, UserBalances,
};
use crossvault_core::fixed::Money;
use crossvault_core::keys::{RefId, UserKey};
use tokio::sync::{mpsc, oneshot};

/// User and settlement surface of the ledger.
#[derive(Clone)]
pub struct LedgerHandle {
    tx: mpsc::Sender<LedgerCommand>,
}

impl LedgerHandle {
    #[must_use]
    pub(crate) fn new(tx: mpsc::Sender<LedgerCommand>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, LedgerError>>) -> LedgerCommand,
    ) -> Result<T, LedgerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| LedgerError::ChannelClosed)?;
        rx.await.map_err(|_| LedgerError::ChannelClosed)?
    }

    async fn query<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> LedgerCommand,
    ) -> Result<T, LedgerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| LedgerError::ChannelClosed)?;
        rx.await.map_err(|_| LedgerError::ChannelClosed)
    }

    /// # Errors
    /// Propagates ledger validation failures.
    pub async fn deposit_collateral(
        &self,
        user: UserKey,
        amount: Money,
    ) -> Result<(), LedgerError> {
        self.request(|reply| LedgerCommand::DepositCollateral {
            user,
            amount,
            reply,
        })
        .await
    }

    /// # Errors
    /// Propagates ledger validation failures (balance, cooldown, caps).
    pub async fn withdraw_collateral(
        &self,
        user: UserKey,
        amount: Money,
    ) -> Result<(), LedgerError> {
        self.request(|reply| LedgerCommand::WithdrawCollateral {
            user,
            amount,
            reply,
        })
        .await
    }

    /// # Errors
    /// Propagates ledger validation failures (balance, cooldown, caps).
    pub async fn withdraw_pnl(&self, user: UserKey, amount: Money) -> Result<(), LedgerError> {
        self.request(|reply| LedgerCommand::WithdrawPnl {
            user,
            amount,
            reply,
        })
        .await
    }

    /// Credits realized PnL out of the broker pool, at most once per
    /// `ref_id`. A `symbol` makes the primitive guarded.
    ///
    /// # Errors
    /// `DuplicateRefId` signals prior success; other failures left state
    /// untouched.
    pub async fn credit_pnl(
        &self,
        user: UserKey,
        amount: Money,
        ref_id: RefId,
        symbol: Option<String>,
    ) -> Result<(), LedgerError> {
        self.request(|reply| LedgerCommand::CreditPnl {
            user,
            amount,
            ref_id,
            symbol,
            reply,
        })
        .await
    }

    /// Seizes collateral in full, at most once per `ref_id`.
    ///
    /// # Errors
    /// `DuplicateRefId` signals prior success; other failures left state
    /// untouched.
    pub async fn seize_collateral(
        &self,
        user: UserKey,
        amount: Money,
        ref_id: RefId,
        symbol: Option<String>,
    ) -> Result<(), LedgerError> {
        self.request(|reply| LedgerCommand::SeizeCollateral {
            user,
            amount,
            ref_id,
            symbol,
            reply,
        })
        .await
    }

    /// Seizes up to the user's collateral and runs the insurance waterfall
    /// on the remainder.
    ///
    /// # Errors
    /// `DuplicateRefId` signals prior success.
    pub async fn seize_collateral_capped(
        &self,
        user: UserKey,
        requested: Money,
        ref_id: RefId,
    ) -> Result<SeizeOutcome, LedgerError> {
        self.request(|reply| LedgerCommand::SeizeCollateralCapped {
            user,
            requested,
            ref_id,
            reply,
        })
        .await
    }

    /// # Errors
    /// Fails on a zero amount or a paused ledger.
    pub async fn enqueue_obligation(&self, obligation: Obligation) -> Result<(), LedgerError> {
        self.request(|reply| LedgerCommand::EnqueueObligation { obligation, reply })
            .await
    }

    /// Takes every pending obligation, leaving the queue empty.
    ///
    /// # Errors
    /// Fails only if the actor has shut down.
    pub async fn drain_obligations(&self) -> Result<Vec<Obligation>, LedgerError> {
        self.query(|reply| LedgerCommand::DrainObligations { reply })
            .await
    }

    /// Applies a netting batch atomically, at most once per `batch_id`.
    ///
    /// # Errors
    /// `DuplicateRefId` signals prior application.
    pub async fn apply_net_batch(
        &self,
        batch_id: RefId,
        leaves: Vec<NetLeaf>,
    ) -> Result<BatchOutcome, LedgerError> {
        self.request(|reply| LedgerCommand::ApplyNetBatch {
            batch_id,
            leaves,
            reply,
        })
        .await
    }

    /// # Errors
    /// Fails only if the actor has shut down.
    pub async fn user_balances(&self, user: UserKey) -> Result<UserBalances, LedgerError> {
        self.query(|reply| LedgerCommand::GetUser { user, reply })
            .await
    }

    /// # Errors
    /// Fails only if the actor has shut down.
    pub async fn pools(&self) -> Result<PoolsView, LedgerError> {
        self.query(|reply| LedgerCommand::GetPools { reply }).await
    }

    /// # Errors
    /// Fails only if the actor has shut down.
    pub async fn status(&self) -> Result<LedgerStatus, LedgerError> {
        self.query(|reply| LedgerCommand::GetStatus { reply }).await
    }
}

/// Operator surface of the ledger.
#[derive(Clone)]
pub struct AdminHandle {
    tx: mpsc::Sender<LedgerCommand>,
}

impl AdminHandle {
    #[must_use]
    pub(crate) fn new(tx: mpsc::Sender<LedgerCommand>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, LedgerError>>) -> LedgerCommand,
    ) -> Result<T, LedgerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| LedgerError::ChannelClosed)?;
        rx.await.map_err(|_| LedgerError::ChannelClosed)?
    }

    async fn fire<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> LedgerCommand,
    ) -> Result<T, LedgerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| LedgerError::ChannelClosed)?;
        rx.await.map_err(|_| LedgerError::ChannelClosed)
    }

    /// # Errors
    /// Fails only if the actor has shut down.
    pub async fn pause(&self) -> Result<(), LedgerError> {
        self.fire(|reply| LedgerCommand::Pause { reply }).await
    }

    /// # Errors
    /// Fails only if the actor has shut down.
    pub async fn unpause(&self) -> Result<(), LedgerError> {
        self.fire(|reply| LedgerCommand::Unpause { reply }).await
    }

    /// # Errors
    /// Fails only if the actor has shut down.
    pub async fn set_params(&self, update: ParamUpdate) -> Result<(), LedgerError> {
        self.fire(|reply| LedgerCommand::SetParams { update, reply })
            .await
    }

    /// # Errors
    /// Propagates token transfer failures.
    pub async fn broker_deposit(&self, from: UserKey, amount: Money) -> Result<(), LedgerError> {
        self.request(|reply| LedgerCommand::BrokerDeposit {
            from,
            amount,
            reply,
        })
        .await
    }

    /// # Errors
    /// Fails when the pool cannot cover the amount.
    pub async fn broker_withdraw(&self, to: UserKey, amount: Money) -> Result<(), LedgerError> {
        self.request(|reply| LedgerCommand::BrokerWithdraw { to, amount, reply })
            .await
    }

    /// # Errors
    /// Propagates token transfer failures.
    pub async fn insurance_deposit(
        &self,
        from: UserKey,
        amount: Money,
    ) -> Result<(), LedgerError> {
        self.request(|reply| LedgerCommand::InsuranceDeposit {
            from,
            amount,
            reply,
        })
        .await
    }

    /// # Errors
    /// Fails when the fund cannot cover the amount.
    pub async fn insurance_withdraw(
        &self,
        to: UserKey,
        amount: Money,
    ) -> Result<(), LedgerError> {
        self.request(|reply| LedgerCommand::InsuranceWithdraw { to, amount, reply })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hours::TradingHoursGuard;
    use crate::state::{LedgerParams, LedgerState};
    use crate::token::InMemoryToken;
    use crate::LedgerEvent;
    use crossvault_core::clock::SimClock;
    use std::sync::Arc;

    const NOW: u64 = 1_700_000_000;

    fn units(n: u64) -> Money {
        Money::from_units(n)
    }

    fn spawn_ledger() -> (
        LedgerHandle,
        AdminHandle,
        tokio::sync::mpsc::Receiver<LedgerEvent>,
        Arc<SimClock>,
        UserKey,
    ) {
        let clock = Arc::new(SimClock::new(NOW));
        let operator = UserKey::from_tag(0xff);
        let user = UserKey::from_tag(0xaa);
        let mut token = InMemoryToken::new();
        token.mint(operator, units(10_000_000));
        token.mint(user, units(10_000_000));
        let params = LedgerParams {
            withdrawal_cooldown_secs: 0,
            user_daily_cap: Money::ZERO,
            global_daily_cap: Money::ZERO,
            breaker_threshold: Money::ZERO,
            breaker_window_secs: 3_600,
            netting_fee_bps: 0,
        };
        let state = LedgerState::new(params, Box::new(token));
        let (handle, admin, events, _join) = crate::actor::spawn(
            state,
            clock.clone(),
            TradingHoursGuard::always_open(),
            None,
            64,
            256,
        );
        (handle, admin, events, clock, user)
    }

    #[tokio::test]
    async fn test_actor_round_trip_credit() {
        let (handle, admin, _events, _clock, user) = spawn_ledger();
        let operator = UserKey::from_tag(0xff);

        admin
            .broker_deposit(operator, units(1_000_000))
            .await
            .unwrap();
        handle
            .credit_pnl(user, units(250_000), RefId::from_tag(1), None)
            .await
            .unwrap();

        let balances = handle.user_balances(user).await.unwrap();
        assert_eq!(balances.pnl, units(250_000));
        assert_eq!(handle.pools().await.unwrap().broker_pool, units(750_000));

        let err = handle
            .credit_pnl(user, units(999), RefId::from_tag(1), None)
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::DuplicateRefId);
    }

    #[tokio::test]
    async fn test_actor_emits_shortfall_event() {
        let (handle, admin, mut events, _clock, user) = spawn_ledger();
        let operator = UserKey::from_tag(0xff);

        admin.insurance_deposit(operator, units(50)).await.unwrap();
        handle.deposit_collateral(user, units(80)).await.unwrap();
        let outcome = handle
            .seize_collateral_capped(user, units(100), RefId::from_tag(2))
            .await
            .unwrap();
        assert_eq!(outcome.seized, units(80));
        assert_eq!(outcome.shortfall, units(20));

        let mut saw_shortfall = false;
        while let Ok(event) = events.try_recv() {
            if let LedgerEvent::Shortfall {
                shortfall,
                covered_by_insurance,
                socialized,
                ..
            } = event
            {
                assert_eq!(shortfall, units(20));
                assert_eq!(covered_by_insurance, units(20));
                assert_eq!(socialized, Money::ZERO);
                saw_shortfall = true;
            }
        }
        assert!(saw_shortfall);
    }

    #[tokio::test]
    async fn test_actor_pause_blocks_primitives() {
        let (handle, admin, _events, _clock, user) = spawn_ledger();
        handle.deposit_collateral(user, units(100)).await.unwrap();

        admin.pause().await.unwrap();
        assert_eq!(handle.status().await.unwrap(), super::LedgerStatus::Paused);
        assert_eq!(
            handle.withdraw_collateral(user, units(1)).await.unwrap_err(),
            LedgerError::Paused
        );

        admin.unpause().await.unwrap();
        handle.withdraw_collateral(user, units(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_breaker_emits_pause_events() {
        let (handle, admin, mut events, _clock, user) = spawn_ledger();
        let operator = UserKey::from_tag(0xff);
        admin
            .broker_deposit(operator, units(1_000_000))
            .await
            .unwrap();
        admin
            .set_params(ParamUpdate::Breaker {
                threshold: units(1_000),
                window_secs: 3_600,
            })
            .await
            .unwrap();

        handle
            .credit_pnl(user, units(400), RefId::from_tag(1), None)
            .await
            .unwrap();
        handle
            .credit_pnl(user, units(400), RefId::from_tag(2), None)
            .await
            .unwrap();
        let err = handle
            .credit_pnl(user, units(400), RefId::from_tag(3), None)
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::CircuitBreakerTriggered);

        let mut saw_trip = false;
        let mut saw_pause = false;
        while let Ok(event) = events.try_recv() {
            match event {
                LedgerEvent::CircuitBreakerTriggered { threshold } => {
                    assert_eq!(threshold, units(1_000));
                    saw_trip = true;
                }
                LedgerEvent::Paused {
                    reason: crate::PauseReason::CircuitBreaker,
                } => saw_pause = true,
                _ => {}
            }
        }
        assert!(saw_trip && saw_pause);
    }

    #[tokio::test]
    async fn test_guarded_primitive_respects_oracle() {
        use crossvault_oracle::{MockFeed, PriceOracle, SymbolConfig};

        let clock = Arc::new(SimClock::new(NOW));
        let operator = UserKey::from_tag(0xff);
        let user = UserKey::from_tag(0xaa);
        let mut token = InMemoryToken::new();
        token.mint(operator, units(1_000_000));
        let state = LedgerState::new(
            LedgerParams {
                withdrawal_cooldown_secs: 0,
                user_daily_cap: Money::ZERO,
                global_daily_cap: Money::ZERO,
                breaker_threshold: Money::ZERO,
                breaker_window_secs: 3_600,
                netting_fee_bps: 0,
            },
            Box::new(token),
        );

        let oracle = Arc::new(PriceOracle::new(clock.clone()));
        let feed = Arc::new(MockFeed::new());
        oracle.configure_symbol(
            "BTC-PERP",
            SymbolConfig {
                max_staleness_secs: 300,
                price_band_bps: 500,
                max_fallback_age_secs: 300,
            },
            feed.clone(),
        );
        let (handle, admin, _events, _join) = crate::actor::spawn(
            state,
            clock,
            TradingHoursGuard::always_open(),
            Some(oracle),
            64,
            256,
        );
        admin.broker_deposit(operator, units(1_000)).await.unwrap();

        // Stale feed sample: the guard fails the primitive before the refId
        // is consumed.
        feed.push_price(crossvault_core::fixed::Price::from_whole(65_000).unwrap(), NOW - 400);
        let err = handle
            .credit_pnl(
                user,
                units(10),
                RefId::from_tag(3),
                Some("BTC-PERP".to_string()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Oracle(_)));

        // A fresh price lets the same refId settle.
        feed.push_price(crossvault_core::fixed::Price::from_whole(65_000).unwrap(), NOW);
        handle
            .credit_pnl(
                user,
                units(10),
                RefId::from_tag(3),
                Some("BTC-PERP".to_string()),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_invariant_violation_pauses_ledger() {
        // A token port that misreports the vault balance breaks the vault
        // identity; the actor must pause itself after the first audit.
        struct MisreportingToken(InMemoryToken);

        impl crate::token::StableToken for MisreportingToken {
            fn transfer_in(
                &mut self,
                from: UserKey,
                amount: Money,
            ) -> Result<(), crate::token::TokenError> {
                self.0.transfer_in(from, amount)
            }

            fn transfer_out(
                &mut self,
                to: UserKey,
                amount: Money,
            ) -> Result<(), crate::token::TokenError> {
                self.0.transfer_out(to, amount)
            }

            fn vault_balance(&self) -> Money {
                Money::from_units(self.0.vault_balance().units() + 1)
            }
        }

        let clock = Arc::new(SimClock::new(NOW));
        let user = UserKey::from_tag(0xaa);
        let mut inner = InMemoryToken::new();
        inner.mint(user, units(1_000));
        let state = LedgerState::new(
            LedgerParams {
                withdrawal_cooldown_secs: 0,
                user_daily_cap: Money::ZERO,
                global_daily_cap: Money::ZERO,
                breaker_threshold: Money::ZERO,
                breaker_window_secs: 3_600,
                netting_fee_bps: 0,
            },
            Box::new(MisreportingToken(inner)),
        );
        let (handle, _admin, mut events, _join) = crate::actor::spawn(
            state,
            clock,
            TradingHoursGuard::always_open(),
            None,
            64,
            256,
        );

        // The deposit itself succeeds, but the post-primitive audit fails.
        handle.deposit_collateral(user, units(100)).await.unwrap();
        assert_eq!(handle.status().await.unwrap(), super::LedgerStatus::Paused);
        assert_eq!(
            handle.withdraw_collateral(user, units(1)).await.unwrap_err(),
            LedgerError::Paused
        );

        let mut saw_invariant_pause = false;
        while let Ok(event) = events.try_recv() {
            if matches!(
                event,
                LedgerEvent::Paused {
                    reason: crate::PauseReason::InvariantViolation
                }
            ) {
                saw_invariant_pause = true;
            }
        }
        assert!(saw_invariant_pause);
    }

    #[tokio::test]
    async fn test_guarded_primitive_respects_trading_hours() {
        let clock = Arc::new(SimClock::new(NOW));
        let operator = UserKey::from_tag(0xff);
        let user = UserKey::from_tag(0xaa);
        let mut token = InMemoryToken::new();
        token.mint(operator, units(1_000_000));
        let params = LedgerParams {
            withdrawal_cooldown_secs: 0,
            user_daily_cap: Money::ZERO,
            global_daily_cap: Money::ZERO,
            breaker_threshold: Money::ZERO,
            breaker_window_secs: 3_600,
            netting_fee_bps: 0,
        };
        let state = LedgerState::new(params, Box::new(token));
        let mut hours = TradingHoursGuard::always_open();
        // A session that can never match keeps the symbol permanently closed.
        hours.set_sessions(
            "XAU",
            vec![crate::hours::SessionWindow {
                weekday: chrono::Weekday::Mon,
                open_sec: 0,
                close_sec: 0,
            }],
        );
        let (handle, admin, _events, _join) =
            crate::actor::spawn(state, clock, hours, None, 64, 256);

        admin.broker_deposit(operator, units(1_000)).await.unwrap();
        let err = handle
            .credit_pnl(user, units(10), RefId::from_tag(9), Some("XAU".to_string()))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::MarketClosed {
                symbol: "XAU".to_string()
            }
        );
        // The guard ran before the refId was consumed.
        handle
            .credit_pnl(user, units(10), RefId::from_tag(9), None)
            .await
            .unwrap();
    }
}
