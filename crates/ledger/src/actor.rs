//! The ledger actor: single owner of all monetary state.

use crate::commands::{LedgerCommand, ParamUpdate};
use crate::error::LedgerError;
use crate::events::{LedgerEvent, PauseReason};
use crate::handle::{AdminHandle, LedgerHandle};
use crate::hours::TradingHoursGuard;
use crate::state::LedgerState;
use crossvault_core::bus::EventBus;
use crossvault_core::clock::SharedClock;
use crossvault_oracle::PriceOracle;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Spawns the ledger actor and returns its handles, the event stream, and
/// the task join handle.
#[must_use]
pub fn spawn(
    state: LedgerState,
    clock: SharedClock,
    hours: TradingHoursGuard,
    oracle: Option<Arc<PriceOracle>>,
    inbox_capacity: usize,
    event_capacity: usize,
) -> (
    LedgerHandle,
    AdminHandle,
    mpsc::Receiver<LedgerEvent>,
    JoinHandle<()>,
) {
    let (tx, rx) = mpsc::channel(inbox_capacity);
    let (events, events_rx) = EventBus::channel(event_capacity);
    let actor = LedgerActor {
        state,
        clock,
        hours,
        oracle,
        events,
        rx,
    };
    let join = tokio::spawn(actor.run());
    (
        LedgerHandle::new(tx.clone()),
        AdminHandle::new(tx),
        events_rx,
        join,
    )
}

/// Owns `LedgerState` and applies commands in receipt order. Within one
/// command all checks run before any mutation; across commands the inbox
/// gives a total order over money movements.
pub struct LedgerActor {
    state: LedgerState,
    clock: SharedClock,
    hours: TradingHoursGuard,
    oracle: Option<Arc<PriceOracle>>,
    events: EventBus<LedgerEvent>,
    rx: mpsc::Receiver<LedgerCommand>,
}

impl LedgerActor {
    pub async fn run(mut self) {
        info!("ledger actor started");
        while let Some(cmd) = self.rx.recv().await {
            self.handle(cmd).await;
        }
        info!("ledger actor stopped");
    }

    async fn handle(&mut self, cmd: LedgerCommand) {
        let now = self.clock.now();
        match cmd {
            LedgerCommand::DepositCollateral {
                user,
                amount,
                reply,
            } => {
                let result = self.state.deposit_collateral(user, amount, now);
                self.finish_mutation(result.map(|e| ((), vec![e])), reply)
                    .await;
            }
            LedgerCommand::WithdrawCollateral {
                user,
                amount,
                reply,
            } => {
                let result = self.state.withdraw_collateral(user, amount, now);
                self.finish_mutation(result.map(|e| ((), vec![e])), reply)
                    .await;
            }
            LedgerCommand::WithdrawPnl {
                user,
                amount,
                reply,
            } => {
                let result = self.state.withdraw_pnl(user, amount, now);
                self.finish_mutation(result.map(|e| ((), vec![e])), reply)
                    .await;
            }
            LedgerCommand::CreditPnl {
                user,
                amount,
                ref_id,
                symbol,
                reply,
            } => {
                let result = match self.guard(symbol.as_deref(), now).await {
                    Ok(()) => self.state.credit_pnl(user, amount, ref_id, now),
                    Err(e) => Err(e),
                };
                self.finish_mutation(result.map(|e| ((), vec![e])), reply)
                    .await;
            }
            LedgerCommand::SeizeCollateral {
                user,
                amount,
                ref_id,
                symbol,
                reply,
            } => {
                let result = match self.guard(symbol.as_deref(), now).await {
                    Ok(()) => self.state.seize_collateral(user, amount, ref_id, now),
                    Err(e) => Err(e),
                };
                self.finish_mutation(result.map(|e| ((), vec![e])), reply)
                    .await;
            }
            LedgerCommand::SeizeCollateralCapped {
                user,
                requested,
                ref_id,
                reply,
            } => {
                let result = self.state.seize_collateral_capped(user, requested, ref_id, now);
                self.finish_mutation(result, reply).await;
            }
            LedgerCommand::BrokerDeposit { from, amount, reply } => {
                let result = self.state.broker_deposit(from, amount);
                self.finish_mutation(result.map(|e| ((), vec![e])), reply)
                    .await;
            }
            LedgerCommand::BrokerWithdraw { to, amount, reply } => {
                let result = self.state.broker_withdraw(to, amount);
                self.finish_mutation(result.map(|e| ((), vec![e])), reply)
                    .await;
            }
            LedgerCommand::InsuranceDeposit { from, amount, reply } => {
                let result = self.state.insurance_deposit(from, amount);
                self.finish_mutation(result.map(|e| ((), vec![e])), reply)
                    .await;
            }
            LedgerCommand::InsuranceWithdraw { to, amount, reply } => {
                let result = self.state.insurance_withdraw(to, amount);
                self.finish_mutation(result.map(|e| ((), vec![e])), reply)
                    .await;
            }
            LedgerCommand::EnqueueObligation { obligation, reply } => {
                let _ = reply.send(self.state.enqueue_obligation(obligation));
            }
            LedgerCommand::DrainObligations { reply } => {
                let _ = reply.send(self.state.drain_obligations());
            }
            LedgerCommand::ApplyNetBatch {
                batch_id,
                leaves,
                reply,
            } => {
                let result = self
                    .state
                    .apply_net_batch(batch_id, &leaves, now)
                    .map(|(outcome, event)| (outcome, vec![event]));
                self.finish_mutation(result, reply).await;
            }
            LedgerCommand::Pause { reply } => {
                let event = self.state.pause(PauseReason::Admin);
                self.emit(event).await;
                let _ = reply.send(());
            }
            LedgerCommand::Unpause { reply } => {
                let event = self.state.unpause();
                self.emit(event).await;
                let _ = reply.send(());
            }
            LedgerCommand::SetParams { update, reply } => {
                debug!(?update, "ledger params updated");
                match update {
                    ParamUpdate::WithdrawalCooldown(secs) => {
                        self.state.set_withdrawal_cooldown(secs);
                    }
                    ParamUpdate::DailyCaps { user, global } => {
                        self.state.set_daily_caps(user, global);
                    }
                    ParamUpdate::Breaker {
                        threshold,
                        window_secs,
                    } => self.state.set_breaker(threshold, window_secs),
                    ParamUpdate::NettingFeeBps(bps) => self.state.set_netting_fee_bps(bps),
                }
                let _ = reply.send(());
            }
            LedgerCommand::GetUser { user, reply } => {
                let _ = reply.send(self.state.user_balances(user));
            }
            LedgerCommand::GetPools { reply } => {
                let _ = reply.send(self.state.pools());
            }
            LedgerCommand::GetStatus { reply } => {
                let _ = reply.send(self.state.status());
            }
        }
    }

    /// Trading-hours and oracle gate for guarded settlement primitives.
    /// Runs before any refId insertion or state mutation.
    async fn guard(&self, symbol: Option<&str>, now: u64) -> Result<(), LedgerError> {
        let Some(symbol) = symbol else {
            return Ok(());
        };
        if !self.hours.is_open(symbol, now) {
            return Err(LedgerError::MarketClosed {
                symbol: symbol.to_string(),
            });
        }
        if let Some(oracle) = &self.oracle {
            oracle.get_validated_price(symbol).await?;
        }
        Ok(())
    }

    /// Emits events for a completed primitive, replies to the caller, and
    /// audits the vault identity after every successful mutation. A breaker
    /// trip additionally publishes the pause transition.
    async fn finish_mutation<T>(
        &mut self,
        result: Result<(T, Vec<LedgerEvent>), LedgerError>,
        reply: tokio::sync::oneshot::Sender<Result<T, LedgerError>>,
    ) {
        match result {
            Ok((value, events)) => {
                for event in events {
                    self.emit(event).await;
                }
                if let Err((expected, actual)) = self.state.audit() {
                    let event = self.state.record_audit_failure(expected, actual);
                    self.emit(event).await;
                }
                let _ = reply.send(Ok(value));
            }
            Err(e) => {
                if e == LedgerError::CircuitBreakerTriggered {
                    self.emit(LedgerEvent::CircuitBreakerTriggered {
                        threshold: self.state.breaker_threshold(),
                    })
                    .await;
                    self.emit(LedgerEvent::Paused {
                        reason: PauseReason::CircuitBreaker,
                    })
                    .await;
                }
                let _ = reply.send(Err(e));
            }
        }
    }

    async fn emit(&self, event: LedgerEvent) {
        if self.events.publish(event).await.is_err() {
            debug!("ledger event stream closed");
        }
    }
}
