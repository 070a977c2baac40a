//! The operator surface.
//!
//! Thin async facade over the admin handles of the ledger, equity engine,
//! and oracle. Authorization is capability-based: holding an `AdminApi` is
//! the permission.

use anyhow::Result;
use crossvault_core::fixed::Money;
use crossvault_core::keys::UserKey;
use crossvault_equity::{EquityCommand, EquityHandle, TriggerReason};
use crossvault_ledger::{AdminHandle, ParamUpdate};
use crossvault_oracle::{PriceOracle, SymbolConfig};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AdminApi {
    ledger: AdminHandle,
    equity: EquityHandle,
    oracle: Arc<PriceOracle>,
}

impl AdminApi {
    #[must_use]
    pub fn new(ledger: AdminHandle, equity: EquityHandle, oracle: Arc<PriceOracle>) -> Self {
        Self {
            ledger,
            equity,
            oracle,
        }
    }

    /// # Errors
    /// Fails if the ledger actor is unreachable.
    pub async fn pause(&self) -> Result<()> {
        info!("operator pause");
        self.ledger.pause().await?;
        Ok(())
    }

    /// # Errors
    /// Fails if the ledger actor is unreachable.
    pub async fn unpause(&self) -> Result<()> {
        info!("operator unpause");
        self.ledger.unpause().await?;
        Ok(())
    }

    /// # Errors
    /// Fails if the equity engine has shut down.
    pub async fn set_haircut_bps(&self, bps: u64) -> Result<()> {
        self.equity.send(EquityCommand::SetHaircutBps(bps)).await?;
        Ok(())
    }

    /// Forces an equity recomputation for one user.
    ///
    /// # Errors
    /// Fails if the equity engine has shut down.
    pub async fn recompute_user(&self, user: UserKey) -> Result<()> {
        self.equity.trigger(user, TriggerReason::Operator).await?;
        Ok(())
    }

    /// # Errors
    /// Fails if the equity engine has shut down.
    pub async fn set_trigger_threshold(&self, instrument: &str, bps: u64) -> Result<()> {
        self.equity
            .send(EquityCommand::SetTriggerThreshold {
                instrument: instrument.to_string(),
                bps,
            })
            .await?;
        Ok(())
    }

    /// # Errors
    /// Fails if the ledger actor is unreachable.
    pub async fn set_daily_caps(&self, user: Money, global: Money) -> Result<()> {
        self.ledger
            .set_params(ParamUpdate::DailyCaps { user, global })
            .await?;
        Ok(())
    }

    /// # Errors
    /// Fails if the ledger actor is unreachable.
    pub async fn set_withdrawal_cooldown(&self, secs: u64) -> Result<()> {
        self.ledger
            .set_params(ParamUpdate::WithdrawalCooldown(secs))
            .await?;
        Ok(())
    }

    /// # Errors
    /// Fails if the ledger actor is unreachable.
    pub async fn set_circuit_breaker(&self, threshold: Money, window_secs: u64) -> Result<()> {
        self.ledger
            .set_params(ParamUpdate::Breaker {
                threshold,
                window_secs,
            })
            .await?;
        Ok(())
    }

    /// # Errors
    /// Fails if the ledger actor is unreachable.
    pub async fn set_netting_fee_bps(&self, bps: u64) -> Result<()> {
        self.ledger
            .set_params(ParamUpdate::NettingFeeBps(bps))
            .await?;
        Ok(())
    }

    /// # Errors
    /// Fails for an unconfigured symbol.
    pub fn set_oracle_params(&self, symbol: &str, config: SymbolConfig) -> Result<()> {
        self.oracle.set_params(symbol, config)?;
        Ok(())
    }

    /// Operator-driven reference/last-valid refresh.
    ///
    /// # Errors
    /// Propagates oracle fetch/validation failures.
    pub async fn refresh_reference(&self, symbol: &str) -> Result<()> {
        self.oracle.refresh_reference(symbol).await?;
        Ok(())
    }

    /// # Errors
    /// Propagates token transfer failures.
    pub async fn insurance_deposit(&self, from: UserKey, amount: Money) -> Result<()> {
        self.ledger.insurance_deposit(from, amount).await?;
        Ok(())
    }

    /// # Errors
    /// Fails when the fund cannot cover the amount.
    pub async fn insurance_withdraw(&self, to: UserKey, amount: Money) -> Result<()> {
        self.ledger.insurance_withdraw(to, amount).await?;
        Ok(())
    }

    /// # Errors
    /// Propagates token transfer failures.
    pub async fn broker_deposit(&self, from: UserKey, amount: Money) -> Result<()> {
        self.ledger.broker_deposit(from, amount).await?;
        Ok(())
    }

    /// # Errors
    /// Fails when the pool cannot cover the amount.
    pub async fn broker_withdraw(&self, to: UserKey, amount: Money) -> Result<()> {
        self.ledger.broker_withdraw(to, amount).await?;
        Ok(())
    }
}
