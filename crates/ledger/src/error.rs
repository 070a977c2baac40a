//! Ledger error surface.

use crossvault_core::fixed::{FixedPointError, Money};
use crossvault_oracle::OracleError;
use thiserror::Error;

/// Failures returned by ledger primitives. Validation errors leave state
/// untouched; `DuplicateRefId` is proof the operation already succeeded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("amount must be positive")]
    ZeroAmount,

    #[error("insufficient collateral: {available} available")]
    InsufficientCollateral { available: Money },

    #[error("insufficient pnl balance: {available} available")]
    InsufficientPnl { available: Money },

    #[error("insufficient broker pool: {available} available")]
    InsufficientBrokerPool { available: Money },

    #[error("insufficient insurance fund: {available} available")]
    InsufficientInsuranceFund { available: Money },

    #[error("reference id already consumed")]
    DuplicateRefId,

    #[error("withdrawal cooldown active: {remaining_secs}s remaining")]
    WithdrawalCooldownActive { remaining_secs: u64 },

    #[error("exceeds per-user daily withdrawal cap")]
    ExceedsUserDailyCap,

    #[error("exceeds global daily withdrawal cap")]
    ExceedsGlobalDailyCap,

    #[error("settlement volume circuit breaker triggered")]
    CircuitBreakerTriggered,

    #[error("ledger is paused")]
    Paused,

    #[error("market closed for {symbol}")]
    MarketClosed { symbol: String },

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error("stable token transfer failed: {0}")]
    TokenTransfer(String),

    #[error("arithmetic overflow in ledger computation")]
    Arithmetic,

    #[error("ledger actor has shut down")]
    ChannelClosed,
}

impl From<FixedPointError> for LedgerError {
    fn from(_: FixedPointError) -> Self {
        // Explicit balance checks precede arithmetic, so any residual
        // failure is an overflow-class fault.
        Self::Arithmetic
    }
}

impl LedgerError {
    /// Whether a settlement job hitting this error should be retried later
    /// rather than parked for the operator.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Paused
                | Self::CircuitBreakerTriggered
                | Self::MarketClosed { .. }
                | Self::Oracle(_)
                | Self::TokenTransfer(_)
                | Self::ChannelClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(LedgerError::Paused.is_transient());
        assert!(LedgerError::CircuitBreakerTriggered.is_transient());
        assert!(!LedgerError::DuplicateRefId.is_transient());
        assert!(!LedgerError::ZeroAmount.is_transient());
        assert!(!LedgerError::InsufficientCollateral {
            available: Money::ZERO
        }
        .is_transient());
    }
}
