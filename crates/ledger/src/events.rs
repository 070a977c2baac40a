//! Typed events emitted by the ledger actor on every state transition.

use crossvault_core::fixed::Money;
use crossvault_core::keys::{RefId, UserKey};
use serde::{Deserialize, Serialize};

/// Why the ledger entered the paused state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PauseReason {
    Admin,
    CircuitBreaker,
    /// Vault balance identity failed; manual intervention required.
    InvariantViolation,
}

/// One money movement or state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    CollateralDeposited {
        user: UserKey,
        amount: Money,
    },
    CollateralWithdrawn {
        user: UserKey,
        amount: Money,
    },
    PnlWithdrawn {
        user: UserKey,
        amount: Money,
    },
    PnlCredited {
        user: UserKey,
        amount: Money,
        ref_id: RefId,
    },
    CollateralSeized {
        user: UserKey,
        amount: Money,
        ref_id: RefId,
    },
    /// A capped seize could not recover the full claim.
    Shortfall {
        user: UserKey,
        shortfall: Money,
        covered_by_insurance: Money,
        socialized: Money,
    },
    BrokerDeposited {
        amount: Money,
    },
    BrokerWithdrawn {
        amount: Money,
    },
    InsuranceDeposited {
        amount: Money,
    },
    InsuranceWithdrawn {
        amount: Money,
    },
    CircuitBreakerTriggered {
        threshold: Money,
    },
    Paused {
        reason: PauseReason,
    },
    Unpaused,
    NetBatchApplied {
        batch_id: RefId,
        leaves: usize,
        fee_collected: Money,
    },
}
