//! Request messages accepted by the ledger actor.

use crate::error::LedgerError;
use crate::state::{
    BatchOutcome, LedgerStatus, NetLeaf, Obligation, PoolsView, SeizeOutcome, UserBalances,
};
use crossvault_core::fixed::Money;
use crossvault_core::keys::{RefId, UserKey};
use tokio::sync::oneshot;

type Reply<T> = oneshot::Sender<Result<T, LedgerError>>;

/// Runtime parameter updates applied by the admin surface.
#[derive(Debug, Clone)]
pub enum ParamUpdate {
    WithdrawalCooldown(u64),
    DailyCaps { user: Money, global: Money },
    Breaker { threshold: Money, window_secs: u64 },
    NettingFeeBps(u64),
}

/// One request to the ledger actor. Replies travel back on oneshot channels;
/// the actor applies commands strictly in receipt order.
#[derive(Debug)]
pub enum LedgerCommand {
    DepositCollateral {
        user: UserKey,
        amount: Money,
        reply: Reply<()>,
    },
    WithdrawCollateral {
        user: UserKey,
        amount: Money,
        reply: Reply<()>,
    },
    WithdrawPnl {
        user: UserKey,
        amount: Money,
        reply: Reply<()>,
    },
    CreditPnl {
        user: UserKey,
        amount: Money,
        ref_id: RefId,
        /// When set, trading hours and oracle validity gate the primitive.
        symbol: Option<String>,
        reply: Reply<()>,
    },
    SeizeCollateral {
        user: UserKey,
        amount: Money,
        ref_id: RefId,
        symbol: Option<String>,
        reply: Reply<()>,
    },
    SeizeCollateralCapped {
        user: UserKey,
        requested: Money,
        ref_id: RefId,
        reply: Reply<SeizeOutcome>,
    },
    BrokerDeposit {
        from: UserKey,
        amount: Money,
        reply: Reply<()>,
    },
    BrokerWithdraw {
        to: UserKey,
        amount: Money,
        reply: Reply<()>,
    },
    InsuranceDeposit {
        from: UserKey,
        amount: Money,
        reply: Reply<()>,
    },
    InsuranceWithdraw {
        to: UserKey,
        amount: Money,
        reply: Reply<()>,
    },
    EnqueueObligation {
        obligation: Obligation,
        reply: Reply<()>,
    },
    DrainObligations {
        reply: oneshot::Sender<Vec<Obligation>>,
    },
    ApplyNetBatch {
        batch_id: RefId,
        leaves: Vec<NetLeaf>,
        reply: Reply<BatchOutcome>,
    },
    Pause {
        reply: oneshot::Sender<()>,
    },
    Unpause {
        reply: oneshot::Sender<()>,
    },
    SetParams {
        update: ParamUpdate,
        reply: oneshot::Sender<()>,
    },
    GetUser {
        user: UserKey,
        reply: oneshot::Sender<UserBalances>,
    },
    GetPools {
        reply: oneshot::Sender<PoolsView>,
    },
    GetStatus {
        reply: oneshot::Sender<LedgerStatus>,
    },
}
