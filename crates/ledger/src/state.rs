//! Ledger state machine.
//!
//! Pure state plus the settlement primitives. Check ordering inside each
//! primitive is contractual: every check runs before any mutation, so a
//! failed primitive leaves the ledger exactly as it found it. The single
//! exception is the circuit breaker, whose trip transitions the ledger to
//! `Paused` while still failing the triggering primitive.

use crate::error::LedgerError;
use crate::events::{LedgerEvent, PauseReason};
use crate::token::StableToken;
use crossvault_core::fixed::Money;
use crossvault_core::keys::{RefId, UserKey};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{error, warn};

const SECS_PER_DAY: u64 = 86_400;

/// Runtime-tunable ledger parameters.
#[derive(Debug, Clone)]
pub struct LedgerParams {
    pub withdrawal_cooldown_secs: u64,
    /// 0 disables the bucket.
    pub user_daily_cap: Money,
    /// 0 disables the bucket.
    pub global_daily_cap: Money,
    /// 0 disables the breaker.
    pub breaker_threshold: Money,
    pub breaker_window_secs: u64,
    pub netting_fee_bps: u64,
}

impl From<&crossvault_core::config::EngineConfig> for LedgerParams {
    fn from(config: &crossvault_core::config::EngineConfig) -> Self {
        Self {
            withdrawal_cooldown_secs: config.withdrawal_cooldown_secs,
            user_daily_cap: config.user_daily_cap,
            global_daily_cap: config.global_daily_cap,
            breaker_threshold: config.circuit_breaker_threshold,
            breaker_window_secs: config.circuit_breaker_window_secs,
            netting_fee_bps: config.netting_fee_bps,
        }
    }
}

/// Operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerStatus {
    Active,
    Paused,
}

/// Result of a capped seizure, including the waterfall split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeizeOutcome {
    pub seized: Money,
    pub shortfall: Money,
    pub covered_by_insurance: Money,
    pub socialized: Money,
}

/// A pending cross-venue obligation awaiting a netting window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obligation {
    pub user: UserKey,
    pub vault_id: String,
    /// Signed 10^6 amount: positive credits the user, negative debits.
    pub amount: i128,
}

/// Direction of one netting leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeafSign {
    Credit,
    Debit,
}

/// One leaf of a netting batch: an unsigned magnitude plus direction,
/// matching the commitment encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetLeaf {
    pub user: UserKey,
    pub amount: Money,
    pub sign: LeafSign,
}

/// Result of applying a netting batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub leaves_applied: usize,
    pub fee_collected: Money,
}

/// Read view of one user's sub-ledgers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBalances {
    pub collateral: Money,
    pub pnl: Money,
    pub last_deposit_at: u64,
}

/// Read view of the shared pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolsView {
    pub broker_pool: Money,
    pub insurance_fund: Money,
    pub socialized_loss: Money,
    pub vault_balance: Money,
}

#[derive(Debug, Clone, Copy, Default)]
struct CapBucket {
    day: u64,
    withdrawn: Money,
}

impl CapBucket {
    fn roll(&mut self, today: u64) {
        if self.day != today {
            self.day = today;
            self.withdrawn = Money::ZERO;
        }
    }

    /// Whether `amount` fits under `cap` today. A zero cap disables the
    /// bucket.
    fn admits(&self, cap: Money, amount: Money) -> bool {
        if cap.is_zero() {
            return true;
        }
        match self.withdrawn.checked_add(amount) {
            Ok(total) => total <= cap,
            Err(_) => false,
        }
    }

    fn charge(&mut self, amount: Money) {
        self.withdrawn = self
            .withdrawn
            .checked_add(amount)
            .unwrap_or(self.withdrawn);
    }
}

/// Rolling settlement-volume window.
#[derive(Debug, Default)]
struct BreakerWindow {
    records: VecDeque<(u64, Money)>,
}

impl BreakerWindow {
    /// Prunes aged records and admits `amount` if the prospective window sum
    /// stays at or below `threshold`. A rejected amount is not recorded: the
    /// settlement it belonged to never happened.
    fn step(
        &mut self,
        now: u64,
        amount: Money,
        threshold: Money,
        window_secs: u64,
    ) -> Result<(), Money> {
        if threshold.is_zero() {
            return Ok(());
        }
        let horizon = now.saturating_sub(window_secs);
        while matches!(self.records.front(), Some((ts, _)) if *ts < horizon) {
            self.records.pop_front();
        }
        let sum_units = self
            .records
            .iter()
            .fold(u128::from(amount.units()), |acc, (_, m)| {
                acc + u128::from(m.units())
            });
        let sum = Money::from_units(u64::try_from(sum_units).unwrap_or(u64::MAX));
        if sum > threshold {
            return Err(sum);
        }
        self.records.push_back((now, amount));
        Ok(())
    }
}

/// The ledger's entire mutable state, including the token port it audits
/// itself against. Owned exclusively by the actor.
pub struct LedgerState {
    params: LedgerParams,
    status: LedgerStatus,
    token: Box<dyn StableToken>,

    collateral: HashMap<UserKey, Money>,
    pnl: HashMap<UserKey, Money>,
    collateral_total: Money,
    pnl_total: Money,
    broker_pool: Money,
    insurance_fund: Money,
    socialized_loss: Money,

    used_ref_ids: HashSet<RefId>,
    last_deposit_at: HashMap<UserKey, u64>,
    user_buckets: HashMap<UserKey, CapBucket>,
    global_bucket: CapBucket,
    breaker: BreakerWindow,
    obligations: Vec<Obligation>,
}

impl LedgerState {
    #[must_use]
    pub fn new(params: LedgerParams, token: Box<dyn StableToken>) -> Self {
        Self {
            params,
            status: LedgerStatus::Active,
            token,
            collateral: HashMap::new(),
            pnl: HashMap::new(),
            collateral_total: Money::ZERO,
            pnl_total: Money::ZERO,
            broker_pool: Money::ZERO,
            insurance_fund: Money::ZERO,
            socialized_loss: Money::ZERO,
            used_ref_ids: HashSet::new(),
            last_deposit_at: HashMap::new(),
            user_buckets: HashMap::new(),
            global_bucket: CapBucket::default(),
            breaker: BreakerWindow::default(),
            obligations: Vec::new(),
        }
    }

    // =========================================================================
    // Views (allowed while paused)
    // =========================================================================

    #[must_use]
    pub fn status(&self) -> LedgerStatus {
        self.status
    }

    #[must_use]
    pub fn user_balances(&self, user: UserKey) -> UserBalances {
        UserBalances {
            collateral: self.collateral.get(&user).copied().unwrap_or(Money::ZERO),
            pnl: self.pnl.get(&user).copied().unwrap_or(Money::ZERO),
            last_deposit_at: self.last_deposit_at.get(&user).copied().unwrap_or(0),
        }
    }

    #[must_use]
    pub fn pools(&self) -> PoolsView {
        PoolsView {
            broker_pool: self.broker_pool,
            insurance_fund: self.insurance_fund,
            socialized_loss: self.socialized_loss,
            vault_balance: self.token.vault_balance(),
        }
    }

    #[must_use]
    pub fn params(&self) -> &LedgerParams {
        &self.params
    }

    /// Vault balance identity: every token the vault holds is attributed to
    /// exactly one sub-ledger or pool.
    ///
    /// # Errors
    /// Returns `(expected, actual)` token units on mismatch.
    pub fn audit(&self) -> Result<(), (Money, Money)> {
        let attributed = u128::from(self.collateral_total.units())
            + u128::from(self.pnl_total.units())
            + u128::from(self.broker_pool.units())
            + u128::from(self.insurance_fund.units());
        let held = u128::from(self.token.vault_balance().units());
        if attributed == held {
            Ok(())
        } else {
            Err((
                Money::from_units(u64::try_from(attributed).unwrap_or(u64::MAX)),
                self.token.vault_balance(),
            ))
        }
    }

    // =========================================================================
    // User primitives
    // =========================================================================

    /// Transfers `amount` in from `user` and credits their collateral.
    pub fn deposit_collateral(
        &mut self,
        user: UserKey,
        amount: Money,
        now: u64,
    ) -> Result<LedgerEvent, LedgerError> {
        self.ensure_active()?;
        Self::ensure_positive(amount)?;
        let new_balance = self.collateral_of(user).checked_add(amount)?;
        let new_total = self.collateral_total.checked_add(amount)?;
        self.token
            .transfer_in(user, amount)
            .map_err(|e| LedgerError::TokenTransfer(e.to_string()))?;
        self.collateral.insert(user, new_balance);
        self.collateral_total = new_total;
        self.last_deposit_at.insert(user, now);
        Ok(LedgerEvent::CollateralDeposited { user, amount })
    }

    /// Withdraws from the collateral sub-ledger, subject to cooldown and
    /// daily caps.
    pub fn withdraw_collateral(
        &mut self,
        user: UserKey,
        amount: Money,
        now: u64,
    ) -> Result<LedgerEvent, LedgerError> {
        self.withdraw_from_sub_ledger(user, amount, now, SubLedger::Collateral)?;
        Ok(LedgerEvent::CollateralWithdrawn { user, amount })
    }

    /// Withdraws from the PnL sub-ledger, subject to cooldown and daily
    /// caps. This is the only primitive that reduces `pnl` besides netting
    /// debit leaves.
    pub fn withdraw_pnl(
        &mut self,
        user: UserKey,
        amount: Money,
        now: u64,
    ) -> Result<LedgerEvent, LedgerError> {
        self.withdraw_from_sub_ledger(user, amount, now, SubLedger::Pnl)?;
        Ok(LedgerEvent::PnlWithdrawn { user, amount })
    }

    // =========================================================================
    // Settlement primitives
    // =========================================================================

    /// Credits realized PnL out of the broker pool.
    ///
    /// Check order is contractual: amount > 0, refId unused, pool covers,
    /// breaker admits, then the refId is consumed and balances move.
    pub fn credit_pnl(
        &mut self,
        user: UserKey,
        amount: Money,
        ref_id: RefId,
        now: u64,
    ) -> Result<LedgerEvent, LedgerError> {
        self.ensure_active()?;
        Self::ensure_positive(amount)?;
        self.ensure_ref_unused(ref_id)?;
        let new_pool =
            self.broker_pool
                .checked_sub(amount)
                .map_err(|_| LedgerError::InsufficientBrokerPool {
                    available: self.broker_pool,
                })?;
        let new_pnl = self.pnl_of(user).checked_add(amount)?;
        let new_total = self.pnl_total.checked_add(amount)?;
        self.breaker_step(now, amount)?;
        self.used_ref_ids.insert(ref_id);
        self.broker_pool = new_pool;
        self.pnl.insert(user, new_pnl);
        self.pnl_total = new_total;
        Ok(LedgerEvent::PnlCredited {
            user,
            amount,
            ref_id,
        })
    }

    /// Seizes collateral into the broker pool; fails if the user cannot
    /// cover the full amount.
    pub fn seize_collateral(
        &mut self,
        user: UserKey,
        amount: Money,
        ref_id: RefId,
        now: u64,
    ) -> Result<LedgerEvent, LedgerError> {
        self.ensure_active()?;
        Self::ensure_positive(amount)?;
        self.ensure_ref_unused(ref_id)?;
        let balance = self.collateral_of(user);
        let new_balance =
            balance
                .checked_sub(amount)
                .map_err(|_| LedgerError::InsufficientCollateral {
                    available: balance,
                })?;
        let new_pool = self.broker_pool.checked_add(amount)?;
        let new_total = self.collateral_total.checked_sub(amount)?;
        self.breaker_step(now, amount)?;
        self.used_ref_ids.insert(ref_id);
        self.collateral.insert(user, new_balance);
        self.collateral_total = new_total;
        self.broker_pool = new_pool;
        Ok(LedgerEvent::CollateralSeized {
            user,
            amount,
            ref_id,
        })
    }

    /// Seizes up to `requested`, then runs the insurance waterfall on the
    /// shortfall. The reference id is consumed even when nothing could be
    /// seized; `seized + shortfall == requested` always holds.
    pub fn seize_collateral_capped(
        &mut self,
        user: UserKey,
        requested: Money,
        ref_id: RefId,
        now: u64,
    ) -> Result<(SeizeOutcome, Vec<LedgerEvent>), LedgerError> {
        self.ensure_active()?;
        Self::ensure_positive(requested)?;
        self.ensure_ref_unused(ref_id)?;

        let balance = self.collateral_of(user);
        let seized = balance.min(requested);
        let shortfall = requested.checked_sub(seized)?;
        let covered_by_insurance = self.insurance_fund.min(shortfall);
        let socialized = shortfall.checked_sub(covered_by_insurance)?;
        let moved = seized.checked_add(covered_by_insurance)?;

        let new_pool = self.broker_pool.checked_add(moved)?;
        let new_socialized = self.socialized_loss.checked_add(socialized)?;
        if !moved.is_zero() {
            self.breaker_step(now, moved)?;
        }

        self.used_ref_ids.insert(ref_id);
        self.collateral.insert(user, balance.checked_sub(seized)?);
        self.collateral_total = self.collateral_total.checked_sub(seized)?;
        self.insurance_fund = self.insurance_fund.checked_sub(covered_by_insurance)?;
        self.broker_pool = new_pool;
        self.socialized_loss = new_socialized;

        let outcome = SeizeOutcome {
            seized,
            shortfall,
            covered_by_insurance,
            socialized,
        };
        let mut events = vec![LedgerEvent::CollateralSeized {
            user,
            amount: seized,
            ref_id,
        }];
        if !shortfall.is_zero() {
            warn!(
                user = %user,
                shortfall = %shortfall,
                covered = %covered_by_insurance,
                socialized = %socialized,
                "seizure shortfall"
            );
            events.push(LedgerEvent::Shortfall {
                user,
                shortfall,
                covered_by_insurance,
                socialized,
            });
        }
        Ok((outcome, events))
    }

    // =========================================================================
    // Broker and insurance primitives (admin; allowed while paused)
    // =========================================================================

    pub fn broker_deposit(
        &mut self,
        from: UserKey,
        amount: Money,
    ) -> Result<LedgerEvent, LedgerError> {
        Self::ensure_positive(amount)?;
        let new_pool = self.broker_pool.checked_add(amount)?;
        self.token
            .transfer_in(from, amount)
            .map_err(|e| LedgerError::TokenTransfer(e.to_string()))?;
        self.broker_pool = new_pool;
        Ok(LedgerEvent::BrokerDeposited { amount })
    }

    pub fn broker_withdraw(
        &mut self,
        to: UserKey,
        amount: Money,
    ) -> Result<LedgerEvent, LedgerError> {
        Self::ensure_positive(amount)?;
        let new_pool =
            self.broker_pool
                .checked_sub(amount)
                .map_err(|_| LedgerError::InsufficientBrokerPool {
                    available: self.broker_pool,
                })?;
        self.token
            .transfer_out(to, amount)
            .map_err(|e| LedgerError::TokenTransfer(e.to_string()))?;
        self.broker_pool = new_pool;
        Ok(LedgerEvent::BrokerWithdrawn { amount })
    }

    pub fn insurance_deposit(
        &mut self,
        from: UserKey,
        amount: Money,
    ) -> Result<LedgerEvent, LedgerError> {
        Self::ensure_positive(amount)?;
        let new_fund = self.insurance_fund.checked_add(amount)?;
        self.token
            .transfer_in(from, amount)
            .map_err(|e| LedgerError::TokenTransfer(e.to_string()))?;
        self.insurance_fund = new_fund;
        Ok(LedgerEvent::InsuranceDeposited { amount })
    }

    pub fn insurance_withdraw(
        &mut self,
        to: UserKey,
        amount: Money,
    ) -> Result<LedgerEvent, LedgerError> {
        Self::ensure_positive(amount)?;
        let new_fund = self.insurance_fund.checked_sub(amount).map_err(|_| {
            LedgerError::InsufficientInsuranceFund {
                available: self.insurance_fund,
            }
        })?;
        self.token
            .transfer_out(to, amount)
            .map_err(|e| LedgerError::TokenTransfer(e.to_string()))?;
        self.insurance_fund = new_fund;
        Ok(LedgerEvent::InsuranceWithdrawn { amount })
    }

    // =========================================================================
    // Obligations and netting batches
    // =========================================================================

    pub fn enqueue_obligation(&mut self, obligation: Obligation) -> Result<(), LedgerError> {
        self.ensure_active()?;
        if obligation.amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        self.obligations.push(obligation);
        Ok(())
    }

    #[must_use]
    pub fn drain_obligations(&mut self) -> Vec<Obligation> {
        std::mem::take(&mut self.obligations)
    }

    /// Applies one netting batch atomically. The batch id is consumed
    /// through the reference-id set, so a replay of the same `(root, nonce)`
    /// fails with `DuplicateRefId`. Debit leaves reduce user PnL into the
    /// broker pool; credit leaves draw on it, minus the netting fee paid to
    /// the insurance fund.
    pub fn apply_net_batch(
        &mut self,
        batch_id: RefId,
        leaves: &[NetLeaf],
        _now: u64,
    ) -> Result<(BatchOutcome, LedgerEvent), LedgerError> {
        self.ensure_active()?;
        self.ensure_ref_unused(batch_id)?;

        // Validate every leaf before mutating anything.
        let mut total_credit = Money::ZERO;
        let mut total_debit = Money::ZERO;
        for leaf in leaves {
            Self::ensure_positive(leaf.amount)?;
            match leaf.sign {
                LeafSign::Credit => total_credit = total_credit.checked_add(leaf.amount)?,
                LeafSign::Debit => {
                    let available = self.pnl_of(leaf.user);
                    if available < leaf.amount {
                        return Err(LedgerError::InsufficientPnl { available });
                    }
                    total_debit = total_debit.checked_add(leaf.amount)?;
                }
            }
        }
        let funded = self.broker_pool.checked_add(total_debit)?;
        if funded < total_credit {
            return Err(LedgerError::InsufficientBrokerPool {
                available: self.broker_pool,
            });
        }

        self.used_ref_ids.insert(batch_id);
        let mut fee_collected = Money::ZERO;
        for leaf in leaves {
            match leaf.sign {
                LeafSign::Credit => {
                    let fee = leaf.amount.mul_bps(self.params.netting_fee_bps)?;
                    let net = leaf.amount.checked_sub(fee)?;
                    let new_pnl = self.pnl_of(leaf.user).checked_add(net)?;
                    self.pnl.insert(leaf.user, new_pnl);
                    self.pnl_total = self.pnl_total.checked_add(net)?;
                    self.insurance_fund = self.insurance_fund.checked_add(fee)?;
                    self.broker_pool = self.broker_pool.checked_sub(leaf.amount)?;
                    fee_collected = fee_collected.checked_add(fee)?;
                }
                LeafSign::Debit => {
                    let new_pnl = self.pnl_of(leaf.user).checked_sub(leaf.amount)?;
                    self.pnl.insert(leaf.user, new_pnl);
                    self.pnl_total = self.pnl_total.checked_sub(leaf.amount)?;
                    self.broker_pool = self.broker_pool.checked_add(leaf.amount)?;
                }
            }
        }

        let outcome = BatchOutcome {
            leaves_applied: leaves.len(),
            fee_collected,
        };
        let event = LedgerEvent::NetBatchApplied {
            batch_id,
            leaves: leaves.len(),
            fee_collected,
        };
        Ok((outcome, event))
    }

    // =========================================================================
    // Admin
    // =========================================================================

    /// Pauses the ledger. Idempotent.
    pub fn pause(&mut self, reason: PauseReason) -> LedgerEvent {
        if self.status == LedgerStatus::Paused {
            return LedgerEvent::Paused { reason };
        }
        self.status = LedgerStatus::Paused;
        warn!(?reason, "ledger paused");
        LedgerEvent::Paused { reason }
    }

    /// Resumes normal operation.
    pub fn unpause(&mut self) -> LedgerEvent {
        self.status = LedgerStatus::Active;
        LedgerEvent::Unpaused
    }

    pub fn set_withdrawal_cooldown(&mut self, secs: u64) {
        self.params.withdrawal_cooldown_secs = secs;
    }

    pub fn set_daily_caps(&mut self, user_cap: Money, global_cap: Money) {
        self.params.user_daily_cap = user_cap;
        self.params.global_daily_cap = global_cap;
    }

    pub fn set_breaker(&mut self, threshold: Money, window_secs: u64) {
        self.params.breaker_threshold = threshold;
        self.params.breaker_window_secs = window_secs;
    }

    pub fn set_netting_fee_bps(&mut self, bps: u64) {
        self.params.netting_fee_bps = bps;
    }

    /// Marks the ledger as irrecoverably inconsistent after a failed audit.
    pub fn record_audit_failure(&mut self, expected: Money, actual: Money) -> LedgerEvent {
        error!(
            expected = %expected,
            actual = %actual,
            "vault balance identity violated; pausing"
        );
        self.pause(PauseReason::InvariantViolation)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn ensure_active(&self) -> Result<(), LedgerError> {
        match self.status {
            LedgerStatus::Active => Ok(()),
            LedgerStatus::Paused => Err(LedgerError::Paused),
        }
    }

    fn ensure_positive(amount: Money) -> Result<(), LedgerError> {
        if amount.is_zero() {
            Err(LedgerError::ZeroAmount)
        } else {
            Ok(())
        }
    }

    fn ensure_ref_unused(&self, ref_id: RefId) -> Result<(), LedgerError> {
        if self.used_ref_ids.contains(&ref_id) {
            Err(LedgerError::DuplicateRefId)
        } else {
            Ok(())
        }
    }

    fn collateral_of(&self, user: UserKey) -> Money {
        self.collateral.get(&user).copied().unwrap_or(Money::ZERO)
    }

    fn pnl_of(&self, user: UserKey) -> Money {
        self.pnl.get(&user).copied().unwrap_or(Money::ZERO)
    }

    /// Runs the circuit-breaker step; a trip pauses the ledger and fails the
    /// primitive.
    fn breaker_step(&mut self, now: u64, amount: Money) -> Result<(), LedgerError> {
        match self.breaker.step(
            now,
            amount,
            self.params.breaker_threshold,
            self.params.breaker_window_secs,
        ) {
            Ok(()) => Ok(()),
            Err(window_sum) => {
                warn!(
                    window_sum = %window_sum,
                    threshold = %self.params.breaker_threshold,
                    "settlement volume circuit breaker tripped"
                );
                self.status = LedgerStatus::Paused;
                Err(LedgerError::CircuitBreakerTriggered)
            }
        }
    }

    /// The last window sum that tripped, for event reporting.
    #[must_use]
    pub fn breaker_threshold(&self) -> Money {
        self.params.breaker_threshold
    }

    fn withdraw_from_sub_ledger(
        &mut self,
        user: UserKey,
        amount: Money,
        now: u64,
        ledger: SubLedger,
    ) -> Result<(), LedgerError> {
        self.ensure_active()?;
        Self::ensure_positive(amount)?;

        let balance = match ledger {
            SubLedger::Collateral => self.collateral_of(user),
            SubLedger::Pnl => self.pnl_of(user),
        };
        let new_balance = balance.checked_sub(amount).map_err(|_| match ledger {
            SubLedger::Collateral => LedgerError::InsufficientCollateral { available: balance },
            SubLedger::Pnl => LedgerError::InsufficientPnl { available: balance },
        })?;

        if self.params.withdrawal_cooldown_secs > 0 {
            let deposited_at = self.last_deposit_at.get(&user).copied().unwrap_or(0);
            let elapsed = now.saturating_sub(deposited_at);
            if elapsed < self.params.withdrawal_cooldown_secs {
                return Err(LedgerError::WithdrawalCooldownActive {
                    remaining_secs: self.params.withdrawal_cooldown_secs - elapsed,
                });
            }
        }

        let today = now / SECS_PER_DAY;
        let user_bucket = self.user_buckets.entry(user).or_default();
        user_bucket.roll(today);
        if !user_bucket.admits(self.params.user_daily_cap, amount) {
            return Err(LedgerError::ExceedsUserDailyCap);
        }
        self.global_bucket.roll(today);
        if !self.global_bucket.admits(self.params.global_daily_cap, amount) {
            return Err(LedgerError::ExceedsGlobalDailyCap);
        }

        self.token
            .transfer_out(user, amount)
            .map_err(|e| LedgerError::TokenTransfer(e.to_string()))?;
        match ledger {
            SubLedger::Collateral => {
                self.collateral.insert(user, new_balance);
                self.collateral_total = self.collateral_total.checked_sub(amount)?;
            }
            SubLedger::Pnl => {
                self.pnl.insert(user, new_balance);
                self.pnl_total = self.pnl_total.checked_sub(amount)?;
            }
        }
        self.user_buckets.entry(user).or_default().charge(amount);
        self.global_bucket.charge(amount);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum SubLedger {
    Collateral,
    Pnl,
}
