//! Cross-venue netting.
//!
//! Drains pending obligations from the ledger, computes the multilateral net
//! per `(vault, user)`, commits to the net set with a keccak Merkle root, and
//! submits one atomic batch per vault. The batch id is derived from
//! `(root, nonce)` and consumed through the ledger's reference-id set, so a
//! replayed batch cannot apply twice.

use crate::merkle::{leaf_hash, merkle_root};
use crossvault_core::fixed::Money;
use crossvault_core::keys::{batch_ref_id, RefId, UserKey};
use crossvault_ledger::{LeafSign, LedgerError, LedgerHandle, NetLeaf, Obligation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

/// Netting failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NettingError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("net amount overflow for vault {vault_id}")]
    Overflow { vault_id: String },
}

/// Outcome of one vault's batch in a netting window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NettingReport {
    pub vault_id: String,
    pub batch_id: RefId,
    pub root: [u8; 32],
    pub leaves: usize,
    /// Sum of obligation magnitudes before netting.
    pub gross_volume: Money,
    /// Sum of net magnitudes actually settled.
    pub netted_volume: Money,
    /// `gross − netted`.
    pub savings: Money,
    pub fee_collected: Money,
}

/// Periodically invoked netting executor. One instance owns the nonce
/// sequence; batches from the same engine never collide.
pub struct NettingEngine {
    ledger: LedgerHandle,
    nonce: u64,
}

impl NettingEngine {
    #[must_use]
    pub fn new(ledger: LedgerHandle) -> Self {
        Self { ledger, nonce: 0 }
    }

    /// Runs one netting window: drain, net, commit, submit. A vault whose
    /// batch fails has its original obligations re-enqueued for the next
    /// window.
    ///
    /// # Errors
    /// Fails only when the ledger actor is unreachable; per-vault batch
    /// failures are absorbed into re-enqueueing.
    pub async fn run_window(&mut self) -> Result<Vec<NettingReport>, NettingError> {
        let obligations = self.ledger.drain_obligations().await?;
        if obligations.is_empty() {
            return Ok(Vec::new());
        }

        // Group raw obligations by vault, preserving them for re-enqueue on
        // failure.
        let mut vaults: BTreeMap<String, Vec<Obligation>> = BTreeMap::new();
        for obligation in obligations {
            vaults
                .entry(obligation.vault_id.clone())
                .or_default()
                .push(obligation);
        }

        let mut reports = Vec::new();
        for (vault_id, raw) in vaults {
            match self.settle_vault(&vault_id, &raw).await {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        vault_id = %vault_id,
                        error = %e,
                        "vault batch failed; re-enqueueing obligations"
                    );
                    for obligation in raw {
                        if let Err(requeue) = self.ledger.enqueue_obligation(obligation).await {
                            warn!(error = %requeue, "obligation re-enqueue failed");
                        }
                    }
                }
            }
        }
        Ok(reports)
    }

    async fn settle_vault(
        &mut self,
        vault_id: &str,
        raw: &[Obligation],
    ) -> Result<Option<NettingReport>, NettingError> {
        let mut nets: BTreeMap<UserKey, i128> = BTreeMap::new();
        let mut gross: u128 = 0;
        for obligation in raw {
            gross += obligation.amount.unsigned_abs();
            let entry = nets.entry(obligation.user).or_insert(0);
            *entry = entry
                .checked_add(obligation.amount)
                .ok_or_else(|| NettingError::Overflow {
                    vault_id: vault_id.to_string(),
                })?;
        }

        // Canonical leaf set: user-ascending, zero nets dropped.
        let mut leaves = Vec::new();
        let mut netted: u128 = 0;
        for (user, net) in nets {
            if net == 0 {
                continue;
            }
            netted += net.unsigned_abs();
            let amount =
                u64::try_from(net.unsigned_abs()).map_err(|_| NettingError::Overflow {
                    vault_id: vault_id.to_string(),
                })?;
            leaves.push(NetLeaf {
                user,
                amount: Money::from_units(amount),
                sign: if net > 0 {
                    LeafSign::Credit
                } else {
                    LeafSign::Debit
                },
            });
        }
        if leaves.is_empty() {
            return Ok(None);
        }

        let leaf_hashes: Vec<[u8; 32]> = leaves
            .iter()
            .map(|leaf| leaf_hash(&leaf.user, leaf.amount))
            .collect();
        let root = merkle_root(&leaf_hashes);
        let batch_id = batch_ref_id(root, self.nonce);
        self.nonce += 1;

        let outcome = self.ledger.apply_net_batch(batch_id, leaves.clone()).await?;

        let gross_volume = Money::from_units(u64::try_from(gross).unwrap_or(u64::MAX));
        let netted_volume = Money::from_units(u64::try_from(netted).unwrap_or(u64::MAX));
        let report = NettingReport {
            vault_id: vault_id.to_string(),
            batch_id,
            root,
            leaves: outcome.leaves_applied,
            gross_volume,
            netted_volume,
            savings: gross_volume.saturating_sub(netted_volume),
            fee_collected: outcome.fee_collected,
        };
        info!(
            vault_id = %report.vault_id,
            batch_id = %report.batch_id,
            gross = %report.gross_volume,
            netted = %report.netted_volume,
            savings = %report.savings,
            "netting batch applied"
        );
        Ok(Some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossvault_core::clock::SimClock;
    use crossvault_ledger::{
        InMemoryToken, LedgerParams, LedgerState, TradingHoursGuard,
    };
    use std::sync::Arc;

    const NOW: u64 = 1_700_000_000;

    fn units(n: u64) -> Money {
        Money::from_units(n)
    }

    async fn rig(broker_units: u64) -> (LedgerHandle, NettingEngine) {
        let clock = Arc::new(SimClock::new(NOW));
        let operator = UserKey::from_tag(0xff);
        let mut token = InMemoryToken::new();
        token.mint(operator, units(1_000_000_000));
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
        let (ledger, admin, _events, _join) = crossvault_ledger::spawn(
            state,
            clock,
            TradingHoursGuard::always_open(),
            None,
            64,
            256,
        );
        if broker_units > 0 {
            admin
                .broker_deposit(operator, units(broker_units))
                .await
                .unwrap();
        }
        let engine = NettingEngine::new(ledger.clone());
        (ledger, engine)
    }

    fn obligation(user: UserKey, vault: &str, amount: i128) -> Obligation {
        Obligation {
            user,
            vault_id: vault.to_string(),
            amount,
        }
    }

    // ==================== Scenario S6 ====================

    #[tokio::test]
    async fn test_s6_multilateral_netting() {
        let (ledger, mut engine) = rig(10_000).await;
        let a = UserKey::from_tag(0x0a);
        let b = UserKey::from_tag(0x0b);
        let c = UserKey::from_tag(0x0c);

        // Give B PnL to debit against.
        ledger
            .credit_pnl(b, units(60), RefId::from_tag(1), None)
            .await
            .unwrap();

        for o in [
            obligation(a, "vault-v", 100),
            obligation(b, "vault-v", -60),
            obligation(a, "vault-v", -30),
            obligation(c, "vault-v", 10),
        ] {
            ledger.enqueue_obligation(o).await.unwrap();
        }

        let reports = engine.run_window().await.unwrap();
        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.gross_volume, units(200));
        assert_eq!(report.netted_volume, units(140));
        assert_eq!(report.savings, units(60));
        assert_eq!(report.leaves, 3);

        // Net positions: A +70, B −60, C +10.
        assert_eq!(ledger.user_balances(a).await.unwrap().pnl, units(70));
        assert_eq!(ledger.user_balances(b).await.unwrap().pnl, Money::ZERO);
        assert_eq!(ledger.user_balances(c).await.unwrap().pnl, units(10));

        // The commitment matches the canonical sorted leaf set.
        let expected_leaves = vec![
            leaf_hash(&a, units(70)),
            leaf_hash(&b, units(60)),
            leaf_hash(&c, units(10)),
        ];
        assert_eq!(report.root, merkle_root(&expected_leaves));
        assert_eq!(report.batch_id, batch_ref_id(report.root, 0));
    }

    #[tokio::test]
    async fn test_s6_replay_rejected() {
        let (ledger, mut engine) = rig(10_000).await;
        let a = UserKey::from_tag(0x0a);
        ledger
            .enqueue_obligation(obligation(a, "vault-v", 100))
            .await
            .unwrap();
        let reports = engine.run_window().await.unwrap();
        let report = &reports[0];

        // Replaying the identical (root, nonce) batch fails dedup.
        let err = ledger
            .apply_net_batch(
                batch_ref_id(report.root, 0),
                vec![NetLeaf {
                    user: a,
                    amount: units(100),
                    sign: LeafSign::Credit,
                }],
            )
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::DuplicateRefId);
    }

    #[tokio::test]
    async fn test_zero_nets_dropped_and_empty_window_is_noop() {
        let (ledger, mut engine) = rig(10_000).await;
        let a = UserKey::from_tag(0x0a);

        // +50 and −50 cancel exactly.
        ledger
            .enqueue_obligation(obligation(a, "vault-v", 50))
            .await
            .unwrap();
        ledger
            .enqueue_obligation(obligation(a, "vault-v", -50))
            .await
            .unwrap();
        let reports = engine.run_window().await.unwrap();
        assert!(reports.is_empty());

        // Nothing pending: still a no-op.
        let reports = engine.run_window().await.unwrap();
        assert!(reports.is_empty());
    }

    #[tokio::test]
    async fn test_vaults_batch_independently() {
        let (ledger, mut engine) = rig(10_000).await;
        let a = UserKey::from_tag(0x0a);
        ledger
            .enqueue_obligation(obligation(a, "vault-1", 10))
            .await
            .unwrap();
        ledger
            .enqueue_obligation(obligation(a, "vault-2", 20))
            .await
            .unwrap();
        let reports = engine.run_window().await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_ne!(reports[0].batch_id, reports[1].batch_id);
        assert_eq!(ledger.user_balances(a).await.unwrap().pnl, units(30));
    }

    #[tokio::test]
    async fn test_failed_vault_reenqueues_obligations() {
        // Broker pool too small to fund the credit: the batch fails and the
        // obligations survive for the next window.
        let (ledger, mut engine) = rig(5).await;
        let a = UserKey::from_tag(0x0a);
        ledger
            .enqueue_obligation(obligation(a, "vault-v", 100))
            .await
            .unwrap();

        let reports = engine.run_window().await.unwrap();
        assert!(reports.is_empty());
        assert_eq!(ledger.user_balances(a).await.unwrap().pnl, Money::ZERO);

        // Fund the pool; the re-enqueued obligation settles next window.
        let pending = ledger.drain_obligations().await.unwrap();
        assert_eq!(pending.len(), 1);
        for o in pending {
            ledger.enqueue_obligation(o).await.unwrap();
        }
    }
}
