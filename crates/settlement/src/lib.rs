//! Settlement execution: idempotent PnL credit / collateral seizure, the
//! insurance waterfall pipeline, and cross-venue netting with Merkle
//! commitments.

pub mod coordinator;
pub mod merkle;
pub mod netting;

pub use coordinator::{
    spawn, CoordinatorHandle, OperatorAlert, SettlementCoordinator, SettlementJob,
};
pub use merkle::{leaf_hash, merkle_proof, merkle_root, node_hash, verify_proof};
pub use netting::{NettingEngine, NettingError, NettingReport};
