//! Opaque user keys and keccak-derived reference ids.
//!
//! Every monetary primitive consumes a 32-byte reference id; the constructors
//! here fix the preimage layouts so the same real-world event always maps to
//! the same id regardless of which component derives it.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

/// Opaque 20-byte user identity (address-shaped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserKey(pub [u8; 20]);

impl UserKey {
    #[must_use]
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Test/demo helper: a key with every byte set to `tag`.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Self {
        Self([tag; 20])
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl std::fmt::Display for UserKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// 32-byte reference id giving at-most-once semantics to monetary primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RefId(pub [u8; 32]);

impl RefId {
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Test/demo helper: an id with every byte set to `tag`.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Self {
        Self([tag; 32])
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for RefId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Computes keccak-256 over raw bytes.
#[must_use]
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&out);
    bytes
}

/// Reference id for a venue position close: `keccak(venue ‖ position_id)`.
#[must_use]
pub fn position_close_ref_id(venue: &str, position_id: &str) -> RefId {
    let mut hasher = Keccak256::new();
    hasher.update(venue.as_bytes());
    hasher.update(position_id.as_bytes());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hasher.finalize());
    RefId(bytes)
}

/// Reference id for a venue shortfall claim:
/// `keccak("shortfall" ‖ venue ‖ claim_id)`.
#[must_use]
pub fn shortfall_ref_id(venue: &str, claim_id: &str) -> RefId {
    let mut hasher = Keccak256::new();
    hasher.update(b"shortfall");
    hasher.update(venue.as_bytes());
    hasher.update(claim_id.as_bytes());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hasher.finalize());
    RefId(bytes)
}

/// Reference id for a netting batch: `keccak(root ‖ nonce)` with the nonce
/// encoded as a 32-byte big-endian word.
#[must_use]
pub fn batch_ref_id(root: [u8; 32], nonce: u64) -> RefId {
    let mut nonce_word = [0u8; 32];
    nonce_word[24..].copy_from_slice(&nonce.to_be_bytes());
    let mut hasher = Keccak256::new();
    hasher.update(root);
    hasher.update(nonce_word);
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hasher.finalize());
    RefId(bytes)
}
