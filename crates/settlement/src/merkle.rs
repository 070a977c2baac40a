//! Keccak Merkle commitments over netting leaves.
//!
//! Leaf: `keccak(user:20 ‖ amount:32)` with the amount as a big-endian
//! 32-byte word. Node: `keccak(min(a,b) ‖ max(a,b))`: sorted-pair
//! combination, so proofs carry no direction bits. An unpaired node is
//! promoted unchanged.

use crossvault_core::fixed::Money;
use crossvault_core::keys::UserKey;
use sha3::{Digest, Keccak256};

/// Hashes one netting leaf.
#[must_use]
pub fn leaf_hash(user: &UserKey, amount: Money) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&amount.units().to_be_bytes());
    let mut hasher = Keccak256::new();
    hasher.update(user.as_bytes());
    hasher.update(word);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Combines two nodes order-independently.
#[must_use]
pub fn node_hash(a: [u8; 32], b: [u8; 32]) -> [u8; 32] {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Keccak256::new();
    hasher.update(lo);
    hasher.update(hi);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Root over the leaf layer. A single leaf is its own root; an empty set has
/// the zero root (never submitted).
#[must_use]
pub fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.is_empty() {
        return [0u8; 32];
    }
    let mut layer = leaves.to_vec();
    while layer.len() > 1 {
        layer = layer
            .chunks(2)
            .map(|pair| match pair {
                [a, b] => node_hash(*a, *b),
                [a] => *a,
                _ => unreachable!(),
            })
            .collect();
    }
    layer[0]
}

/// Sibling path for the leaf at `index`, or `None` if out of range.
#[must_use]
pub fn merkle_proof(leaves: &[[u8; 32]], index: usize) -> Option<Vec<[u8; 32]>> {
    if index >= leaves.len() {
        return None;
    }
    let mut proof = Vec::new();
    let mut layer = leaves.to_vec();
    let mut position = index;
    while layer.len() > 1 {
        let sibling = if position % 2 == 0 {
            position + 1
        } else {
            position - 1
        };
        if sibling < layer.len() {
            proof.push(layer[sibling]);
        }
        layer = layer
            .chunks(2)
            .map(|pair| match pair {
                [a, b] => node_hash(*a, *b),
                [a] => *a,
                _ => unreachable!(),
            })
            .collect();
        position /= 2;
    }
    Some(proof)
}

/// Recomputes the root from a leaf and its sibling path.
#[must_use]
pub fn verify_proof(leaf: [u8; 32], proof: &[[u8; 32]], root: [u8; 32]) -> bool {
    let computed = proof.iter().fold(leaf, |acc, sibling| node_hash(acc, *sibling));
    computed == root
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: u8) -> Vec<[u8; 32]> {
        (0..n)
            .map(|i| leaf_hash(&UserKey::from_tag(i), Money::from_units(u64::from(i) * 100)))
            .collect()
    }

    #[test]
    fn test_leaf_hash_distinguishes_user_and_amount() {
        let a = leaf_hash(&UserKey::from_tag(1), Money::from_units(100));
        let b = leaf_hash(&UserKey::from_tag(2), Money::from_units(100));
        let c = leaf_hash(&UserKey::from_tag(1), Money::from_units(101));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_node_hash_is_symmetric() {
        let set = leaves(2);
        assert_eq!(node_hash(set[0], set[1]), node_hash(set[1], set[0]));
    }

    #[test]
    fn test_single_leaf_root_is_leaf() {
        let set = leaves(1);
        assert_eq!(merkle_root(&set), set[0]);
    }

    #[test]
    fn test_root_deterministic_and_grouping_sensitive() {
        let set = leaves(4);
        assert_eq!(merkle_root(&set), merkle_root(&set));

        // Sorted pairs make each node symmetric, but regrouping the leaves
        // still changes the commitment.
        let regrouped = vec![set[0], set[2], set[1], set[3]];
        assert_ne!(merkle_root(&set), merkle_root(&regrouped));
    }

    #[test]
    fn test_proofs_verify_for_all_sizes() {
        for n in 1..=9u8 {
            let set = leaves(n);
            let root = merkle_root(&set);
            for (i, leaf) in set.iter().enumerate() {
                let proof = merkle_proof(&set, i).unwrap();
                assert!(
                    verify_proof(*leaf, &proof, root),
                    "proof failed for leaf {i} of {n}"
                );
            }
        }
    }

    #[test]
    fn test_wrong_leaf_fails_verification() {
        let set = leaves(5);
        let root = merkle_root(&set);
        let proof = merkle_proof(&set, 2).unwrap();
        let forged = leaf_hash(&UserKey::from_tag(0xee), Money::from_units(1));
        assert!(!verify_proof(forged, &proof, root));
    }

    #[test]
    fn test_out_of_range_proof_is_none() {
        let set = leaves(3);
        assert!(merkle_proof(&set, 3).is_none());
    }
}
