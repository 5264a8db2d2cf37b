//! Allowlist Merkle Proofs
//!
//! Sorted-pair Keccak-256 Merkle verification against a published root.
//!
//! Two conventions are frozen here and must match the off-system tree builder:
//! - Leaves are double hashed: `keccak256(keccak256(pad32(account) || be32(amount)))`.
//! - Inner nodes hash the two children smaller-first, so proofs carry no
//!   left/right position bits.

use alloy_primitives::U256;

use crate::core::address::Address;
use crate::core::hash::{encode_account_amount, keccak256, AbiHasher, Hash32};

/// Derive the allowlist leaf for `(account, amount)`.
pub fn leaf_hash(account: &Address, amount: U256) -> Hash32 {
    let inner = keccak256(&encode_account_amount(account, amount));
    keccak256(&inner)
}

/// Hash two nodes in sorted order.
pub fn hash_pair(a: &Hash32, b: &Hash32) -> Hash32 {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = AbiHasher::new();
    hasher.update_word(first);
    hasher.update_word(second);
    hasher.finalize()
}

/// Fold a proof path onto `leaf`, returning the implied root.
pub fn process_proof(proof: &[Hash32], leaf: &Hash32) -> Hash32 {
    proof
        .iter()
        .fold(*leaf, |computed, sibling| hash_pair(&computed, sibling))
}

/// Verify that `leaf` is committed to by `root` via `proof`.
///
/// An empty proof is valid only when the leaf is the root.
pub fn verify_proof(proof: &[Hash32], root: &Hash32, leaf: &Hash32) -> bool {
    process_proof(proof, leaf) == *root
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{tokens, AllowlistTree};
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sample_entries(n: u8) -> Vec<(Address, U256)> {
        (1..=n)
            .map(|i| (Address::new([i; 20]), tokens(u64::from(i) * 5)))
            .collect()
    }

    #[test]
    fn test_leaf_vector() {
        let account: Address = "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf".parse().unwrap();
        assert_eq!(
            hex::encode(leaf_hash(&account, tokens(25))),
            "07cc78803ad4054972899170d0a99e68f008f2ec6e07d394f468355bc4781c35"
        );
    }

    #[test]
    fn test_hash_pair_vector_and_commutativity() {
        let a = [0x11u8; 32];
        let b = [0x22u8; 32];

        assert_eq!(
            hex::encode(hash_pair(&a, &b)),
            "3e92e0db88d6afea9edc4eedf62fffa4d92bcdfc310dccbe943747fe8302e871"
        );
        assert_eq!(hash_pair(&a, &b), hash_pair(&b, &a));
    }

    #[test]
    fn test_single_leaf_tree() {
        let leaf = leaf_hash(&Address::new([1; 20]), tokens(1));

        assert!(verify_proof(&[], &leaf, &leaf));
        assert!(!verify_proof(&[], &[0u8; 32], &leaf));
    }

    #[test]
    fn test_every_leaf_verifies() {
        for n in [2u8, 3, 4, 5, 8, 13] {
            let entries = sample_entries(n);
            let tree = AllowlistTree::new(&entries);

            for (i, (account, amount)) in entries.iter().enumerate() {
                let proof = tree.proof(i).unwrap();
                assert!(verify_proof(&proof, &tree.root(), &leaf_hash(account, *amount)));
            }
        }
    }

    #[test]
    fn test_random_allowlists_verify() {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..20 {
            let size = rng.gen_range(1..=40);
            let entries: Vec<(Address, U256)> = (0..size)
                .map(|_| (Address::new(rng.gen()), U256::from(rng.gen::<u64>())))
                .collect();
            let tree = AllowlistTree::new(&entries);

            let index = rng.gen_range(0..size);
            let (account, amount) = entries[index];
            let proof = tree.proof(index).unwrap();
            assert!(verify_proof(&proof, &tree.root(), &leaf_hash(&account, amount)));
        }
    }

    #[test]
    fn test_wrong_amount_fails() {
        let entries = sample_entries(4);
        let tree = AllowlistTree::new(&entries);
        let proof = tree.proof(0).unwrap();

        let (account, amount) = entries[0];
        assert!(!verify_proof(&proof, &tree.root(), &leaf_hash(&account, amount + U256::from(1u64))));
    }

    #[test]
    fn test_leaf_is_double_hashed() {
        let account = Address::new([7; 20]);
        let amount = tokens(3);
        let single = keccak256(&encode_account_amount(&account, amount));

        assert_eq!(leaf_hash(&account, amount), keccak256(&single));
        assert_ne!(leaf_hash(&account, amount), single);
    }

    #[test]
    fn test_inner_node_with_short_proof_is_not_a_claim() {
        let entries = sample_entries(4);
        let tree = AllowlistTree::new(&entries);
        let proof = tree.proof(0).unwrap();

        // An inner node verifies against a shortened path...
        let parent = hash_pair(&tree.leaf(0), &proof[0]);
        assert!(verify_proof(&proof[1..], &tree.root(), &parent));

        // ...but it is not the leaf of any allowlisted entry.
        for (account, amount) in &entries {
            assert_ne!(leaf_hash(account, *amount), parent);
        }
    }

    #[test]
    fn test_truncated_and_extended_proofs_fail() {
        let entries = sample_entries(8);
        let tree = AllowlistTree::new(&entries);
        let (account, amount) = entries[3];
        let leaf = leaf_hash(&account, amount);
        let proof = tree.proof(3).unwrap();

        assert!(!verify_proof(&proof[..proof.len() - 1], &tree.root(), &leaf));

        let mut extended = proof.clone();
        extended.push([0u8; 32]);
        assert!(!verify_proof(&extended, &tree.root(), &leaf));
    }

    proptest! {
        #[test]
        fn prop_corrupted_sibling_fails(
            index in 0usize..8,
            position in 0usize..3,
            byte in 0usize..32,
            flip in 1u8..=255,
        ) {
            let entries = sample_entries(8);
            let tree = AllowlistTree::new(&entries);
            let (account, amount) = entries[index];
            let leaf = leaf_hash(&account, amount);

            let mut proof = tree.proof(index).unwrap();
            prop_assert_eq!(proof.len(), 3);
            proof[position][byte] ^= flip;

            prop_assert!(!verify_proof(&proof, &tree.root(), &leaf));
        }

        #[test]
        fn prop_swapped_siblings_fail(index in 0usize..8, i in 0usize..3, j in 0usize..3) {
            prop_assume!(i != j);
            let entries = sample_entries(8);
            let tree = AllowlistTree::new(&entries);
            let (account, amount) = entries[index];
            let leaf = leaf_hash(&account, amount);

            let mut proof = tree.proof(index).unwrap();
            proof.swap(i, j);

            prop_assert!(!verify_proof(&proof, &tree.root(), &leaf));
        }
    }
}
