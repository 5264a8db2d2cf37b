//! Off-system stand-ins for tests: allowlist tree building and claim signing.

use alloy_primitives::U256;
use k256::ecdsa::SigningKey;

use crate::core::address::Address;
use crate::core::hash::Hash32;
use crate::distribution::merkle::{hash_pair, leaf_hash};
use crate::distribution::signature::Signature;

/// `whole` tokens with 18 decimals.
pub fn tokens(whole: u64) -> U256 {
    U256::from(whole) * U256::from(10u64).pow(U256::from(18u64))
}

/// Deterministic signing key from a one-byte seed (seed must be non-zero).
pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_slice(&[seed; 32]).expect("non-zero seed is a valid scalar")
}

/// Address controlled by `key`.
pub fn address_of(key: &SigningKey) -> Address {
    Address::from_verifying_key(key.verifying_key())
}

/// Sign a 32-byte digest, returning an Ethereum-style `(v, r, s)` signature.
pub fn sign_digest(key: &SigningKey, digest: &Hash32) -> Signature {
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(digest)
        .expect("signing a 32-byte prehash succeeds");
    let bytes = signature.to_bytes();

    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&bytes[..32]);
    s.copy_from_slice(&bytes[32..]);
    Signature::new(27 + recovery_id.to_byte(), r, s)
}

/// Sorted-pair allowlist tree. An odd node at the end of a level is
/// carried up unchanged.
pub struct AllowlistTree {
    levels: Vec<Vec<Hash32>>,
}

impl AllowlistTree {
    /// Build over `(account, amount)` entries, in order.
    pub fn new(entries: &[(Address, U256)]) -> Self {
        assert!(!entries.is_empty(), "allowlist must not be empty");

        let mut current: Vec<Hash32> = entries
            .iter()
            .map(|(account, amount)| leaf_hash(account, *amount))
            .collect();
        let mut levels = vec![current.clone()];

        while current.len() > 1 {
            current = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(left, right),
                    [single] => *single,
                    _ => unreachable!(),
                })
                .collect();
            levels.push(current.clone());
        }

        Self { levels }
    }

    /// Tree root.
    pub fn root(&self) -> Hash32 {
        self.levels[self.levels.len() - 1][0]
    }

    /// Leaf at `index`.
    pub fn leaf(&self, index: usize) -> Hash32 {
        self.levels[0][index]
    }

    /// Sibling path for the leaf at `index`.
    pub fn proof(&self, index: usize) -> Option<Vec<Hash32>> {
        if index >= self.levels[0].len() {
            return None;
        }

        let mut siblings = Vec::new();
        let mut current = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = current ^ 1;
            if sibling < level.len() {
                siblings.push(level[sibling]);
            }
            current /= 2;
        }
        Some(siblings)
    }
}
