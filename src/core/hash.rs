//! Keccak-256 Hashing
//!
//! Provides the byte-exact hashing used by every digest in the crate:
//! - Allowlist leaves and Merkle nodes
//! - EIP-712 type hashes, struct hashes and domain separators
//! - Address derivation from public keys
//!
//! All multi-byte values are written as 32-byte big-endian ABI words so
//! results match EVM-side tooling bit for bit.

use alloy_primitives::U256;
use sha3::{Digest, Keccak256};

use super::address::Address;

/// Hash output type (256 bits / 32 bytes)
pub type Hash32 = [u8; 32];

/// Incremental Keccak-256 hasher with ABI word helpers.
///
/// Order of updates is critical: the hasher is a plain concatenation,
/// there is no implicit length prefix or separator between updates.
pub struct AbiHasher {
    hasher: Keccak256,
}

impl AbiHasher {
    /// Create an empty hasher.
    pub fn new() -> Self {
        Self {
            hasher: Keccak256::new(),
        }
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a 32-byte word as-is.
    #[inline]
    pub fn update_word(&mut self, word: &Hash32) {
        self.hasher.update(word);
    }

    /// Update with an address, left-padded to 32 bytes.
    #[inline]
    pub fn update_address(&mut self, address: &Address) {
        self.hasher.update(address_word(address));
    }

    /// Update with a 256-bit unsigned integer (big-endian).
    #[inline]
    pub fn update_u256(&mut self, value: U256) {
        self.hasher.update(value.to_be_bytes::<32>());
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> Hash32 {
        self.hasher.finalize().into()
    }
}

impl Default for AbiHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute the Keccak-256 hash of arbitrary data.
pub fn keccak256(data: &[u8]) -> Hash32 {
    Keccak256::digest(data).into()
}

/// Left-pad an address to a 32-byte ABI word.
pub fn address_word(address: &Address) -> Hash32 {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

/// ABI-encode an `(address, uint256)` pair (64 bytes).
pub fn encode_account_amount(account: &Address, amount: U256) -> [u8; 64] {
    let mut out = [0u8; 64];
    out[..32].copy_from_slice(&address_word(account));
    out[32..].copy_from_slice(&amount.to_be_bytes::<32>());
    out
}

/// Parse a 32-byte hash from hex (with or without `0x`).
pub fn parse_hash(s: &str) -> Option<Hash32> {
    let cleaned = s.trim();
    let cleaned = cleaned.strip_prefix("0x").unwrap_or(cleaned);
    if cleaned.len() != 64 {
        return None;
    }
    let mut hash = [0u8; 32];
    hex::decode_to_slice(cleaned, &mut hash).ok()?;
    Some(hash)
}

/// Render a hash as `0x`-prefixed lowercase hex.
pub fn hash_to_hex(hash: &Hash32) -> String {
    format!("0x{}", hex::encode(hash))
}

// =============================================================================
// TESTS
// =============================================================================
