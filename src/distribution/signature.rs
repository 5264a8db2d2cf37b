//! Signature Recovery
//!
//! Non-throwing secp256k1 signer recovery over a 32-byte digest.
//! Malformed input never panics; it yields a [`RecoverError`] which the
//! claim path folds into a plain `false`.

use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};

use crate::core::address::Address;
use crate::core::hash::Hash32;

/// Half of the secp256k1 group order. Signatures with `s` above this are rejected.
const SECP256K1_HALF_ORDER: [u8; 32] = [
    0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0x5d, 0x57, 0x6e, 0x73, 0x57, 0xa4, 0x50, 0x1d,
    0xdf, 0xe9, 0x2f, 0x46, 0x68, 0x1b, 0x20, 0xa0,
];

/// Length of a compact `r || s || v` signature.
pub const COMPACT_SIGNATURE_LEN: usize = 65;

/// Recoverable signature in `(v, r, s)` form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature {
    /// Recovery byte (27 or 28).
    pub v: u8,
    /// `r` scalar, big-endian.
    pub r: [u8; 32],
    /// `s` scalar, big-endian.
    pub s: [u8; 32],
}

impl Signature {
    /// Create from components.
    pub const fn new(v: u8, r: [u8; 32], s: [u8; 32]) -> Self {
        Self { v, r, s }
    }

    /// Parse a compact 65-byte `r || s || v` signature.
    pub fn from_compact(bytes: &[u8]) -> Result<Self, RecoverError> {
        if bytes.len() != COMPACT_SIGNATURE_LEN {
            return Err(RecoverError::InvalidLength(bytes.len()));
        }
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);
        Ok(Self { v: bytes[64], r, s })
    }

    /// Encode as compact 65-byte `r || s || v`.
    pub fn to_compact(&self) -> [u8; COMPACT_SIGNATURE_LEN] {
        let mut out = [0u8; COMPACT_SIGNATURE_LEN];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.v;
        out
    }
}

/// Why a signer could not be recovered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecoverError {
    /// Compact encoding had the wrong length.
    #[error("invalid signature length: expected 65 bytes, got {0}")]
    InvalidLength(usize),

    /// `v` was not 27 or 28.
    #[error("invalid recovery byte {0}")]
    InvalidRecoveryId(u8),

    /// `s` is in the upper half of the curve order.
    #[error("signature s value is not in the lower half order")]
    MalleableSignature,

    /// Scalars out of range or no point recoverable.
    #[error("invalid signature")]
    InvalidSignature,
}

/// Recover the address that signed `digest`.
pub fn recover_signer(digest: &Hash32, signature: &Signature) -> Result<Address, RecoverError> {
    let recovery_id = match signature.v {
        27 | 28 => RecoveryId::from_byte(signature.v - 27)
            .ok_or(RecoverError::InvalidRecoveryId(signature.v))?,
        other => return Err(RecoverError::InvalidRecoveryId(other)),
    };

    // Big-endian byte order makes lexicographic comparison numeric.
    if signature.s > SECP256K1_HALF_ORDER {
        return Err(RecoverError::MalleableSignature);
    }

    let ecdsa = EcdsaSignature::from_scalars(signature.r, signature.s)
        .map_err(|_| RecoverError::InvalidSignature)?;

    let key = VerifyingKey::recover_from_prehash(digest, &ecdsa, recovery_id)
        .map_err(|_| RecoverError::InvalidSignature)?;

    let address = Address::from_verifying_key(&key);
    if address.is_zero() {
        return Err(RecoverError::InvalidSignature);
    }
    Ok(address)
}

/// Check that `signature` over `digest` was produced by `expected_signer`.
///
/// A zero `expected_signer` never validates.
pub fn is_valid_signature(expected_signer: &Address, digest: &Hash32, signature: &Signature) -> bool {
    if expected_signer.is_zero() {
        return false;
    }
    match recover_signer(digest, signature) {
        Ok(recovered) => recovered == *expected_signer,
        Err(_) => false,
    }
}

// =============================================================================
// TESTS
// =============================================================================
