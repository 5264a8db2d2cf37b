//! Typed Claim Digests (EIP-712)
//!
//! Builds the domain-separated digest an off-system signer must sign to
//! authorize a claim of `amount` for `account`:
//!
//! ```text
//! digest = keccak256(0x19 || 0x01 || domain_separator || struct_hash)
//! struct_hash = keccak256(CLAIM_TYPEHASH || pad32(account) || be32(amount))
//! ```

use alloy_primitives::U256;

use crate::core::address::Address;
use crate::core::hash::{keccak256, AbiHasher, Hash32};

/// Schema string for the EIP-712 domain.
pub const EIP712_DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

/// Schema string for a claim authorization.
pub const CLAIM_TYPE: &str = "AirdropClaim(address account,uint256 amount)";

/// Default distribution name.
pub const DEFAULT_NAME: &str = "MerkleAirdrop";

/// Default distribution version.
pub const DEFAULT_VERSION: &str = "1";

/// Prefix for EIP-712 encoded data.
const TYPED_DATA_PREFIX: [u8; 2] = [0x19, 0x01];

/// Type hash of [`EIP712_DOMAIN_TYPE`].
pub fn domain_typehash() -> Hash32 {
    keccak256(EIP712_DOMAIN_TYPE.as_bytes())
}

/// Type hash of [`CLAIM_TYPE`].
pub fn claim_typehash() -> Hash32 {
    keccak256(CLAIM_TYPE.as_bytes())
}

/// Fixed domain parameters of a distribution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypedDataDomain {
    /// Distribution name.
    pub name: String,
    /// Distribution version.
    pub version: String,
    /// Chain the distribution is deployed on.
    pub chain_id: u64,
    /// Address of the deployed distribution.
    pub verifying_contract: Address,
}

impl TypedDataDomain {
    /// Domain with the default name and version.
    pub fn new(chain_id: u64, verifying_contract: Address) -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            version: DEFAULT_VERSION.to_string(),
            chain_id,
            verifying_contract,
        }
    }

    /// Compute the domain separator.
    pub fn separator(&self) -> Hash32 {
        let mut hasher = AbiHasher::new();
        hasher.update_word(&domain_typehash());
        hasher.update_word(&keccak256(self.name.as_bytes()));
        hasher.update_word(&keccak256(self.version.as_bytes()));
        hasher.update_u256(U256::from(self.chain_id));
        hasher.update_address(&self.verifying_contract);
        hasher.finalize()
    }
}

/// Digest builder bound to one domain.
///
/// The separator is computed once at construction; the domain cannot be
/// changed afterwards.
#[derive(Clone, Debug)]
pub struct DigestBuilder {
    domain: TypedDataDomain,
    separator: Hash32,
    claim_typehash: Hash32,
}

impl DigestBuilder {
    /// Create a builder for `domain`.
    pub fn new(domain: TypedDataDomain) -> Self {
        let separator = domain.separator();
        Self {
            domain,
            separator,
            claim_typehash: claim_typehash(),
        }
    }

    /// The domain this builder signs for.
    pub fn domain(&self) -> &TypedDataDomain {
        &self.domain
    }

    /// The cached domain separator.
    pub fn domain_separator(&self) -> Hash32 {
        self.separator
    }

    /// Hash of the typed claim payload, before domain binding.
    pub fn struct_hash(&self, account: &Address, amount: U256) -> Hash32 {
        let mut hasher = AbiHasher::new();
        hasher.update_word(&self.claim_typehash);
        hasher.update_address(account);
        hasher.update_u256(amount);
        hasher.finalize()
    }

    /// Build the digest to be signed for `(account, amount)`.
    pub fn build_digest(&self, account: &Address, amount: U256) -> Hash32 {
        let struct_hash = self.struct_hash(account, amount);

        let mut hasher = AbiHasher::new();
        hasher.update_bytes(&TYPED_DATA_PREFIX);
        hasher.update_word(&self.separator);
        hasher.update_word(&struct_hash);
        hasher.finalize()
    }
}

// =============================================================================
// TESTS
// =============================================================================
