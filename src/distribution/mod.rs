//! Distribution Layer
//!
//! Claim verification and settlement for one allowlisted distribution.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    DISTRIBUTION                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  digest.rs      - EIP-712 claim digests                     │
//! │  signature.rs   - Non-throwing secp256k1 signer recovery    │
//! │  merkle.rs      - Sorted-pair proof verification            │
//! │  ledger.rs      - Claimed-account set and snapshots         │
//! │  token.rs       - Token ledger collaborator                 │
//! │  distributor.rs - Claim orchestration                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod digest;
pub mod distributor;
pub mod ledger;
pub mod merkle;
pub mod signature;
pub mod token;

// Re-export key types
pub use digest::{DigestBuilder, TypedDataDomain};
pub use distributor::{ClaimError, ClaimEvent, DistributionConfig, Distributor};
pub use ledger::{ClaimLedger, FileLedgerStore, LedgerSnapshot, LedgerStore, StoreError};
pub use merkle::{hash_pair, leaf_hash, process_proof, verify_proof};
pub use signature::{is_valid_signature, recover_signer, RecoverError, Signature};
pub use token::{InMemoryToken, TokenError, TokenLedger};
