//! # Merkle Airdrop Server
//!
//! Claim verification and settlement for a signed, allowlisted token
//! distribution. Each allowlisted account may claim its fixed amount
//! exactly once, after proving membership in the committed Merkle tree
//! and presenting an EIP-712 authorization signed by its own key.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    MERKLE AIRDROP SERVER                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/             - Byte-exact primitives                  │
//! │  ├── address.rs    - 20-byte account identifiers            │
//! │  └── hash.rs       - Keccak-256 and ABI word encoding       │
//! │                                                             │
//! │  distribution/     - Claim logic                            │
//! │  ├── digest.rs     - EIP-712 typed claim digests            │
//! │  ├── signature.rs  - secp256k1 signer recovery              │
//! │  ├── merkle.rs     - Sorted-pair proof verification         │
//! │  ├── ledger.rs     - Claimed set and snapshots              │
//! │  ├── token.rs      - Token ledger collaborator              │
//! │  └── distributor.rs- Gated, exactly-once claims             │
//! │                                                             │
//! │  network/          - Settlement server                      │
//! │  ├── server.rs     - WebSocket server                       │
//! │  └── protocol.rs   - Message types                          │
//! │                                                             │
//! │  config.rs         - Environment configuration              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Exactly-once Guarantee
//!
//! An account is marked claimed before its tokens move, and the mark is
//! only undone if that same transfer fails. A token ledger that re-enters
//! the distributor mid-transfer observes the account as already claimed.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod distribution;
pub mod network;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use config::{AppConfig, ConfigError};
pub use crate::core::address::Address;
pub use crate::core::hash::Hash32;
pub use distribution::{
    ClaimError, ClaimEvent, DistributionConfig, Distributor, InMemoryToken, Signature,
    TokenLedger, TypedDataDomain,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
