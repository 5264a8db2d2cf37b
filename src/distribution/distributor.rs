//! Claim Orchestrator
//!
//! The only mutating entry point of a distribution. A claim passes through
//! fixed gates, and the first failing gate aborts with no state change:
//!
//! ```text
//! 1. ledger: account not yet claimed        -> AlreadyClaimed
//! 2. signature over the typed digest        -> InvalidSignature
//! 3. leaf = keccak(keccak(account, amount))
//! 4. proof from leaf to the committed root  -> InvalidProof
//! 5. ledger: mark claimed, persist the mark -> LedgerUnavailable (mark undone)
//! 6. token transfer, then record the event  -> TransferFailed (mark undone)
//! ```
//!
//! The ledger lock is released before step 6. A token ledger that calls
//! back into `claim` during the transfer sees the account as claimed.
//!
//! Event sequence numbers follow completion order: a claim settled by a
//! re-entrant call during another claim's transfer gets the lower number.

use std::sync::{Mutex, MutexGuard};

use alloy_primitives::U256;
use tracing::{debug, error, info, warn};

use crate::config::ConfigError;
use crate::core::address::Address;
use crate::core::hash::Hash32;
use crate::distribution::digest::{DigestBuilder, TypedDataDomain};
use crate::distribution::ledger::{ClaimLedger, LedgerSnapshot, LedgerStore, StoreError};
use crate::distribution::merkle::{leaf_hash, verify_proof};
use crate::distribution::signature::{is_valid_signature, Signature};
use crate::distribution::token::{TokenError, TokenLedger};

/// Fixed parameters of a distribution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DistributionConfig {
    /// Allowlist commitment.
    pub merkle_root: Hash32,
    /// Address of the distributed token.
    pub token: Address,
    /// EIP-712 domain for claim authorizations.
    pub domain: TypedDataDomain,
}

/// Claim failures. None of them leave a trace in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimError {
    /// Account has already claimed.
    #[error("account {0} has already claimed")]
    AlreadyClaimed(Address),

    /// Signature does not recover to the claiming account.
    #[error("invalid signature")]
    InvalidSignature,

    /// Proof does not lead to the committed root.
    #[error("invalid merkle proof")]
    InvalidProof,

    /// Token ledger did not complete the transfer.
    #[error("token transfer failed: {0}")]
    TransferFailed(#[from] TokenError),

    /// The claim mark could not be made durable; nothing was transferred.
    #[error("claim ledger unavailable: {0}")]
    LedgerUnavailable(String),
}

/// Record of a settled claim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimEvent {
    /// Position in settlement order, starting at 0.
    pub sequence: u64,
    /// Account that claimed.
    pub account: Address,
    /// Amount transferred.
    pub amount: U256,
}

/// A gated, exactly-once token distribution.
pub struct Distributor<T: TokenLedger> {
    merkle_root: Hash32,
    token_address: Address,
    digests: DigestBuilder,
    ledger: Mutex<ClaimLedger>,
    events: Mutex<Vec<ClaimEvent>>,
    store: Option<Box<dyn LedgerStore>>,
    token: T,
}

impl<T: TokenLedger> Distributor<T> {
    /// Create a distribution with an empty ledger.
    pub fn new(config: DistributionConfig, token: T) -> Result<Self, ConfigError> {
        Self::with_ledger(config, token, ClaimLedger::new())
    }

    /// Create a distribution resuming from `ledger`.
    pub fn with_ledger(
        config: DistributionConfig,
        token: T,
        ledger: ClaimLedger,
    ) -> Result<Self, ConfigError> {
        if config.merkle_root == [0u8; 32] {
            return Err(ConfigError::ZeroMerkleRoot);
        }
        if config.token.is_zero() {
            return Err(ConfigError::ZeroAddress("token"));
        }

        Ok(Self {
            merkle_root: config.merkle_root,
            token_address: config.token,
            digests: DigestBuilder::new(config.domain),
            ledger: Mutex::new(ledger),
            events: Mutex::new(Vec::new()),
            store: None,
            token,
        })
    }

    /// Persist every ledger change to `store` before tokens move.
    pub fn with_store(mut self, store: impl LedgerStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Create a distribution resuming from a persisted snapshot.
    pub fn from_snapshot(
        config: DistributionConfig,
        token: T,
        snapshot: LedgerSnapshot,
    ) -> Result<Self, StoreError> {
        let ledger = snapshot.into_ledger(&config.merkle_root)?;
        Ok(Self::with_ledger(config, token, ledger)?)
    }

    // =========================================================================
    // CLAIM
    // =========================================================================

    /// Settle a claim of `amount` for `account`.
    pub fn claim(
        &self,
        account: Address,
        amount: U256,
        proof: &[Hash32],
        signature: &Signature,
    ) -> Result<ClaimEvent, ClaimError> {
        if self.has_claimed(&account) {
            debug!("Rejecting claim for {}: already claimed", account.short());
            return Err(ClaimError::AlreadyClaimed(account));
        }

        let digest = self.digests.build_digest(&account, amount);
        if !is_valid_signature(&account, &digest, signature) {
            debug!("Rejecting claim for {}: bad signature", account.short());
            return Err(ClaimError::InvalidSignature);
        }

        let leaf = leaf_hash(&account, amount);
        if !verify_proof(proof, &self.merkle_root, &leaf) {
            debug!("Rejecting claim for {}: bad proof", account.short());
            return Err(ClaimError::InvalidProof);
        }

        {
            let mut ledger = self.ledger();
            // Insert-if-absent: a racing claim that passed gate 1 loses here.
            if !ledger.mark_claimed(account) {
                return Err(ClaimError::AlreadyClaimed(account));
            }
            // Persisted under the lock so snapshots reach the store in order.
            if let Err(e) = self.persist(&ledger) {
                ledger.rollback(&account);
                warn!("Could not persist claim for {}, rejected: {}", account.short(), e);
                return Err(ClaimError::LedgerUnavailable(e.to_string()));
            }
        }

        let outcome = match self.token.transfer(&account, amount) {
            Ok(true) => Ok(()),
            Ok(false) => Err(TokenError::Rejected("transfer returned false".to_string())),
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            let mut ledger = self.ledger();
            ledger.rollback(&account);
            if let Err(store_err) = self.persist(&ledger) {
                // The stored mark stays; the account is locked out, not paid twice.
                error!("Could not persist rollback for {}: {}", account.short(), store_err);
            }
            drop(ledger);
            warn!("Transfer to {} failed, claim rolled back: {}", account.short(), e);
            return Err(ClaimError::TransferFailed(e));
        }

        let event = self.record_event(account, amount);
        info!("Claim #{} settled: {} received {}", event.sequence, account, amount);
        Ok(event)
    }

    fn record_event(&self, account: Address, amount: U256) -> ClaimEvent {
        let mut events = self.events.lock().unwrap_or_else(|p| p.into_inner());
        let event = ClaimEvent {
            sequence: events.len() as u64,
            account,
            amount,
        };
        events.push(event.clone());
        event
    }

    fn persist(&self, ledger: &ClaimLedger) -> Result<(), StoreError> {
        match &self.store {
            Some(store) => store.persist(&ledger.snapshot(self.merkle_root)),
            None => Ok(()),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, ClaimLedger> {
        self.ledger.lock().unwrap_or_else(|p| p.into_inner())
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Digest an off-system signer must sign for `(account, amount)`.
    pub fn message_hash(&self, account: &Address, amount: U256) -> Hash32 {
        self.digests.build_digest(account, amount)
    }

    /// Allowlist commitment.
    pub fn merkle_root(&self) -> Hash32 {
        self.merkle_root
    }

    /// Address of the distributed token.
    pub fn distribution_asset(&self) -> Address {
        self.token_address
    }

    /// EIP-712 domain of claim authorizations.
    pub fn domain(&self) -> &TypedDataDomain {
        self.digests.domain()
    }

    /// EIP-712 domain separator.
    pub fn domain_separator(&self) -> Hash32 {
        self.digests.domain_separator()
    }

    /// Has `account` claimed?
    pub fn has_claimed(&self, account: &Address) -> bool {
        self.ledger().has_claimed(account)
    }

    /// Number of settled claims.
    pub fn claimed_count(&self) -> usize {
        self.ledger().len()
    }

    /// Settled claims, in order.
    pub fn claim_events(&self) -> Vec<ClaimEvent> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Ledger state for persistence.
    pub fn snapshot(&self) -> LedgerSnapshot {
        self.ledger().snapshot(self.merkle_root)
    }

    /// Token ledger used for payouts.
    pub fn token(&self) -> &T {
        &self.token
    }
}

// =============================================================================
// TESTS
// =============================================================================
