//! Claim Ledger
//!
//! Set of accounts that have settled. Unseen accounts are unclaimed.
//! An account leaves the set only through the compensating rollback of
//! a claim whose transfer failed.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::address::Address;
use crate::core::hash::Hash32;

/// Accounts that have claimed.
///
/// Uses BTreeSet for deterministic snapshot order.
#[derive(Clone, Debug, Default)]
pub struct ClaimLedger {
    claimed: BTreeSet<Address>,
}

impl ClaimLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Has `account` claimed?
    pub fn has_claimed(&self, account: &Address) -> bool {
        self.claimed.contains(account)
    }

    /// Mark `account` as claimed.
    ///
    /// Returns false if it was already marked.
    pub fn mark_claimed(&mut self, account: Address) -> bool {
        self.claimed.insert(account)
    }

    /// Undo a mark made earlier in the same claim attempt.
    pub(crate) fn rollback(&mut self, account: &Address) {
        self.claimed.remove(account);
    }

    /// Number of settled accounts.
    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    /// True if nobody has claimed yet.
    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }

    /// Capture the ledger for persistence.
    pub fn snapshot(&self, merkle_root: Hash32) -> LedgerSnapshot {
        LedgerSnapshot {
            merkle_root,
            claimed: self.claimed.iter().copied().collect(),
        }
    }
}

// =============================================================================
// PERSISTENCE
// =============================================================================

/// Serialized claim ledger, bound to the root it was recorded under.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Merkle root of the distribution this ledger belongs to.
    pub merkle_root: Hash32,
    /// Settled accounts, sorted.
    pub claimed: Vec<Address>,
}

impl LedgerSnapshot {
    /// Rebuild a ledger for a distribution committed to `merkle_root`.
    pub fn into_ledger(self, merkle_root: &Hash32) -> Result<ClaimLedger, StoreError> {
        if self.merkle_root != *merkle_root {
            return Err(StoreError::RootMismatch {
                expected: *merkle_root,
                found: self.merkle_root,
            });
        }
        Ok(ClaimLedger {
            claimed: self.claimed.into_iter().collect(),
        })
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, StoreError> {
        Ok(bincode::deserialize(data)?)
    }

    /// Write to `path` atomically (temp file, then rename).
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let bytes = self.to_bytes()?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, bytes)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Load from `path`. Returns None if the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, StoreError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(Self::from_bytes(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Durable home for the claim ledger.
///
/// The distributor persists every mark before the matching transfer, so a
/// restart never reopens a paid claim.
pub trait LedgerStore: Send + Sync {
    /// Replace the stored ledger with `snapshot`.
    fn persist(&self, snapshot: &LedgerSnapshot) -> Result<(), StoreError>;
}

/// Ledger store backed by one snapshot file.
#[derive(Clone, Debug)]
pub struct FileLedgerStore {
    path: PathBuf,
}

impl FileLedgerStore {
    /// Store snapshots at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Snapshot file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored snapshot, if any.
    pub fn load(&self) -> Result<Option<LedgerSnapshot>, StoreError> {
        LedgerSnapshot::load(&self.path)
    }
}

impl LedgerStore for FileLedgerStore {
    fn persist(&self, snapshot: &LedgerSnapshot) -> Result<(), StoreError> {
        snapshot.save(&self.path)
    }
}

/// Ledger persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem error.
    #[error("ledger io error: {0}")]
    Io(#[from] io::Error),

    /// Snapshot encoding error.
    #[error("ledger encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    /// Distribution parameters rejected.
    #[error("invalid distribution config: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Snapshot was recorded for a different distribution.
    #[error("ledger snapshot belongs to root 0x{}, expected 0x{}", hex::encode(.found), hex::encode(.expected))]
    RootMismatch {
        /// Root of the running distribution.
        expected: Hash32,
        /// Root recorded in the snapshot.
        found: Hash32,
    },
}
