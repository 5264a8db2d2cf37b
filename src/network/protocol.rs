//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are tagged JSON. Hashes, addresses and signatures travel
//! as `0x`-prefixed hex; amounts as decimal strings (hex accepted on input).

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::core::address::Address;
use crate::core::hash::{hash_to_hex, parse_hash, Hash32};
use crate::distribution::distributor::{ClaimError, ClaimEvent};
use crate::distribution::signature::{RecoverError, Signature};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Submit a claim for settlement.
    Claim(ClaimRequest),

    /// Ask for the digest a claim must sign.
    MessageHash {
        /// Claiming account.
        account: String,
        /// Allotted amount.
        amount: String,
    },

    /// Ask whether an account has claimed.
    HasClaimed {
        /// Account to look up.
        account: String,
    },

    /// Ask for the distribution parameters.
    DistributionInfo,

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

/// Claim submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRequest {
    /// Claiming account.
    pub account: String,
    /// Allotted amount.
    pub amount: String,
    /// Sibling hashes, leaf to root.
    pub proof: Vec<String>,
    /// Compact 65-byte `r || s || v` signature.
    pub signature: String,
}

/// A claim request with every field decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedClaim {
    /// Claiming account.
    pub account: Address,
    /// Allotted amount.
    pub amount: U256,
    /// Sibling hashes.
    pub proof: Vec<Hash32>,
    /// Authorization.
    pub signature: Signature,
}

impl ClaimRequest {
    /// Build a request from decoded values.
    pub fn new(account: &Address, amount: U256, proof: &[Hash32], signature: &Signature) -> Self {
        Self {
            account: account.to_hex(),
            amount: amount.to_string(),
            proof: proof.iter().map(hash_to_hex).collect(),
            signature: format!("0x{}", hex::encode(signature.to_compact())),
        }
    }

    /// Decode every field.
    pub fn parse(&self) -> Result<ParsedClaim, ProtocolError> {
        let proof = self
            .proof
            .iter()
            .map(|node| parse_hash(node).ok_or_else(|| ProtocolError::InvalidHash(node.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        let sig_hex = self.signature.trim();
        let sig_bytes = hex::decode(sig_hex.strip_prefix("0x").unwrap_or(sig_hex))
            .map_err(|_| ProtocolError::InvalidSignatureEncoding(RecoverError::InvalidSignature))?;
        let signature =
            Signature::from_compact(&sig_bytes).map_err(ProtocolError::InvalidSignatureEncoding)?;

        Ok(ParsedClaim {
            account: parse_account(&self.account)?,
            amount: parse_amount(&self.amount)?,
            proof,
            signature,
        })
    }
}

/// Parse an account address field.
pub fn parse_account(s: &str) -> Result<Address, ProtocolError> {
    s.parse().map_err(|_| ProtocolError::InvalidAddress(s.to_string()))
}

/// Parse an amount field.
pub fn parse_amount(s: &str) -> Result<U256, ProtocolError> {
    s.trim().parse().map_err(|_| ProtocolError::InvalidAmount(s.to_string()))
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The submitted claim settled.
    Claimed(ClaimReceipt),

    /// The submitted claim was refused.
    ClaimRejected {
        /// Claiming account.
        account: String,
        /// Rejection reason.
        code: RejectCode,
        /// Human-readable detail.
        message: String,
    },

    /// Digest for a claim.
    MessageHash {
        /// Claiming account.
        account: String,
        /// Allotted amount.
        amount: String,
        /// Digest to sign.
        digest: String,
    },

    /// Claim status of an account.
    ClaimStatus {
        /// Account looked up.
        account: String,
        /// Whether it has claimed.
        claimed: bool,
    },

    /// Distribution parameters.
    DistributionInfo(DistributionInfo),

    /// A claim settled (broadcast to every connection).
    Event(ClaimReceipt),

    /// Pong response.
    Pong {
        /// Client timestamp from the ping.
        timestamp: u64,
        /// Server wall clock (Unix millis).
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Shutdown reason.
        reason: String,
    },
}

/// Settled claim as sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimReceipt {
    /// Settlement order, starting at 0.
    pub sequence: u64,
    /// Account that claimed.
    pub account: String,
    /// Amount transferred.
    pub amount: String,
}

impl From<&ClaimEvent> for ClaimReceipt {
    fn from(event: &ClaimEvent) -> Self {
        Self {
            sequence: event.sequence,
            account: event.account.to_hex(),
            amount: event.amount.to_string(),
        }
    }
}

/// Distribution parameters as sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionInfo {
    /// Allowlist commitment.
    pub merkle_root: String,
    /// Distributed token.
    pub token: String,
    /// Domain name.
    pub name: String,
    /// Domain version.
    pub version: String,
    /// Chain id.
    pub chain_id: u64,
    /// Address bound into claim digests.
    pub verifying_contract: String,
    /// EIP-712 domain separator.
    pub domain_separator: String,
    /// Number of settled claims.
    pub claimed_count: u64,
}

/// Why a claim was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectCode {
    /// Account already claimed.
    AlreadyClaimed,
    /// Signature did not match the account.
    InvalidSignature,
    /// Proof did not match the root.
    InvalidProof,
    /// Token transfer failed.
    TransferFailed,
    /// Claim could not be recorded durably.
    LedgerUnavailable,
}

impl From<&ClaimError> for RejectCode {
    fn from(err: &ClaimError) -> Self {
        match err {
            ClaimError::AlreadyClaimed(_) => RejectCode::AlreadyClaimed,
            ClaimError::InvalidSignature => RejectCode::InvalidSignature,
            ClaimError::InvalidProof => RejectCode::InvalidProof,
            ClaimError::TransferFailed(_) => RejectCode::TransferFailed,
            ClaimError::LedgerUnavailable(_) => RejectCode::LedgerUnavailable,
        }
    }
}

/// Server error details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed message or field.
    InvalidInput,
    /// Settlement is not accepting requests.
    Unavailable,
    /// Internal server error.
    InternalError,
}

/// Message decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Message was not valid JSON for any known type.
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    /// Address field could not be parsed.
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    /// Amount field could not be parsed.
    #[error("invalid amount: {0:?}")]
    InvalidAmount(String),

    /// Proof node could not be parsed.
    #[error("invalid proof node: {0:?}")]
    InvalidHash(String),

    /// Signature field could not be parsed.
    #[error("invalid signature encoding: {0}")]
    InvalidSignatureEncoding(RecoverError),
}

impl ProtocolError {
    /// Convert to a client-facing error message.
    pub fn to_server_message(&self) -> ServerMessage {
        ServerMessage::Error(ServerError {
            code: ErrorCode::InvalidInput,
            message: self.to_string(),
        })
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }
}
