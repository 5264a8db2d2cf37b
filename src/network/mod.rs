//! Network Layer
//!
//! WebSocket front end for a running distribution.
//! Claim semantics live in `distribution/`; this layer only decodes,
//! serializes and fans out.

pub mod protocol;
pub mod server;

pub use protocol::{ClaimReceipt, ClaimRequest, ClientMessage, ProtocolError, ServerMessage};
pub use server::{ClaimServer, ClaimServerError, ServerConfig, SettlementHandle};
