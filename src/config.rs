//! Service Configuration
//!
//! Everything the binary needs is read from `AIRDROP_*` environment
//! variables. Parsing goes through a lookup function so tests never touch
//! the process environment.

use std::net::SocketAddr;
use std::path::PathBuf;

use alloy_primitives::U256;

use crate::core::address::Address;
use crate::core::hash::{parse_hash, Hash32};
use crate::distribution::digest::{TypedDataDomain, DEFAULT_NAME, DEFAULT_VERSION};
use crate::distribution::distributor::DistributionConfig;
use crate::network::server::ServerConfig;

/// Default listen address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8545";

/// Default connection limit.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1000;

/// Default chain id.
pub const DEFAULT_CHAIN_ID: u64 = 1;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Required variable not set.
    #[error("missing required variable {0}")]
    Missing(&'static str),

    /// Variable set but unparseable.
    #[error("invalid value for {var}: {value:?}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },

    /// Merkle root is all zeros.
    #[error("merkle root must be non-zero")]
    ZeroMerkleRoot,

    /// A required address is the zero address.
    #[error("{0} address must be non-zero")]
    ZeroAddress(&'static str),
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Listener settings.
    pub server: ServerConfig,
    /// Distribution parameters.
    pub distribution: DistributionConfig,
    /// Tokens credited to the distribution at startup.
    pub treasury_balance: U256,
    /// Where the claim ledger is persisted, if anywhere.
    pub ledger_path: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let server = ServerConfig {
            bind_addr: vars.parse_or("AIRDROP_BIND_ADDR", DEFAULT_BIND_ADDR, |s| {
                s.parse::<SocketAddr>().ok()
            })?,
            max_connections: vars.parse_or(
                "AIRDROP_MAX_CONNECTIONS",
                &DEFAULT_MAX_CONNECTIONS.to_string(),
                |s| s.parse::<usize>().ok(),
            )?,
            ..ServerConfig::default()
        };

        let merkle_root: Hash32 = vars.parse_required("AIRDROP_MERKLE_ROOT", parse_hash)?;
        if merkle_root == [0u8; 32] {
            return Err(ConfigError::ZeroMerkleRoot);
        }

        let token = vars.parse_required("AIRDROP_TOKEN", |s| s.parse::<Address>().ok())?;
        if token.is_zero() {
            return Err(ConfigError::ZeroAddress("token"));
        }

        let verifying_contract =
            vars.parse_required("AIRDROP_VERIFYING_CONTRACT", |s| s.parse::<Address>().ok())?;
        if verifying_contract.is_zero() {
            return Err(ConfigError::ZeroAddress("verifying contract"));
        }

        let domain = TypedDataDomain {
            name: vars.get("AIRDROP_NAME").unwrap_or_else(|| DEFAULT_NAME.to_string()),
            version: vars.get("AIRDROP_VERSION").unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            chain_id: vars.parse_or("AIRDROP_CHAIN_ID", &DEFAULT_CHAIN_ID.to_string(), |s| {
                s.parse::<u64>().ok()
            })?,
            verifying_contract,
        };

        let treasury_balance =
            vars.parse_or("AIRDROP_TREASURY_BALANCE", "0", |s| U256::from_str_radix(s, 10).ok())?;

        Ok(Self {
            server,
            distribution: DistributionConfig {
                merkle_root,
                token,
                domain,
            },
            treasury_balance,
            ledger_path: vars.get("AIRDROP_LEDGER_PATH").map(PathBuf::from),
        })
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, var: &str) -> Option<String> {
        (self.lookup)(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn parse_required<T>(
        &self,
        var: &'static str,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Result<T, ConfigError> {
        let value = self.get(var).ok_or(ConfigError::Missing(var))?;
        parse(&value).ok_or(ConfigError::Invalid { var, value })
    }

    fn parse_or<T>(
        &self,
        var: &'static str,
        default: &str,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Result<T, ConfigError> {
        let value = self.get(var).unwrap_or_else(|| default.to_string());
        parse(&value).ok_or(ConfigError::Invalid { var, value })
    }
}
