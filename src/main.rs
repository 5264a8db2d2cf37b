//! Merkle Airdrop Server
//!
//! Serves one distribution over WebSocket. Configuration comes from
//! `AIRDROP_*` environment variables; log level from `RUST_LOG`.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use merkle_airdrop::{
    core::hash::hash_to_hex,
    distribution::FileLedgerStore,
    network::ClaimServer,
    AppConfig, Distributor, InMemoryToken, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    info!("Merkle Airdrop Server v{}", VERSION);

    let config = AppConfig::from_env().context("invalid configuration")?;
    let domain = &config.distribution.domain;
    info!("Merkle root: {}", hash_to_hex(&config.distribution.merkle_root));
    info!("Token: {}", config.distribution.token);
    info!(
        "Domain: {} v{} on chain {} at {}",
        domain.name, domain.version, domain.chain_id, domain.verifying_contract
    );

    // The distribution pays out of the verifying contract's holdings.
    let holder = domain.verifying_contract;
    let token = InMemoryToken::new(holder);
    token.mint(holder, config.treasury_balance);
    info!("Treasury balance: {}", config.treasury_balance);

    let store = config.ledger_path.clone().map(FileLedgerStore::new);
    let snapshot = match &store {
        Some(store) => store
            .load()
            .with_context(|| format!("failed to load ledger from {}", store.path().display()))?,
        None => {
            warn!("AIRDROP_LEDGER_PATH not set, claims will not survive a restart");
            None
        }
    };

    let mut distributor = match snapshot {
        Some(snapshot) => {
            info!("Resuming with {} settled claims", snapshot.claimed.len());
            Distributor::from_snapshot(config.distribution.clone(), token, snapshot)?
        }
        None => Distributor::new(config.distribution.clone(), token)?,
    };
    if let Some(store) = store {
        distributor = distributor.with_store(store);
    }

    let server = Arc::new(ClaimServer::new(config.server.clone(), Arc::new(distributor)));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            signal_server.shutdown();
        }
    });

    server.run().await?;
    info!("Server stopped");
    Ok(())
}
