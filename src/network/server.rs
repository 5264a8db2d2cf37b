//! WebSocket Settlement Server
//!
//! Async WebSocket front end for a single distribution.
//! Queries are answered on the connection task. Claims are funneled through
//! one settlement task so they are processed strictly one after another.
//!
//! ```text
//!   conn ──┐                       ┌──> reply (oneshot)
//!   conn ──┼──> mpsc ──> settle ───┤
//!   conn ──┘                       └──> broadcast Event ──> every conn
//! ```
//!
//! Settlement runs on the blocking pool: a claim may write the ledger store.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::core::hash::hash_to_hex;
use crate::distribution::distributor::{ClaimError, ClaimEvent, Distributor};
use crate::distribution::token::TokenLedger;
use crate::network::protocol::{
    parse_account, parse_amount, ClaimReceipt, ClientMessage, DistributionInfo, ErrorCode,
    ParsedClaim, RejectCode, ServerError, ServerMessage,
};

/// Pending claims the settlement task will queue before pushing back.
const SETTLEMENT_QUEUE: usize = 256;

/// Settled-claim events buffered per connection.
const EVENT_BUFFER: usize = 1024;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Idle time after which a connection is dropped.
    pub connection_timeout: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8545)),
            max_connections: 1000,
            connection_timeout: Duration::from_secs(300),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Settlement server errors.
#[derive(Debug, thiserror::Error)]
pub enum ClaimServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Connected client state.
struct ConnectedClient {
    addr: SocketAddr,
    connected_at: Instant,
}

/// A claim waiting for the settlement task.
struct SettleRequest {
    claim: ParsedClaim,
    reply: oneshot::Sender<Result<ClaimEvent, ClaimError>>,
}

/// Handle to the settlement task.
#[derive(Clone)]
pub struct SettlementHandle {
    tx: mpsc::Sender<SettleRequest>,
}

impl SettlementHandle {
    /// Start the settlement task.
    ///
    /// Each settled claim is published on `events`. The task ends once
    /// every handle is dropped.
    pub fn spawn<T: TokenLedger + 'static>(
        distributor: Arc<Distributor<T>>,
        events: broadcast::Sender<ClaimReceipt>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<SettleRequest>(SETTLEMENT_QUEUE);

        tokio::spawn(async move {
            while let Some(SettleRequest { claim, reply }) = rx.recv().await {
                let account = claim.account;
                let distributor = distributor.clone();
                let settled = tokio::task::spawn_blocking(move || {
                    distributor.claim(claim.account, claim.amount, &claim.proof, &claim.signature)
                })
                .await;

                let result = match settled {
                    Ok(result) => result,
                    Err(e) => {
                        // Dropping the reply surfaces as Unavailable to the claimant.
                        error!("Settlement of {} aborted: {}", account.short(), e);
                        continue;
                    }
                };

                if let Ok(event) = &result {
                    // No subscribers is fine.
                    let _ = events.send(ClaimReceipt::from(event));
                }

                if reply.send(result).is_err() {
                    debug!("Claimant for {} went away before settlement", account.short());
                }
            }
            debug!("Settlement task stopped");
        });

        Self { tx }
    }

    /// Submit a claim and wait for its outcome.
    ///
    /// Returns None if the settlement task is gone.
    pub async fn settle(&self, claim: ParsedClaim) -> Option<Result<ClaimEvent, ClaimError>> {
        let (reply, outcome) = oneshot::channel();
        self.tx.send(SettleRequest { claim, reply }).await.ok()?;
        outcome.await.ok()
    }
}

/// The settlement server.
pub struct ClaimServer<T: TokenLedger + 'static> {
    /// Server configuration.
    config: ServerConfig,
    /// Distribution being served.
    distributor: Arc<Distributor<T>>,
    /// Claim serializer.
    settlement: SettlementHandle,
    /// Connected clients.
    clients: Arc<RwLock<BTreeMap<Uuid, ConnectedClient>>>,
    /// Settled-claim broadcast.
    events_tx: broadcast::Sender<ClaimReceipt>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl<T: TokenLedger + 'static> ClaimServer<T> {
    /// Create a server and start its settlement task.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(config: ServerConfig, distributor: Arc<Distributor<T>>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);
        let settlement = SettlementHandle::spawn(distributor.clone(), events_tx.clone());

        Self {
            config,
            distributor,
            settlement,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            events_tx,
            shutdown_tx,
        }
    }

    /// Bind and run the server until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), ClaimServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run the accept loop on an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ClaimServerError> {
        info!(
            "Settlement server v{} listening on {} (root {})",
            self.config.version,
            listener.local_addr()?,
            hash_to_hex(&self.distributor.merkle_root())
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let conn_id = Uuid::new_v4();
        let clients = self.clients.clone();
        let distributor = self.distributor.clone();
        let settlement = self.settlement.clone();
        let timeout = self.config.connection_timeout;
        let mut events_rx = self.events_tx.subscribe();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!("New connection {} from {}", conn_id, addr);

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);

            clients.write().await.insert(
                conn_id,
                ConnectedClient {
                    addr,
                    connected_at: Instant::now(),
                },
            );

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            loop {
                tokio::select! {
                    msg = tokio::time::timeout(timeout, ws_receiver.next()) => {
                        let msg = match msg {
                            Ok(msg) => msg,
                            Err(_) => {
                                debug!("Connection {} idle, closing", conn_id);
                                break;
                            }
                        };
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let reply = match ClientMessage::from_json(&text) {
                                    Ok(client_msg) => {
                                        Self::handle_client_message(client_msg, &distributor, &settlement).await
                                    }
                                    Err(e) => {
                                        debug!("Invalid message on {}: {}", conn_id, e);
                                        e.to_server_message()
                                    }
                                };
                                if msg_tx.send(reply).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                let _ = msg_tx.send(ServerMessage::Error(ServerError {
                                    code: ErrorCode::InvalidInput,
                                    message: "binary frames are not supported".to_string(),
                                })).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Connection {} closed by peer", conn_id);
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("WebSocket error on {}: {}", conn_id, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    event = events_rx.recv() => {
                        match event {
                            Ok(receipt) => {
                                if msg_tx.send(ServerMessage::Event(receipt)).await.is_err() {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!("Connection {} missed {} claim events", conn_id, skipped);
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Let queued replies flush before tearing down the socket.
            drop(msg_tx);
            let _ = sender_task.await;

            if let Some(client) = clients.write().await.remove(&conn_id) {
                info!(
                    "Connection {} from {} cleaned up after {:?}",
                    conn_id,
                    client.addr,
                    client.connected_at.elapsed()
                );
            }
        });
    }

    /// Handle a client message.
    async fn handle_client_message(
        msg: ClientMessage,
        distributor: &Distributor<T>,
        settlement: &SettlementHandle,
    ) -> ServerMessage {
        match msg {
            ClientMessage::Claim(request) => {
                let claim = match request.parse() {
                    Ok(claim) => claim,
                    Err(e) => return e.to_server_message(),
                };
                let account = claim.account;

                match settlement.settle(claim).await {
                    Some(Ok(event)) => ServerMessage::Claimed(ClaimReceipt::from(&event)),
                    Some(Err(e)) => ServerMessage::ClaimRejected {
                        account: account.to_hex(),
                        code: RejectCode::from(&e),
                        message: e.to_string(),
                    },
                    None => ServerMessage::Error(ServerError {
                        code: ErrorCode::Unavailable,
                        message: "settlement is not running".to_string(),
                    }),
                }
            }
            ClientMessage::MessageHash { account, amount } => {
                let parsed = parse_account(&account).and_then(|a| Ok((a, parse_amount(&amount)?)));
                match parsed {
                    Ok((address, value)) => ServerMessage::MessageHash {
                        digest: hash_to_hex(&distributor.message_hash(&address, value)),
                        account: address.to_hex(),
                        amount: value.to_string(),
                    },
                    Err(e) => e.to_server_message(),
                }
            }
            ClientMessage::HasClaimed { account } => match parse_account(&account) {
                Ok(address) => ServerMessage::ClaimStatus {
                    account: address.to_hex(),
                    claimed: distributor.has_claimed(&address),
                },
                Err(e) => e.to_server_message(),
            },
            ClientMessage::DistributionInfo => {
                let domain = distributor.domain();
                ServerMessage::DistributionInfo(DistributionInfo {
                    merkle_root: hash_to_hex(&distributor.merkle_root()),
                    token: distributor.distribution_asset().to_hex(),
                    name: domain.name.clone(),
                    version: domain.version.clone(),
                    chain_id: domain.chain_id,
                    verifying_contract: domain.verifying_contract.to_hex(),
                    domain_separator: hash_to_hex(&distributor.domain_separator()),
                    claimed_count: distributor.claimed_count() as u64,
                })
            }
            ClientMessage::Ping { timestamp } => ServerMessage::Pong {
                timestamp,
                server_time: SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64,
            },
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get current connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Subscribe to settled-claim events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClaimReceipt> {
        self.events_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    use crate::core::address::Address;
    use crate::distribution::digest::TypedDataDomain;
    use crate::distribution::distributor::DistributionConfig;
    use crate::distribution::ledger::FileLedgerStore;
    use crate::distribution::token::InMemoryToken;
    use crate::network::protocol::ClaimRequest;
    use crate::test_support::{address_of, sign_digest, signing_key, tokens, AllowlistTree};

    fn contract() -> Address {
        Address::new([0xc0; 20])
    }

    struct Fixture {
        distributor: Arc<Distributor<InMemoryToken>>,
        tree: AllowlistTree,
        entries: Vec<(Address, U256)>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::build(None)
        }

        fn with_store(store: FileLedgerStore) -> Self {
            Self::build(Some(store))
        }

        fn build(store: Option<FileLedgerStore>) -> Self {
            let entries = vec![
                (address_of(&signing_key(1)), tokens(25)),
                (address_of(&signing_key(2)), tokens(10)),
                (address_of(&signing_key(3)), tokens(5)),
            ];
            let tree = AllowlistTree::new(&entries);

            let token = InMemoryToken::new(contract());
            token.mint(contract(), tokens(1000));
            let config = DistributionConfig {
                merkle_root: tree.root(),
                token: Address::new([0x70; 20]),
                domain: TypedDataDomain::new(31337, contract()),
            };

            let mut distributor = Distributor::new(config, token).unwrap();
            if let Some(store) = store {
                distributor = distributor.with_store(store);
            }

            Self {
                distributor: Arc::new(distributor),
                tree,
                entries,
            }
        }

        /// Claim request for entry `index`, signed by key `index + 1`.
        fn request(&self, index: usize) -> ClientMessage {
            let (account, amount) = self.entries[index];
            let digest = self.distributor.message_hash(&account, amount);
            let signature = sign_digest(&signing_key(index as u8 + 1), &digest);
            ClientMessage::Claim(ClaimRequest::new(
                &account,
                amount,
                &self.tree.proof(index).unwrap(),
                &signature,
            ))
        }

        fn settlement(&self) -> (SettlementHandle, broadcast::Receiver<ClaimReceipt>) {
            let (events_tx, events_rx) = broadcast::channel(16);
            let handle = SettlementHandle::spawn(self.distributor.clone(), events_tx);
            (handle, events_rx)
        }

        async fn respond(&self, settlement: &SettlementHandle, msg: ClientMessage) -> ServerMessage {
            ClaimServer::<InMemoryToken>::handle_client_message(msg, &self.distributor, settlement).await
        }
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:8545".parse().unwrap());
        assert_eq!(config.max_connections, 1000);
    }

    #[tokio::test]
    async fn test_claim_settles_and_broadcasts() {
        let fixture = Fixture::new();
        let (settlement, mut events) = fixture.settlement();
        let (account, _) = fixture.entries[0];

        let reply = fixture.respond(&settlement, fixture.request(0)).await;
        let expected = ClaimReceipt {
            sequence: 0,
            account: account.to_hex(),
            amount: tokens(25).to_string(),
        };
        assert_eq!(reply, ServerMessage::Claimed(expected.clone()));
        assert_eq!(events.recv().await.unwrap(), expected);
        assert_eq!(fixture.distributor.token().balance_of(&account), tokens(25));
    }

    #[tokio::test]
    async fn test_duplicate_claim_rejected() {
        let fixture = Fixture::new();
        let (settlement, _events) = fixture.settlement();

        fixture.respond(&settlement, fixture.request(1)).await;
        let reply = fixture.respond(&settlement, fixture.request(1)).await;

        match reply {
            ServerMessage::ClaimRejected { code, .. } => assert_eq!(code, RejectCode::AlreadyClaimed),
            other => panic!("unexpected reply: {:?}", other),
        }
        assert_eq!(fixture.distributor.claimed_count(), 1);
    }

    #[tokio::test]
    async fn test_wrong_signer_rejected() {
        let fixture = Fixture::new();
        let (settlement, _events) = fixture.settlement();

        let (account, amount) = fixture.entries[0];
        let digest = fixture.distributor.message_hash(&account, amount);
        let forged = sign_digest(&signing_key(9), &digest);
        let msg = ClientMessage::Claim(ClaimRequest::new(
            &account,
            amount,
            &fixture.tree.proof(0).unwrap(),
            &forged,
        ));

        match fixture.respond(&settlement, msg).await {
            ServerMessage::ClaimRejected { code, .. } => assert_eq!(code, RejectCode::InvalidSignature),
            other => panic!("unexpected reply: {:?}", other),
        }
        assert!(!fixture.distributor.has_claimed(&account));
    }

    #[tokio::test]
    async fn test_malformed_claim_is_input_error() {
        let fixture = Fixture::new();
        let (settlement, _events) = fixture.settlement();

        let msg = ClientMessage::Claim(ClaimRequest {
            account: "not-an-address".to_string(),
            amount: "1".to_string(),
            proof: vec![],
            signature: "0x".to_string(),
        });
        assert!(matches!(
            fixture.respond(&settlement, msg).await,
            ServerMessage::Error(ServerError { code: ErrorCode::InvalidInput, .. })
        ));
    }

    #[tokio::test]
    async fn test_settled_claims_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLedgerStore::new(dir.path().join("ledger.bin"));
        let fixture = Fixture::with_store(store.clone());
        let (settlement, _events) = fixture.settlement();

        fixture.respond(&settlement, fixture.request(2)).await;

        let snapshot = store.load().unwrap().unwrap();
        assert_eq!(snapshot.merkle_root, fixture.tree.root());
        assert_eq!(snapshot.claimed, vec![fixture.entries[2].0]);
    }

    #[tokio::test]
    async fn test_unwritable_ledger_rejects_claim() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLedgerStore::new(dir.path().join("missing").join("ledger.bin"));
        let fixture = Fixture::with_store(store);
        let (settlement, mut events) = fixture.settlement();
        let (account, _) = fixture.entries[0];

        match fixture.respond(&settlement, fixture.request(0)).await {
            ServerMessage::ClaimRejected { code, .. } => assert_eq!(code, RejectCode::LedgerUnavailable),
            other => panic!("unexpected reply: {:?}", other),
        }
        assert!(!fixture.distributor.has_claimed(&account));
        assert_eq!(fixture.distributor.token().balance_of(&account), U256::ZERO);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_queries() {
        let fixture = Fixture::new();
        let (settlement, _events) = fixture.settlement();
        let (account, amount) = fixture.entries[0];

        let reply = fixture
            .respond(
                &settlement,
                ClientMessage::MessageHash {
                    account: account.to_hex(),
                    amount: amount.to_string(),
                },
            )
            .await;
        assert_eq!(
            reply,
            ServerMessage::MessageHash {
                account: account.to_hex(),
                amount: amount.to_string(),
                digest: hash_to_hex(&fixture.distributor.message_hash(&account, amount)),
            }
        );

        let status = ClientMessage::HasClaimed { account: account.to_hex() };
        assert_eq!(
            fixture.respond(&settlement, status.clone()).await,
            ServerMessage::ClaimStatus { account: account.to_hex(), claimed: false }
        );
        fixture.respond(&settlement, fixture.request(0)).await;
        assert_eq!(
            fixture.respond(&settlement, status).await,
            ServerMessage::ClaimStatus { account: account.to_hex(), claimed: true }
        );

        match fixture.respond(&settlement, ClientMessage::DistributionInfo).await {
            ServerMessage::DistributionInfo(info) => {
                assert_eq!(info.merkle_root, hash_to_hex(&fixture.tree.root()));
                assert_eq!(info.chain_id, 31337);
                assert_eq!(info.name, "MerkleAirdrop");
                assert_eq!(info.claimed_count, 1);
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        assert!(matches!(
            fixture.respond(&settlement, ClientMessage::Ping { timestamp: 7 }).await,
            ServerMessage::Pong { timestamp: 7, .. }
        ));
    }

    #[tokio::test]
    async fn test_claim_over_websocket() {
        let fixture = Fixture::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = ServerConfig {
            bind_addr: addr,
            ..Default::default()
        };
        let server = Arc::new(ClaimServer::new(config, fixture.distributor.clone()));
        let running = server.clone();
        let handle = tokio::spawn(async move { running.serve(listener).await });

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
            .await
            .unwrap();
        ws.send(Message::Text(fixture.request(0).to_json().unwrap()))
            .await
            .unwrap();

        // The direct reply and the broadcast may arrive in either order.
        let (mut claimed, mut broadcast) = (false, false);
        while !(claimed && broadcast) {
            let frame = ws.next().await.unwrap().unwrap();
            if let Message::Text(text) = frame {
                match ServerMessage::from_json(&text).unwrap() {
                    ServerMessage::Claimed(receipt) => {
                        assert_eq!(receipt.sequence, 0);
                        claimed = true;
                    }
                    ServerMessage::Event(receipt) => {
                        assert_eq!(receipt.account, fixture.entries[0].0.to_hex());
                        broadcast = true;
                    }
                    other => panic!("unexpected message: {:?}", other),
                }
            }
        }
        assert_eq!(server.connection_count().await, 1);

        server.shutdown();
        handle.await.unwrap().unwrap();
    }
}
