//! JSON-RPC Server for Synthnode
//!
//! Exposes APIs for discovery agents to:
//! - Submit discoveries
//! - Request and process validation
//! - Query discoveries, balances and epoch state
//! - Subscribe to ledger events

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonrpsee::core::{async_trait, RpcResult, SubscriptionResult};
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::PendingSubscriptionSink;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tower_http::cors::{Any, CorsLayer};

use crate::ledger::{EpochState, LedgerError, LedgerEvent, LedgerSummary, PodState};

// ============ RATE LIMITING ============

/// Rate limiter configuration
const RATE_LIMIT_WINDOW_SECS: u64 = 60; // 1 minute window
const SUBMIT_RATE_LIMIT: usize = 100; // Max 100 submissions per minute per discoverer
const TRANSFER_RATE_LIMIT: usize = 50; // Max 50 transfers per minute per sender

/// Rate limit entry tracking request counts
#[derive(Clone, Debug)]
struct RateLimitEntry {
    count: usize,
    window_start: Instant,
}

impl RateLimitEntry {
    fn new() -> Self {
        Self {
            count: 0,
            window_start: Instant::now(),
        }
    }

    /// Check if rate limit is exceeded, and increment counter if not
    fn check_and_increment(&mut self, limit: usize) -> bool {
        let now = Instant::now();

        // Reset if window has passed
        if now.duration_since(self.window_start) > Duration::from_secs(RATE_LIMIT_WINDOW_SECS) {
            self.count = 0;
            self.window_start = now;
        }

        if self.count >= limit {
            return false; // Rate limited
        }

        self.count += 1;
        true // Allowed
    }
}

/// Rate limiter for RPC requests
#[derive(Clone)]
pub struct RateLimiter {
    /// Tracks: (operation_type, key) -> RateLimitEntry
    entries: Arc<RwLock<HashMap<(String, String), RateLimitEntry>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Check if an operation is rate limited
    /// Returns Ok(()) if allowed, Err(message) if rate limited
    pub async fn check(&self, operation: &str, key: &str, limit: usize) -> Result<(), String> {
        let mut entries = self.entries.write().await;
        let cache_key = (operation.to_string(), key.to_string());

        let entry = entries.entry(cache_key).or_insert_with(RateLimitEntry::new);

        if entry.check_and_increment(limit) {
            // Prune stale entries to prevent unbounded growth
            if entries.len() > 500 {
                let now = Instant::now();
                entries.retain(|_, v| {
                    now.duration_since(v.window_start)
                        < Duration::from_secs(RATE_LIMIT_WINDOW_SECS * 2)
                });
            }
            Ok(())
        } else {
            Err(format!(
                "Rate limit exceeded for {}: max {} requests per {} seconds",
                operation, limit, RATE_LIMIT_WINDOW_SECS
            ))
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

// ============ RPC REQUEST/RESPONSE TYPES ============

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmitDiscoveryRequest {
    /// SHA-256 of the discovery content (32 bytes hex)
    pub content_hash: String,
    /// Fingerprint of the fractal/structural encoding (32 bytes hex)
    pub fractal_hash: String,
    /// Address credited with the discovery
    pub discoverer: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmitDiscoveryResponse {
    pub success: bool,
    pub discovery_id: Option<u64>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidateDiscoveryRequest {
    pub discovery_id: u64,
    /// Scores on the 0-10000 scale
    pub coherence_score: u64,
    pub density_score: u64,
    pub novelty_score: u64,
    /// Caller address (must hold the owner or validate capability)
    pub caller: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidateDiscoveryResponse {
    pub success: bool,
    /// True if the discovery passed all threshold gates
    pub validated: Option<bool>,
    /// Whole SYNTH minted to the discoverer (0 on rejection)
    pub reward: Option<u128>,
    pub total_coherence_density: Option<u64>,
    /// Names of epochs entered by this validation (usually empty)
    pub epochs_advanced: Vec<String>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    pub id: u64,
    pub discoverer: String,
    pub content_hash: String,
    pub fractal_hash: String,
    pub coherence_score: u64,
    pub density_score: u64,
    pub novelty_score: u64,
    pub validated: bool,
    pub redundant: bool,
    pub submitted_at: u64,
}

impl From<crate::ledger::Discovery> for DiscoveryResponse {
    fn from(d: crate::ledger::Discovery) -> Self {
        Self {
            id: d.id,
            discoverer: d.discoverer,
            content_hash: hex::encode(d.content_hash),
            fractal_hash: hex::encode(d.fractal_hash),
            coherence_score: d.coherence_score,
            density_score: d.density_score,
            novelty_score: d.novelty_score,
            validated: d.validated,
            redundant: d.redundant,
            submitted_at: d.submitted_at,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestValidationRequest {
    pub discovery_id: u64,
    pub content_hash: String,
    pub fractal_hash: String,
    pub discoverer: String,
    pub caller: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessValidationRequest {
    pub discovery_id: u64,
    pub coherence_score: u64,
    pub density_score: u64,
    pub novelty_score: u64,
    /// Caller address (must be on the validator allow-list)
    pub caller: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingRequestResponse {
    pub discovery_id: u64,
    pub discoverer: String,
    pub content_hash: String,
    pub fractal_hash: String,
    pub requested_at: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizeRequest {
    pub address: String,
    pub caller: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SetEpochThresholdRequest {
    /// Index of the epoch to adjust (0=Founders, 1=Pioneer, 2=Public)
    pub epoch_index: u8,
    /// Density required to leave that epoch
    pub threshold: u64,
    pub caller: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SetEpochThresholdResponse {
    pub success: bool,
    pub epochs_advanced: Vec<String>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from: String,
    pub to: String,
    pub amount: u128,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferResponse {
    pub success: bool,
    pub new_balance: Option<u128>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeStatusResponse {
    pub discovery_count: u64,
    pub validated_count: u64,
    pub redundant_count: u64,
    pub pending_requests: u64,
    pub total_coherence_density: u64,
    pub current_epoch: String,
    pub current_epoch_index: u8,
    pub next_epoch_threshold: Option<u64>,
    pub epoch_progress_percent: f64,
    pub total_minted: u128,
    pub supply_cap: u128,
    pub node_version: String,
    /// True after a poisoned-lock recovery; the node refuses mutations
    /// until restarted.
    pub tainted: bool,
}

impl NodeStatusResponse {
    fn from_summary(summary: LedgerSummary) -> Self {
        Self {
            discovery_count: summary.discovery_count,
            validated_count: summary.validated_count,
            redundant_count: summary.redundant_count,
            pending_requests: summary.pending_requests,
            total_coherence_density: summary.total_coherence_density,
            current_epoch: summary.current_epoch,
            current_epoch_index: summary.current_epoch_index,
            next_epoch_threshold: summary.next_epoch_threshold,
            epoch_progress_percent: summary.epoch_progress_percent,
            total_minted: summary.total_minted,
            supply_cap: summary.supply_cap,
            node_version: env!("CARGO_PKG_VERSION").to_string(),
            tainted: crate::ledger::is_state_tainted(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QualifiedEpochResponse {
    pub density_score: u64,
    pub epoch: String,
    pub epoch_index: u8,
}

/// Event types for subscriptions
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StateEvent {
    #[serde(rename = "snapshot")]
    Snapshot(NodeStatusResponse),
    #[serde(rename = "ledger")]
    Ledger(LedgerEvent),
}

/// Event broadcaster for real-time updates
pub type EventSender = broadcast::Sender<StateEvent>;

// ============ ERROR MAPPING ============

/// Map a ledger error to a JSON-RPC error object with a stable code.
fn rpc_error(e: LedgerError) -> ErrorObjectOwned {
    let code = match &e {
        LedgerError::DuplicateContent => -32001,
        LedgerError::NotFound(_) => -32002,
        LedgerError::AlreadyProcessed(_) => -32003,
        LedgerError::Unauthorized(_) => -32004,
        LedgerError::PendingRequestExists(_) => -32005,
        LedgerError::OutOfRange { .. } => -32006,
        LedgerError::SupplyExceeded { .. } => -32007,
        LedgerError::InsufficientBalance { .. } => -32008,
        LedgerError::Tainted => -32009,
    };
    ErrorObjectOwned::owned(code, e.to_string(), None::<()>)
}

fn parse_hash(hex_str: &str, field: &str) -> Result<[u8; 32], String> {
    match hex::decode(hex_str) {
        Ok(bytes) if bytes.len() == 32 => Ok(bytes.try_into().unwrap()),
        _ => Err(format!("Invalid {} (must be 32 bytes hex)", field)),
    }
}

// ============ RPC TRAIT ============

/// RPC trait definition
#[rpc(server)]
pub trait SynthNodeRpcApi {
    /// Get current node status
    #[method(name = "synth_status")]
    async fn status(&self) -> RpcResult<NodeStatusResponse>;

    /// Submit a new discovery
    #[method(name = "synth_submitDiscovery")]
    async fn submit_discovery(&self, req: SubmitDiscoveryRequest) -> RpcResult<SubmitDiscoveryResponse>;

    /// Finalize a discovery with scores (owner/validator capability)
    #[method(name = "synth_validateDiscovery")]
    async fn validate_discovery(&self, req: ValidateDiscoveryRequest) -> RpcResult<ValidateDiscoveryResponse>;

    /// Get a discovery record by id
    #[method(name = "synth_getDiscovery")]
    async fn get_discovery(&self, discovery_id: u64) -> RpcResult<DiscoveryResponse>;

    /// Page through discovery ids in submission order
    #[method(name = "synth_getDiscoveryIds")]
    async fn get_discovery_ids(&self, offset: u64, count: u64) -> RpcResult<Vec<u64>>;

    /// Total number of discoveries ever submitted
    #[method(name = "synth_getDiscoveryCount")]
    async fn get_discovery_count(&self) -> RpcResult<u64>;

    /// Queue a validation request for an external scorer
    #[method(name = "synth_requestValidation")]
    async fn request_validation(&self, req: RequestValidationRequest) -> RpcResult<AuthorizeResponse>;

    /// Fulfill a pending validation request (allow-listed validators only)
    #[method(name = "synth_processValidation")]
    async fn process_validation(&self, req: ProcessValidationRequest) -> RpcResult<ValidateDiscoveryResponse>;

    /// Get the pending validation request for a discovery, if any
    #[method(name = "synth_getPendingRequest")]
    async fn get_pending_request(&self, discovery_id: u64) -> RpcResult<Option<PendingRequestResponse>>;

    /// Allow-list an address to fulfill validation requests (owner only)
    #[method(name = "synth_authorizeValidator")]
    async fn authorize_validator(&self, req: AuthorizeRequest) -> RpcResult<AuthorizeResponse>;

    /// Remove an address from the validator allow-list (owner only)
    #[method(name = "synth_revokeValidator")]
    async fn revoke_validator(&self, req: AuthorizeRequest) -> RpcResult<AuthorizeResponse>;

    /// Grant the reward-mint capability on the token ledger (owner only)
    #[method(name = "synth_authorizeDistributor")]
    async fn authorize_distributor(&self, req: AuthorizeRequest) -> RpcResult<AuthorizeResponse>;

    /// Adjust a non-terminal epoch's exit threshold (owner only)
    #[method(name = "synth_setEpochThreshold")]
    async fn set_epoch_threshold(&self, req: SetEpochThresholdRequest) -> RpcResult<SetEpochThresholdResponse>;

    /// SYNTH balance of an address
    #[method(name = "synth_getBalance")]
    async fn get_balance(&self, address: String) -> RpcResult<u128>;

    /// Transfer SYNTH between addresses
    #[method(name = "synth_transfer")]
    async fn transfer(&self, req: TransferRequest) -> RpcResult<TransferResponse>;

    /// Highest epoch a density score qualifies for (pure lookup)
    #[method(name = "synth_getQualifiedEpoch")]
    async fn get_qualified_epoch(&self, density_score: u64) -> RpcResult<QualifiedEpochResponse>;

    /// Running sum of density scores of all validated discoveries
    #[method(name = "synth_totalCoherenceDensity")]
    async fn total_coherence_density(&self) -> RpcResult<u64>;

    /// Subscribe to ledger events
    #[subscription(name = "synth_subscribeEvents" => "synth_ledgerEvent", unsubscribe = "synth_unsubscribeEvents", item = StateEvent)]
    async fn subscribe_events(&self) -> SubscriptionResult;
}

// ============ SERVER IMPLEMENTATION ============

/// RPC server implementation with rate limiting
pub struct SynthNodeRpcServerImpl {
    state: PodState,
    event_tx: EventSender,
    rate_limiter: RateLimiter,
}

impl SynthNodeRpcServerImpl {
    pub fn new(state: PodState, event_tx: EventSender) -> Self {
        Self {
            state,
            event_tx,
            rate_limiter: RateLimiter::new(),
        }
    }

    fn emit(&self, event: LedgerEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(StateEvent::Ledger(event));
    }

    fn emit_validation_events(&self, outcome: &crate::ledger::ValidateOutcome, coherence: u64, novelty: u64) {
        if outcome.validated {
            self.emit(LedgerEvent::DiscoveryValidated {
                discovery_id: outcome.discovery_id,
                discoverer: outcome.discoverer.clone(),
                reward: outcome.reward,
                density_score: outcome.density_score,
                total_coherence_density: outcome.total_coherence_density,
            });
            for epoch in &outcome.epochs_advanced {
                self.emit(LedgerEvent::EpochAdvanced {
                    epoch: epoch.name().to_string(),
                    epoch_index: epoch.as_index(),
                    coherence_density: outcome.total_coherence_density,
                });
            }
        } else {
            self.emit(LedgerEvent::DiscoveryRejected {
                discovery_id: outcome.discovery_id,
                coherence_score: coherence,
                density_score: outcome.density_score,
                novelty_score: novelty,
            });
        }
    }

    fn validation_response(outcome: crate::ledger::ValidateOutcome) -> ValidateDiscoveryResponse {
        ValidateDiscoveryResponse {
            success: true,
            validated: Some(outcome.validated),
            reward: Some(outcome.reward),
            total_coherence_density: Some(outcome.total_coherence_density),
            epochs_advanced: outcome
                .epochs_advanced
                .iter()
                .map(|e| e.name().to_string())
                .collect(),
            error: None,
        }
    }

    fn validation_failure(e: LedgerError) -> ValidateDiscoveryResponse {
        ValidateDiscoveryResponse {
            success: false,
            validated: None,
            reward: None,
            total_coherence_density: None,
            epochs_advanced: Vec::new(),
            error: Some(e.to_string()),
        }
    }
}

#[async_trait]
impl SynthNodeRpcApiServer for SynthNodeRpcServerImpl {
    async fn status(&self) -> RpcResult<NodeStatusResponse> {
        Ok(NodeStatusResponse::from_summary(self.state.summary()))
    }

    async fn submit_discovery(&self, req: SubmitDiscoveryRequest) -> RpcResult<SubmitDiscoveryResponse> {
        // Rate limit submissions per discoverer
        if let Err(e) = self
            .rate_limiter
            .check("submit", &req.discoverer, SUBMIT_RATE_LIMIT)
            .await
        {
            return Ok(SubmitDiscoveryResponse {
                success: false,
                discovery_id: None,
                error: Some(e),
            });
        }

        let content_hash = match parse_hash(&req.content_hash, "content hash") {
            Ok(h) => h,
            Err(e) => {
                return Ok(SubmitDiscoveryResponse {
                    success: false,
                    discovery_id: None,
                    error: Some(e),
                })
            }
        };
        let fractal_hash = match parse_hash(&req.fractal_hash, "fractal hash") {
            Ok(h) => h,
            Err(e) => {
                return Ok(SubmitDiscoveryResponse {
                    success: false,
                    discovery_id: None,
                    error: Some(e),
                })
            }
        };

        match self.state.submit_discovery(content_hash, fractal_hash, &req.discoverer) {
            Ok(outcome) => {
                self.emit(LedgerEvent::DiscoverySubmitted {
                    discovery_id: outcome.discovery_id,
                    discoverer: req.discoverer.clone(),
                    content_hash: req.content_hash.clone(),
                });
                Ok(SubmitDiscoveryResponse {
                    success: true,
                    discovery_id: Some(outcome.discovery_id),
                    error: None,
                })
            }
            Err(e) => Ok(SubmitDiscoveryResponse {
                success: false,
                discovery_id: None,
                error: Some(e.to_string()),
            }),
        }
    }

    async fn validate_discovery(&self, req: ValidateDiscoveryRequest) -> RpcResult<ValidateDiscoveryResponse> {
        match self.state.validate_discovery(
            req.discovery_id,
            req.coherence_score,
            req.density_score,
            req.novelty_score,
            &req.caller,
        ) {
            Ok(outcome) => {
                self.emit_validation_events(&outcome, req.coherence_score, req.novelty_score);
                Ok(Self::validation_response(outcome))
            }
            Err(e) => Ok(Self::validation_failure(e)),
        }
    }

    async fn get_discovery(&self, discovery_id: u64) -> RpcResult<DiscoveryResponse> {
        self.state
            .get_discovery(discovery_id)
            .map(DiscoveryResponse::from)
            .map_err(rpc_error)
    }

    async fn get_discovery_ids(&self, offset: u64, count: u64) -> RpcResult<Vec<u64>> {
        self.state.get_discovery_ids(offset, count).map_err(rpc_error)
    }

    async fn get_discovery_count(&self) -> RpcResult<u64> {
        Ok(self.state.get_discovery_count())
    }

    async fn request_validation(&self, req: RequestValidationRequest) -> RpcResult<AuthorizeResponse> {
        let content_hash = match parse_hash(&req.content_hash, "content hash") {
            Ok(h) => h,
            Err(e) => return Ok(AuthorizeResponse { success: false, error: Some(e) }),
        };
        let fractal_hash = match parse_hash(&req.fractal_hash, "fractal hash") {
            Ok(h) => h,
            Err(e) => return Ok(AuthorizeResponse { success: false, error: Some(e) }),
        };

        match self.state.request_validation(
            req.discovery_id,
            content_hash,
            fractal_hash,
            &req.discoverer,
            &req.caller,
        ) {
            Ok(()) => Ok(AuthorizeResponse { success: true, error: None }),
            Err(e) => Ok(AuthorizeResponse {
                success: false,
                error: Some(e.to_string()),
            }),
        }
    }

    async fn process_validation(&self, req: ProcessValidationRequest) -> RpcResult<ValidateDiscoveryResponse> {
        match self.state.process_validation(
            req.discovery_id,
            req.coherence_score,
            req.density_score,
            req.novelty_score,
            &req.caller,
        ) {
            Ok(outcome) => {
                self.emit_validation_events(&outcome, req.coherence_score, req.novelty_score);
                Ok(Self::validation_response(outcome))
            }
            Err(e) => Ok(Self::validation_failure(e)),
        }
    }

    async fn get_pending_request(&self, discovery_id: u64) -> RpcResult<Option<PendingRequestResponse>> {
        Ok(self.state.pending_request(discovery_id).map(|r| PendingRequestResponse {
            discovery_id: r.discovery_id,
            discoverer: r.discoverer,
            content_hash: hex::encode(r.content_hash),
            fractal_hash: hex::encode(r.fractal_hash),
            requested_at: r.requested_at,
        }))
    }

    async fn authorize_validator(&self, req: AuthorizeRequest) -> RpcResult<AuthorizeResponse> {
        match self.state.authorize_validator(&req.address, &req.caller) {
            Ok(()) => Ok(AuthorizeResponse { success: true, error: None }),
            Err(e) => Ok(AuthorizeResponse {
                success: false,
                error: Some(e.to_string()),
            }),
        }
    }

    async fn revoke_validator(&self, req: AuthorizeRequest) -> RpcResult<AuthorizeResponse> {
        match self.state.revoke_validator(&req.address, &req.caller) {
            Ok(()) => Ok(AuthorizeResponse { success: true, error: None }),
            Err(e) => Ok(AuthorizeResponse {
                success: false,
                error: Some(e.to_string()),
            }),
        }
    }

    async fn authorize_distributor(&self, req: AuthorizeRequest) -> RpcResult<AuthorizeResponse> {
        match self.state.authorize_distributor(&req.address, &req.caller) {
            Ok(()) => Ok(AuthorizeResponse { success: true, error: None }),
            Err(e) => Ok(AuthorizeResponse {
                success: false,
                error: Some(e.to_string()),
            }),
        }
    }

    async fn set_epoch_threshold(&self, req: SetEpochThresholdRequest) -> RpcResult<SetEpochThresholdResponse> {
        let epoch = match req.epoch_index {
            0 => EpochState::Founders,
            1 => EpochState::Pioneer,
            2 => EpochState::Public,
            other => {
                return Ok(SetEpochThresholdResponse {
                    success: false,
                    epochs_advanced: Vec::new(),
                    error: Some(format!("Invalid epoch index {} (must be 0-2)", other)),
                })
            }
        };

        match self.state.set_epoch_threshold(epoch, req.threshold, &req.caller) {
            Ok(advanced) => {
                let density = self.state.total_coherence_density();
                for epoch in &advanced {
                    self.emit(LedgerEvent::EpochAdvanced {
                        epoch: epoch.name().to_string(),
                        epoch_index: epoch.as_index(),
                        coherence_density: density,
                    });
                }
                Ok(SetEpochThresholdResponse {
                    success: true,
                    epochs_advanced: advanced.iter().map(|e| e.name().to_string()).collect(),
                    error: None,
                })
            }
            Err(e) => Ok(SetEpochThresholdResponse {
                success: false,
                epochs_advanced: Vec::new(),
                error: Some(e.to_string()),
            }),
        }
    }

    async fn get_balance(&self, address: String) -> RpcResult<u128> {
        Ok(self.state.balance_of(&address))
    }

    async fn transfer(&self, req: TransferRequest) -> RpcResult<TransferResponse> {
        // Rate limit transfers per sender
        if let Err(e) = self.rate_limiter.check("transfer", &req.from, TRANSFER_RATE_LIMIT).await {
            return Ok(TransferResponse {
                success: false,
                new_balance: None,
                error: Some(e),
            });
        }

        match self.state.transfer(&req.from, &req.to, req.amount) {
            Ok(()) => {
                tracing::info!("💸 Transfer: {} SYNTH from {} to {}", req.amount, req.from, req.to);
                Ok(TransferResponse {
                    success: true,
                    new_balance: Some(self.state.balance_of(&req.from)),
                    error: None,
                })
            }
            Err(e) => Ok(TransferResponse {
                success: false,
                new_balance: None,
                error: Some(e.to_string()),
            }),
        }
    }

    async fn get_qualified_epoch(&self, density_score: u64) -> RpcResult<QualifiedEpochResponse> {
        let epoch = self.state.qualified_epoch(density_score);
        Ok(QualifiedEpochResponse {
            density_score,
            epoch: epoch.name().to_string(),
            epoch_index: epoch.as_index(),
        })
    }

    async fn total_coherence_density(&self) -> RpcResult<u64> {
        Ok(self.state.total_coherence_density())
    }

    async fn subscribe_events(&self, pending: PendingSubscriptionSink) -> SubscriptionResult {
        let sink = pending.accept().await?;
        let mut rx = self.event_tx.subscribe();

        // Send initial snapshot
        let snapshot = NodeStatusResponse::from_summary(self.state.summary());
        let _ = sink
            .send(jsonrpsee::SubscriptionMessage::from_json(&StateEvent::Snapshot(snapshot))?)
            .await;

        // Forward events to subscriber
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Ok(msg) = jsonrpsee::SubscriptionMessage::from_json(&event) {
                            if sink.send(msg).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(())
    }
}

/// Start the RPC server with event broadcasting
pub async fn start_rpc_server(
    state: PodState,
    addr: std::net::SocketAddr,
) -> anyhow::Result<(ServerHandle, EventSender)> {
    // Create event broadcast channel
    let (event_tx, _) = broadcast::channel::<StateEvent>(100);

    // Configure CORS — default allows any origin for devnet convenience.
    // In production, set SYNTHNODE_CORS_ORIGINS env var to restrict.
    if std::env::var("SYNTHNODE_CORS_ORIGINS").is_err() {
        tracing::warn!("⚠️ CORS allows ANY origin (devnet default). Set SYNTHNODE_CORS_ORIGINS to restrict in production.");
    }
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let middleware = tower::ServiceBuilder::new().layer(cors);

    let server = Server::builder()
        .set_http_middleware(middleware)
        .build(addr)
        .await?;

    let rpc_module = SynthNodeRpcServerImpl::new(state, event_tx.clone()).into_rpc();

    let handle = server.start(rpc_module);

    tracing::info!("🌐 JSON-RPC server started on http://{}", addr);
    tracing::info!("📡 WebSocket subscriptions available at ws://{}", addr);

    Ok((handle, event_tx))
}
