//! Discovery registry and top-level ledger state
//!
//! Owns the discovery records, the content-hash dedup index, the ordered
//! discovery list and the global density accumulator; calls the score
//! policy and the token ledger. All mutating operations serialize on one
//! write lock and either fully apply or fail with zero state change.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::LedgerError;
use super::gateway::{ValidationRequest, ValidatorGateway};
use super::score::{reward_for, ScoreValidator, SCORE_SCALE};
use super::token::{EpochState, TokenLedger};
use crate::storage::{PersistedState, Storage, WalOp};

/// Synthetic address the registry acts under when calling the token
/// ledger. Authorized as a distributor at genesis, mirroring the
/// deploy-time `authorizeDistributor(registry)` grant.
pub const REGISTRY_ADDRESS: &str = "pod-registry";

/// Checkpoint the full state every N mutations (WAL covers the gap).
const CHECKPOINT_INTERVAL: u64 = 10;

/// Global tainted flag — set when a poisoned RwLock is recovered.
/// Once tainted, state-mutating operations refuse to proceed to prevent
/// operating on partially-corrupted state after a thread panic.
static STATE_TAINTED: AtomicBool = AtomicBool::new(false);

/// Check if state has been tainted by a lock poisoning event.
pub fn is_state_tainted() -> bool {
    STATE_TAINTED.load(Ordering::SeqCst)
}

/// Extension trait that recovers from poisoned RwLocks gracefully,
/// but marks the state as TAINTED to prevent further mutations.
trait PoisonRecover<T> {
    fn read_or_recover(&self) -> RwLockReadGuard<'_, T>;
    fn write_or_recover(&self) -> RwLockWriteGuard<'_, T>;
}

impl<T> PoisonRecover<T> for RwLock<T> {
    fn read_or_recover(&self) -> RwLockReadGuard<'_, T> {
        self.read().unwrap_or_else(|poisoned| {
            tracing::error!("🚨 RwLock was poisoned (read) — state is TAINTED, node should be restarted");
            STATE_TAINTED.store(true, Ordering::SeqCst);
            poisoned.into_inner()
        })
    }
    fn write_or_recover(&self) -> RwLockWriteGuard<'_, T> {
        self.write().unwrap_or_else(|poisoned| {
            tracing::error!("🚨 RwLock was poisoned (write) — state is TAINTED, node should be restarted");
            STATE_TAINTED.store(true, Ordering::SeqCst);
            poisoned.into_inner()
        })
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Hash raw content into the 256-bit fingerprint used for dedup.
pub fn hash_content(content: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hasher.finalize().into()
}

/// Registry-level capabilities. Modeled as an explicit capability table
/// (address -> role set) rather than identity special-cases.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Role {
    /// Node owner: may grant roles, authorize validators/distributors
    /// and adjust epoch thresholds.
    Owner,
    /// May finalize validation directly on the registry.
    Validate,
}

/// A discovery record. Created unvalidated at submit time, mutated
/// exactly once at validate time (to validated or redundant), immutable
/// thereafter, never destroyed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Discovery {
    pub id: u64,
    pub discoverer: String,
    pub content_hash: [u8; 32],
    pub fractal_hash: [u8; 32],
    pub coherence_score: u64,
    pub density_score: u64,
    pub novelty_score: u64,
    pub validated: bool,
    pub redundant: bool,
    pub submitted_at: u64,
}

impl Discovery {
    pub fn is_terminal(&self) -> bool {
        self.validated || self.redundant
    }
}

/// Result of a successful submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub discovery_id: u64,
    pub content_hash: [u8; 32],
}

/// Result of a validation that reached a terminal state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateOutcome {
    pub discovery_id: u64,
    pub discoverer: String,
    pub validated: bool,
    pub reward: u128,
    pub density_score: u64,
    /// Registry accumulator after this validation
    pub total_coherence_density: u64,
    /// Epochs the token ledger cascaded into (usually empty or one)
    pub epochs_advanced: Vec<EpochState>,
}

/// Events broadcast to RPC subscribers, mirrored in logs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    DiscoverySubmitted {
        discovery_id: u64,
        discoverer: String,
        content_hash: String,
    },
    DiscoveryValidated {
        discovery_id: u64,
        discoverer: String,
        reward: u128,
        density_score: u64,
        total_coherence_density: u64,
    },
    DiscoveryRejected {
        discovery_id: u64,
        coherence_score: u64,
        density_score: u64,
        novelty_score: u64,
    },
    EpochAdvanced {
        epoch: String,
        epoch_index: u8,
        coherence_density: u64,
    },
}

/// Aggregate view for status queries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub discovery_count: u64,
    pub validated_count: u64,
    pub redundant_count: u64,
    pub pending_requests: u64,
    pub total_coherence_density: u64,
    pub current_epoch: String,
    pub current_epoch_index: u8,
    pub next_epoch_threshold: Option<u64>,
    /// Progress toward the next epoch, percent (100.0 when terminal)
    pub epoch_progress_percent: f64,
    pub total_minted: u128,
    pub supply_cap: u128,
}

/// The core PoD ledger state
#[derive(Clone)]
pub struct PodState {
    inner: Arc<RwLock<Inner>>,
    storage: Arc<Storage>,
    mutations: Arc<AtomicU64>,
}

struct Inner {
    /// Mapping: discovery_id -> record
    discoveries: HashMap<u64, Discovery>,

    /// Insertion-ordered discovery ids for paginated enumeration
    discovery_order: Vec<u64>,

    /// Every content hash ever submitted (hex). Append-only.
    content_index: HashSet<String>,

    /// Next discovery id — unique, never reused
    next_discovery_id: u64,

    /// Registry accumulator: sum of density scores of validated
    /// discoveries. Monotonic.
    total_coherence_density: u64,

    /// Capability table: address -> role set
    capabilities: HashMap<String, HashSet<Role>>,

    /// Stateless threshold policy
    score_policy: ScoreValidator,

    /// Collaborator: balances, density counter, epoch machine
    token: TokenLedger,

    /// Pending-request queue + validator allow-list
    gateway: ValidatorGateway,
}

impl Inner {
    fn genesis(owner: &str) -> Self {
        let mut capabilities: HashMap<String, HashSet<Role>> = HashMap::new();
        capabilities.insert(owner.to_string(), [Role::Owner, Role::Validate].into());

        let mut token = TokenLedger::new(owner.to_string());
        // The registry mints rewards and pushes density on behalf of
        // validations; grant it the distributor capability up front.
        token
            .authorize_distributor(owner, REGISTRY_ADDRESS)
            .expect("genesis owner grant cannot fail");

        Self {
            discoveries: HashMap::new(),
            discovery_order: Vec::new(),
            content_index: HashSet::new(),
            next_discovery_id: 1,
            total_coherence_density: 0,
            capabilities,
            score_policy: ScoreValidator::default(),
            token,
            gateway: ValidatorGateway::default(),
        }
    }

    fn has_role(&self, address: &str, role: Role) -> bool {
        self.capabilities
            .get(address)
            .map(|roles| roles.contains(&role))
            .unwrap_or(false)
    }

    fn require_owner(&self, caller: &str) -> Result<(), LedgerError> {
        if self.has_role(caller, Role::Owner) {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized(caller.to_string()))
        }
    }

    fn check_score(value: u64) -> Result<(), LedgerError> {
        if value > SCORE_SCALE {
            return Err(LedgerError::OutOfRange {
                value,
                max: SCORE_SCALE,
            });
        }
        Ok(())
    }

    /// Core terminal transition. Runs every fallible check before the
    /// first field is written, so the triple "mark validated / add
    /// density / mint reward" applies as one unit or not at all.
    fn validate_discovery(
        &mut self,
        id: u64,
        coherence: u64,
        density: u64,
        novelty: u64,
    ) -> Result<ValidateOutcome, LedgerError> {
        Self::check_score(coherence)?;
        Self::check_score(density)?;
        Self::check_score(novelty)?;

        let record = self.discoveries.get(&id).ok_or(LedgerError::NotFound(id))?;
        if record.is_terminal() {
            return Err(LedgerError::AlreadyProcessed(id));
        }
        let discoverer = record.discoverer.clone();

        let passes = self.score_policy.passes(coherence, density, novelty);
        let reward = if passes {
            let reward = reward_for(coherence, density, novelty);
            self.token.can_mint(reward)?;
            reward
        } else {
            0
        };

        // All checks passed — apply the full effect set.
        let epochs_advanced = if passes {
            self.token.mint(REGISTRY_ADDRESS, &discoverer, reward)?;
            self.total_coherence_density += density;
            self.token.update_coherence_density(REGISTRY_ADDRESS, density)?
        } else {
            Vec::new()
        };

        let record = self.discoveries.get_mut(&id).expect("checked above");
        record.coherence_score = coherence;
        record.density_score = density;
        record.novelty_score = novelty;
        if passes {
            record.validated = true;
        } else {
            record.redundant = true;
        }

        Ok(ValidateOutcome {
            discovery_id: id,
            discoverer,
            validated: passes,
            reward,
            density_score: density,
            total_coherence_density: self.total_coherence_density,
            epochs_advanced,
        })
    }
}

impl PodState {
    pub fn new(owner: &str) -> Self {
        Self::with_data_dir(Storage::default_data_dir(), owner)
    }

    pub fn with_data_dir(data_dir: PathBuf, owner: &str) -> Self {
        let storage = Arc::new(Storage::new(data_dir));

        // Check for uncommitted WAL entries (crash recovery)
        if storage.has_uncommitted_wal() {
            let uncommitted = storage.uncommitted_wal_entries();
            tracing::warn!(
                "⚠️ Found {} uncommitted WAL entries — previous run may have crashed",
                uncommitted.len()
            );
            for entry in &uncommitted {
                tracing::info!(
                    "  WAL seq={}: {:?} @ ts={}",
                    entry.seq,
                    std::mem::discriminant(&entry.op),
                    entry.timestamp
                );
            }
            tracing::info!("📋 State will be loaded from last checkpoint. Uncommitted entries logged above for audit.");
            storage.wal_truncate();
        }

        let inner = if let Some(state) = storage.load_state() {
            tracing::info!(
                "📊 Restored state: {} discoveries, density {}, epoch {}",
                state.discovery_order.len(),
                state.total_coherence_density,
                state.token.current_epoch().name()
            );
            Inner {
                discoveries: state.discoveries,
                discovery_order: state.discovery_order,
                content_index: state.content_index,
                next_discovery_id: state.next_discovery_id,
                total_coherence_density: state.total_coherence_density,
                capabilities: state.capabilities,
                score_policy: ScoreValidator::default(),
                token: state.token,
                gateway: state.gateway,
            }
        } else {
            tracing::info!("🌱 Fresh ledger — genesis with owner {}", owner);
            Inner::genesis(owner)
        };

        Self {
            inner: Arc::new(RwLock::new(inner)),
            storage,
            mutations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Persist current state to disk
    pub fn save(&self) -> anyhow::Result<()> {
        let inner = self.inner.read_or_recover();
        let persisted = PersistedState {
            discoveries: inner.discoveries.clone(),
            discovery_order: inner.discovery_order.clone(),
            content_index: inner.content_index.clone(),
            next_discovery_id: inner.next_discovery_id,
            total_coherence_density: inner.total_coherence_density,
            capabilities: inner.capabilities.clone(),
            token: inner.token.clone(),
            gateway: inner.gateway.clone(),
        };
        self.storage.save_state(&persisted)
    }

    fn refuse_if_tainted(&self) -> Result<(), LedgerError> {
        if STATE_TAINTED.load(Ordering::SeqCst) {
            tracing::error!("🚨 Refusing mutation: state is tainted. Restart the node.");
            return Err(LedgerError::Tainted);
        }
        Ok(())
    }

    /// WAL the operation, then checkpoint every CHECKPOINT_INTERVAL
    /// mutations (reduces per-call disk I/O, WAL covers the gap).
    fn committed(&self, op: WalOp) {
        if let Err(e) = self.storage.wal_append(op) {
            tracing::warn!("⚠️ WAL write failed (state will still be checkpointed): {}", e);
        }
        let n = self.mutations.fetch_add(1, Ordering::SeqCst) + 1;
        if n % CHECKPOINT_INTERVAL == 0 {
            if let Err(e) = self.save() {
                tracing::warn!("⚠️ Failed to checkpoint state: {}", e);
            }
        }
    }

    // ─── Submission ────────────────────────────────────────────────────

    /// Register a new discovery. Fails with DuplicateContent if the
    /// content hash was ever submitted before; on failure no record is
    /// created and the dedup index is untouched.
    pub fn submit_discovery(
        &self,
        content_hash: [u8; 32],
        fractal_hash: [u8; 32],
        discoverer: &str,
    ) -> Result<SubmitOutcome, LedgerError> {
        self.refuse_if_tainted()?;
        let mut inner = self.inner.write_or_recover();

        let content_hex = hex::encode(content_hash);
        if inner.content_index.contains(&content_hex) {
            return Err(LedgerError::DuplicateContent);
        }

        let id = inner.next_discovery_id;
        inner.next_discovery_id += 1;
        inner.content_index.insert(content_hex.clone());
        inner.discovery_order.push(id);
        inner.discoveries.insert(
            id,
            Discovery {
                id,
                discoverer: discoverer.to_string(),
                content_hash,
                fractal_hash,
                coherence_score: 0,
                density_score: 0,
                novelty_score: 0,
                validated: false,
                redundant: false,
                submitted_at: now_secs(),
            },
        );
        drop(inner);

        tracing::info!(
            "🔭 Discovery {} submitted by {} (content {}…)",
            id,
            discoverer,
            &content_hex[..16]
        );
        self.committed(WalOp::DiscoverySubmitted {
            discovery_id: id,
            content_hash_hex: content_hex,
        });

        Ok(SubmitOutcome {
            discovery_id: id,
            content_hash,
        })
    }

    // ─── Validation ────────────────────────────────────────────────────

    /// Finalize a discovery directly. Caller must hold the owner or
    /// validator capability on the registry.
    pub fn validate_discovery(
        &self,
        id: u64,
        coherence: u64,
        density: u64,
        novelty: u64,
        caller: &str,
    ) -> Result<ValidateOutcome, LedgerError> {
        self.refuse_if_tainted()?;
        let mut inner = self.inner.write_or_recover();

        if !inner.has_role(caller, Role::Owner) && !inner.has_role(caller, Role::Validate) {
            return Err(LedgerError::Unauthorized(caller.to_string()));
        }

        let outcome = inner.validate_discovery(id, coherence, density, novelty)?;
        drop(inner);

        self.log_and_wal_outcome(&outcome, coherence, novelty);
        Ok(outcome)
    }

    fn log_and_wal_outcome(&self, outcome: &ValidateOutcome, coherence: u64, novelty: u64) {
        if outcome.validated {
            tracing::info!(
                "✅ Discovery {} VALIDATED — {} SYNTH to {}, density now {}",
                outcome.discovery_id,
                outcome.reward,
                outcome.discoverer,
                outcome.total_coherence_density
            );
            self.committed(WalOp::DiscoveryValidated {
                discovery_id: outcome.discovery_id,
                discoverer: outcome.discoverer.clone(),
                reward: outcome.reward,
                density_score: outcome.density_score,
            });
            for epoch in &outcome.epochs_advanced {
                self.committed(WalOp::EpochAdvanced {
                    epoch: epoch.name().to_string(),
                    coherence_density: outcome.total_coherence_density,
                });
            }
        } else {
            tracing::info!(
                "❌ Discovery {} rejected as redundant (scores {}/{}/{})",
                outcome.discovery_id,
                coherence,
                outcome.density_score,
                novelty
            );
            self.committed(WalOp::DiscoveryRejected {
                discovery_id: outcome.discovery_id,
            });
        }
    }

    // ─── Gateway ───────────────────────────────────────────────────────

    /// Queue a validation request for an existing, unterminal discovery.
    pub fn request_validation(
        &self,
        discovery_id: u64,
        content_hash: [u8; 32],
        fractal_hash: [u8; 32],
        discoverer: &str,
        caller: &str,
    ) -> Result<(), LedgerError> {
        self.refuse_if_tainted()?;
        let mut inner = self.inner.write_or_recover();

        let record = inner
            .discoveries
            .get(&discovery_id)
            .ok_or(LedgerError::NotFound(discovery_id))?;
        if record.is_terminal() {
            return Err(LedgerError::AlreadyProcessed(discovery_id));
        }

        inner.gateway.enqueue(ValidationRequest {
            discovery_id,
            discoverer: discoverer.to_string(),
            content_hash,
            fractal_hash,
            requested_at: now_secs(),
        })?;
        drop(inner);

        tracing::info!(
            "📨 Validation requested for discovery {} (by {})",
            discovery_id,
            caller
        );
        self.committed(WalOp::ValidationRequested { discovery_id });
        Ok(())
    }

    /// Fulfill a pending request: allow-listed callers only. Forwards to
    /// the registry's validate under the gateway's capability, then
    /// destroys the request (one-shot). The forward and the dequeue are
    /// one atomic unit under the write lock.
    pub fn process_validation(
        &self,
        discovery_id: u64,
        coherence: u64,
        density: u64,
        novelty: u64,
        caller: &str,
    ) -> Result<ValidateOutcome, LedgerError> {
        self.refuse_if_tainted()?;
        let mut inner = self.inner.write_or_recover();

        if !inner.gateway.is_validator(caller) {
            return Err(LedgerError::Unauthorized(caller.to_string()));
        }
        if inner.gateway.pending_request(discovery_id).is_none() {
            return Err(LedgerError::NotFound(discovery_id));
        }

        let outcome = inner.validate_discovery(discovery_id, coherence, density, novelty)?;
        inner.gateway.take(discovery_id);
        drop(inner);

        self.log_and_wal_outcome(&outcome, coherence, novelty);
        Ok(outcome)
    }

    pub fn pending_request(&self, discovery_id: u64) -> Option<ValidationRequest> {
        self.inner
            .read_or_recover()
            .gateway
            .pending_request(discovery_id)
            .cloned()
    }

    // ─── Authorization ─────────────────────────────────────────────────

    /// Allow-list an address to fulfill validation requests (owner only).
    pub fn authorize_validator(&self, address: &str, caller: &str) -> Result<(), LedgerError> {
        self.refuse_if_tainted()?;
        let mut inner = self.inner.write_or_recover();
        inner.require_owner(caller)?;
        inner.gateway.authorize(address);
        drop(inner);

        tracing::info!("🔑 Validator authorized: {}", address);
        self.committed(WalOp::RoleGranted {
            address: address.to_string(),
            role: "validator".to_string(),
        });
        Ok(())
    }

    pub fn revoke_validator(&self, address: &str, caller: &str) -> Result<(), LedgerError> {
        self.refuse_if_tainted()?;
        let mut inner = self.inner.write_or_recover();
        inner.require_owner(caller)?;
        inner.gateway.revoke(address);
        drop(inner);

        tracing::info!("🔒 Validator revoked: {}", address);
        self.committed(WalOp::RoleGranted {
            address: address.to_string(),
            role: "validator-revoked".to_string(),
        });
        Ok(())
    }

    /// Grant the reward-mint capability on the token ledger (owner only).
    pub fn authorize_distributor(&self, address: &str, caller: &str) -> Result<(), LedgerError> {
        self.refuse_if_tainted()?;
        let mut inner = self.inner.write_or_recover();
        inner.require_owner(caller)?;
        inner.token.authorize_distributor(caller, address)?;
        drop(inner);

        self.committed(WalOp::RoleGranted {
            address: address.to_string(),
            role: "distributor".to_string(),
        });
        Ok(())
    }

    /// Grant the direct Validate capability on the registry (owner only).
    pub fn grant_validate_capability(&self, address: &str, caller: &str) -> Result<(), LedgerError> {
        self.refuse_if_tainted()?;
        let mut inner = self.inner.write_or_recover();
        inner.require_owner(caller)?;
        inner
            .capabilities
            .entry(address.to_string())
            .or_default()
            .insert(Role::Validate);
        drop(inner);

        tracing::info!("🔑 Validate capability granted: {}", address);
        self.committed(WalOp::RoleGranted {
            address: address.to_string(),
            role: "validate".to_string(),
        });
        Ok(())
    }

    /// Adjust the density threshold for leaving a non-terminal epoch
    /// (owner only). May cascade the epoch forward, never backward.
    pub fn set_epoch_threshold(
        &self,
        epoch: EpochState,
        threshold: u64,
        caller: &str,
    ) -> Result<Vec<EpochState>, LedgerError> {
        self.refuse_if_tainted()?;
        let mut inner = self.inner.write_or_recover();
        inner.require_owner(caller)?;
        let advanced = inner.token.set_epoch_threshold(caller, epoch, threshold)?;
        let density = inner.token.coherence_density();
        drop(inner);

        for epoch in &advanced {
            self.committed(WalOp::EpochAdvanced {
                epoch: epoch.name().to_string(),
                coherence_density: density,
            });
        }
        Ok(advanced)
    }

    // ─── Token boundary ────────────────────────────────────────────────

    pub fn balance_of(&self, address: &str) -> u128 {
        self.inner.read_or_recover().token.balance_of(address)
    }

    pub fn transfer(&self, from: &str, to: &str, amount: u128) -> Result<(), LedgerError> {
        self.refuse_if_tainted()?;
        let mut inner = self.inner.write_or_recover();
        inner.token.transfer(from, to, amount)?;
        drop(inner);

        self.committed(WalOp::Transfer {
            from: from.to_string(),
            to: to.to_string(),
            amount,
        });
        Ok(())
    }

    // ─── Read-only accessors ───────────────────────────────────────────

    pub fn get_discovery(&self, id: u64) -> Result<Discovery, LedgerError> {
        self.inner
            .read_or_recover()
            .discoveries
            .get(&id)
            .cloned()
            .ok_or(LedgerError::NotFound(id))
    }

    /// Page through the insertion-ordered id list. An offset past the end
    /// of the list is rejected; count is clamped to what remains.
    pub fn get_discovery_ids(&self, offset: u64, count: u64) -> Result<Vec<u64>, LedgerError> {
        let inner = self.inner.read_or_recover();
        let len = inner.discovery_order.len() as u64;
        if offset > len {
            return Err(LedgerError::OutOfRange {
                value: offset,
                max: len,
            });
        }
        let end = offset.saturating_add(count).min(len);
        Ok(inner.discovery_order[offset as usize..end as usize].to_vec())
    }

    pub fn get_discovery_count(&self) -> u64 {
        self.inner.read_or_recover().discovery_order.len() as u64
    }

    pub fn total_coherence_density(&self) -> u64 {
        self.inner.read_or_recover().total_coherence_density
    }

    pub fn current_epoch(&self) -> EpochState {
        self.inner.read_or_recover().token.current_epoch()
    }

    /// Pure lookup: highest epoch whose threshold the given density
    /// score qualifies for. Never mutates the machine.
    pub fn qualified_epoch(&self, density_score: u64) -> EpochState {
        self.inner.read_or_recover().token.qualified_epoch(density_score)
    }

    pub fn summary(&self) -> LedgerSummary {
        let inner = self.inner.read_or_recover();
        let validated = inner.discoveries.values().filter(|d| d.validated).count() as u64;
        let redundant = inner.discoveries.values().filter(|d| d.redundant).count() as u64;
        let epoch = inner.token.current_epoch();
        let next_threshold = inner.token.threshold_to_leave(epoch);
        let density = inner.token.coherence_density();
        let progress = match next_threshold {
            Some(t) if t > 0 => ((density as f64 / t as f64) * 100.0).min(100.0),
            _ => 100.0,
        };
        LedgerSummary {
            discovery_count: inner.discovery_order.len() as u64,
            validated_count: validated,
            redundant_count: redundant,
            pending_requests: inner.gateway.pending_count() as u64,
            total_coherence_density: inner.total_coherence_density,
            current_epoch: epoch.name().to_string(),
            current_epoch_index: epoch.as_index(),
            next_epoch_threshold: next_threshold,
            epoch_progress_percent: progress,
            total_minted: inner.token.total_minted(),
            supply_cap: super::token::TOTAL_SUPPLY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static TEST_DIR_SEQ: AtomicU64 = AtomicU64::new(0);

    const OWNER: &str = "treasury";

    fn state() -> PodState {
        let dir = std::env::temp_dir().join(format!(
            "synthnode-registry-test-{}-{}",
            std::process::id(),
            TEST_DIR_SEQ.fetch_add(1, Ordering::SeqCst)
        ));
        PodState::with_data_dir(dir, OWNER)
    }

    fn digest(tag: &str) -> [u8; 32] {
        hash_content(tag.as_bytes())
    }

    #[test]
    fn test_duplicate_content_rejected() {
        let pod = state();
        let h1 = digest("content-1");
        pod.submit_discovery(h1, digest("fractal-1"), "alice").unwrap();

        // Same content with a different fractal hash is still redundant
        let err = pod
            .submit_discovery(h1, digest("fractal-2"), "bob")
            .unwrap_err();
        assert_eq!(err, LedgerError::DuplicateContent);
        assert_eq!(pod.get_discovery_count(), 1);

        // And so is every later attempt
        assert_eq!(
            pod.submit_discovery(h1, digest("fractal-3"), "carol"),
            Err(LedgerError::DuplicateContent)
        );
        assert_eq!(pod.get_discovery_count(), 1);
    }

    #[test]
    fn test_ids_are_unique_and_ordered() {
        let pod = state();
        let id1 = pod
            .submit_discovery(digest("a"), digest("fa"), "alice")
            .unwrap()
            .discovery_id;
        let id2 = pod
            .submit_discovery(digest("b"), digest("fb"), "alice")
            .unwrap()
            .discovery_id;
        let id3 = pod
            .submit_discovery(digest("c"), digest("fc"), "bob")
            .unwrap()
            .discovery_id;
        assert!(id1 < id2 && id2 < id3);
        assert_eq!(pod.get_discovery_ids(0, 10).unwrap(), vec![id1, id2, id3]);
        assert_eq!(pod.get_discovery_ids(1, 1).unwrap(), vec![id2]);
        assert_eq!(pod.get_discovery_ids(3, 5).unwrap(), Vec::<u64>::new());
        assert_eq!(
            pod.get_discovery_ids(4, 1),
            Err(LedgerError::OutOfRange { value: 4, max: 3 })
        );
        // an oversized count is clamped to the end of the list
        assert_eq!(pod.get_discovery_ids(0, u64::MAX).unwrap(), vec![id1, id2, id3]);
        assert_eq!(pod.get_discovery_ids(3, u64::MAX).unwrap(), Vec::<u64>::new());
    }

    #[test]
    fn test_validation_above_thresholds() {
        let pod = state();
        let id = pod
            .submit_discovery(digest("good"), digest("fg"), "alice")
            .unwrap()
            .discovery_id;

        let before = pod.total_coherence_density();
        let outcome = pod.validate_discovery(id, 800, 500, 400, OWNER).unwrap();
        assert!(outcome.validated);
        assert_eq!(pod.total_coherence_density(), before + 500);

        let d = pod.get_discovery(id).unwrap();
        assert!(d.validated);
        assert!(!d.redundant);
        assert_eq!(d.coherence_score, 800);
        assert_eq!(d.density_score, 500);
        assert_eq!(d.novelty_score, 400);
    }

    #[test]
    fn test_validation_below_thresholds() {
        let pod = state();
        let id = pod
            .submit_discovery(digest("weak"), digest("fw"), "alice")
            .unwrap()
            .discovery_id;

        let balance_before = pod.balance_of("alice");
        let outcome = pod.validate_discovery(id, 100, 100, 100, OWNER).unwrap();
        assert!(!outcome.validated);
        assert_eq!(outcome.reward, 0);

        let d = pod.get_discovery(id).unwrap();
        assert!(!d.validated);
        assert!(d.redundant);
        // No density or reward side effects
        assert_eq!(pod.total_coherence_density(), 0);
        assert_eq!(pod.balance_of("alice"), balance_before);
    }

    #[test]
    fn test_single_low_score_forces_redundant() {
        let pod = state();
        for (i, scores) in [(499, 10_000, 10_000), (10_000, 299, 10_000), (10_000, 10_000, 299)]
            .iter()
            .enumerate()
        {
            let id = pod
                .submit_discovery(digest(&format!("gate-{i}")), digest(&format!("gf-{i}")), "alice")
                .unwrap()
                .discovery_id;
            let outcome = pod
                .validate_discovery(id, scores.0, scores.1, scores.2, OWNER)
                .unwrap();
            assert!(!outcome.validated, "gate {i} should have failed");
            assert!(pod.get_discovery(id).unwrap().redundant);
        }
        assert_eq!(pod.total_coherence_density(), 0);
    }

    #[test]
    fn test_reward_minted_to_discoverer() {
        let pod = state();
        let id = pod
            .submit_discovery(digest("rewarded"), digest("fr"), "alice")
            .unwrap()
            .discovery_id;
        let outcome = pod.validate_discovery(id, 8000, 5000, 4000, OWNER).unwrap();
        assert_eq!(outcome.reward, 1600);
        assert_eq!(pod.balance_of("alice"), 1600);
    }

    #[test]
    fn test_validate_is_terminal() {
        let pod = state();
        let id = pod
            .submit_discovery(digest("once"), digest("fo"), "alice")
            .unwrap()
            .discovery_id;
        pod.validate_discovery(id, 800, 500, 400, OWNER).unwrap();

        // A second validation of either polarity is rejected whole
        assert_eq!(
            pod.validate_discovery(id, 9000, 9000, 9000, OWNER),
            Err(LedgerError::AlreadyProcessed(id))
        );
        assert_eq!(pod.total_coherence_density(), 500);
        assert_eq!(pod.balance_of("alice"), 1);

        // Same for a rejected one
        let id2 = pod
            .submit_discovery(digest("twice"), digest("ft"), "bob")
            .unwrap()
            .discovery_id;
        pod.validate_discovery(id2, 1, 1, 1, OWNER).unwrap();
        assert_eq!(
            pod.validate_discovery(id2, 800, 500, 400, OWNER),
            Err(LedgerError::AlreadyProcessed(id2))
        );
    }

    #[test]
    fn test_validate_requires_capability() {
        let pod = state();
        let id = pod
            .submit_discovery(digest("guarded"), digest("fg2"), "alice")
            .unwrap()
            .discovery_id;

        assert_eq!(
            pod.validate_discovery(id, 800, 500, 400, "mallory"),
            Err(LedgerError::Unauthorized("mallory".to_string()))
        );

        // A granted Validate capability works without Owner
        pod.grant_validate_capability("scorer", OWNER).unwrap();
        assert!(pod
            .validate_discovery(id, 800, 500, 400, "scorer")
            .unwrap()
            .validated);
    }

    #[test]
    fn test_scores_above_scale_rejected() {
        let pod = state();
        let id = pod
            .submit_discovery(digest("overscale"), digest("fo2"), "alice")
            .unwrap()
            .discovery_id;
        assert_eq!(
            pod.validate_discovery(id, 10_001, 500, 400, OWNER),
            Err(LedgerError::OutOfRange { value: 10_001, max: 10_000 })
        );
        // Rejection left the record unterminal
        assert!(!pod.get_discovery(id).unwrap().is_terminal());
    }

    #[test]
    fn test_validate_unknown_discovery() {
        let pod = state();
        assert_eq!(
            pod.validate_discovery(42, 800, 500, 400, OWNER),
            Err(LedgerError::NotFound(42))
        );
    }

    #[test]
    fn test_density_accumulates_across_validations() {
        let pod = state();
        let mut expected = 0u64;
        for (i, density) in [500u64, 1200, 300].iter().enumerate() {
            let id = pod
                .submit_discovery(digest(&format!("acc-{i}")), digest(&format!("af-{i}")), "alice")
                .unwrap()
                .discovery_id;
            pod.validate_discovery(id, 800, *density, 400, OWNER).unwrap();
            expected += density;
            assert_eq!(pod.total_coherence_density(), expected);
        }
    }

    #[test]
    fn test_epoch_advances_through_validation() {
        let pod = state();
        // Default Founders threshold is 1000; two 500-density validations
        // land exactly on it.
        let id1 = pod
            .submit_discovery(digest("e1"), digest("ef1"), "alice")
            .unwrap()
            .discovery_id;
        pod.validate_discovery(id1, 800, 500, 400, OWNER).unwrap();
        assert_eq!(pod.current_epoch(), EpochState::Founders);

        let id2 = pod
            .submit_discovery(digest("e2"), digest("ef2"), "alice")
            .unwrap()
            .discovery_id;
        let outcome = pod.validate_discovery(id2, 800, 500, 400, OWNER).unwrap();
        assert_eq!(outcome.epochs_advanced, vec![EpochState::Pioneer]);
        assert_eq!(pod.current_epoch(), EpochState::Pioneer);
    }

    #[test]
    fn test_gateway_round_trip() {
        let pod = state();
        let ch = digest("via-gateway");
        let fh = digest("via-gateway-f");
        let id = pod.submit_discovery(ch, fh, "alice").unwrap().discovery_id;

        pod.request_validation(id, ch, fh, "alice", "alice").unwrap();
        // Second request before fulfillment is rejected
        assert_eq!(
            pod.request_validation(id, ch, fh, "alice", "alice"),
            Err(LedgerError::PendingRequestExists(id))
        );

        // Non-allow-listed caller cannot process
        assert_eq!(
            pod.process_validation(id, 900, 600, 500, "mallory"),
            Err(LedgerError::Unauthorized("mallory".to_string()))
        );

        pod.authorize_validator("evaluator", OWNER).unwrap();
        let outcome = pod.process_validation(id, 900, 600, 500, "evaluator").unwrap();
        assert!(outcome.validated);
        assert!(pod.pending_request(id).is_none());

        // One-shot: the fulfilled request cannot be processed again
        assert_eq!(
            pod.process_validation(id, 900, 600, 500, "evaluator"),
            Err(LedgerError::NotFound(id))
        );
    }

    #[test]
    fn test_request_validation_unknown_discovery() {
        let pod = state();
        assert_eq!(
            pod.request_validation(99, digest("x"), digest("y"), "alice", "alice"),
            Err(LedgerError::NotFound(99))
        );
    }

    #[test]
    fn test_process_without_request() {
        let pod = state();
        let id = pod
            .submit_discovery(digest("norq"), digest("nf"), "alice")
            .unwrap()
            .discovery_id;
        pod.authorize_validator("evaluator", OWNER).unwrap();
        // Allow-listed, but nothing queued for this id
        assert_eq!(
            pod.process_validation(id, 900, 600, 500, "evaluator"),
            Err(LedgerError::NotFound(id))
        );
    }

    #[test]
    fn test_revoked_validator_rejected() {
        let pod = state();
        let ch = digest("revoked");
        let id = pod.submit_discovery(ch, digest("rf"), "alice").unwrap().discovery_id;
        pod.request_validation(id, ch, digest("rf"), "alice", "alice").unwrap();

        pod.authorize_validator("evaluator", OWNER).unwrap();
        pod.revoke_validator("evaluator", OWNER).unwrap();
        assert_eq!(
            pod.process_validation(id, 900, 600, 500, "evaluator"),
            Err(LedgerError::Unauthorized("evaluator".to_string()))
        );
    }

    #[test]
    fn test_authorization_is_owner_only() {
        let pod = state();
        assert_eq!(
            pod.authorize_validator("evaluator", "mallory"),
            Err(LedgerError::Unauthorized("mallory".to_string()))
        );
        assert_eq!(
            pod.authorize_distributor("mallory", "mallory"),
            Err(LedgerError::Unauthorized("mallory".to_string()))
        );
        assert_eq!(
            pod.set_epoch_threshold(EpochState::Founders, 1, "mallory"),
            Err(LedgerError::Unauthorized("mallory".to_string()))
        );
    }

    #[test]
    fn test_summary_tracks_counts() {
        let pod = state();
        let id1 = pod
            .submit_discovery(digest("s1"), digest("sf1"), "alice")
            .unwrap()
            .discovery_id;
        let id2 = pod
            .submit_discovery(digest("s2"), digest("sf2"), "bob")
            .unwrap()
            .discovery_id;
        pod.validate_discovery(id1, 800, 500, 400, OWNER).unwrap();
        pod.validate_discovery(id2, 1, 1, 1, OWNER).unwrap();

        let summary = pod.summary();
        assert_eq!(summary.discovery_count, 2);
        assert_eq!(summary.validated_count, 1);
        assert_eq!(summary.redundant_count, 1);
        assert_eq!(summary.total_coherence_density, 500);
        assert_eq!(summary.current_epoch, "Founders");
        assert_eq!(summary.next_epoch_threshold, Some(1000));
    }

    #[test]
    fn test_state_survives_restart() {
        let dir = std::env::temp_dir().join(format!(
            "synthnode-restart-test-{}-{}",
            std::process::id(),
            TEST_DIR_SEQ.fetch_add(1, Ordering::SeqCst)
        ));

        let (id, density) = {
            let pod = PodState::with_data_dir(dir.clone(), OWNER);
            let id = pod
                .submit_discovery(digest("persist"), digest("pf"), "alice")
                .unwrap()
                .discovery_id;
            pod.validate_discovery(id, 800, 500, 400, OWNER).unwrap();
            pod.save().unwrap();
            (id, pod.total_coherence_density())
        };

        let pod = PodState::with_data_dir(dir, OWNER);
        assert_eq!(pod.total_coherence_density(), density);
        let d = pod.get_discovery(id).unwrap();
        assert!(d.validated);
        // Dedup index survives too
        assert_eq!(
            pod.submit_discovery(digest("persist"), digest("pf2"), "bob"),
            Err(LedgerError::DuplicateContent)
        );
        assert_eq!(pod.balance_of("alice"), 1);
    }
}
