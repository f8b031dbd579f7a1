//! Threshold Signature Coordinator
//!
//! Drives the request / collect / verify / aggregate protocol for signing
//! ceremonies. Ceremonies are fully independent across subnets and proceed
//! in parallel; within one ceremony the threshold check, the aggregate
//! write, and the `Complete` transition happen under that ceremony's own
//! lock, never a global one. Share verification is pure and runs before the
//! critical section.
//!
//! Ceremony records are persisted through the storage collaborator; the
//! completion transition uses a compare-and-swap write so a lost update can
//! never produce a second aggregate.

use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use qg_core::constants::{
    COORDINATOR_ACTOR, DEFAULT_CEREMONY_TTL_SECS, DEFAULT_SWEEP_INTERVAL_SECS,
    MAX_AGGREGATE_RETRIES,
};
use qg_core::error::LedgerError;
use qg_core::events::{EventSink, ProtocolEvent};
use qg_core::ledger::{IdentityVerifier, SlashingLedger, ValidatorSetLedger};
use qg_core::storage::Datastore;
use qg_core::types::{
    ActorId, CeremonyMetadata, CeremonyStatus, Digest, SignaturePurpose, SignatureShare,
    SlashingReason, SlashingSeverity, SubnetId, ValidatorId, ValidatorRole, ValidatorStatus,
};

use crate::backend::{BackendRegistry, ShareInput};
use crate::ceremony::{ShareOutcome, SigningCeremony};
use crate::error::{CoordinatorError, CoordinatorResult};

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Ceremony time-to-live applied when the caller gives none
    pub default_ttl_secs: i64,
    /// Consecutive aggregation failures tolerated before a ceremony fails
    pub max_aggregate_retries: u32,
    /// Interval between expiry sweeps
    pub sweep_interval_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: DEFAULT_CEREMONY_TTL_SECS,
            max_aggregate_retries: MAX_AGGREGATE_RETRIES,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

impl CoordinatorConfig {
    /// Short timeouts for tests
    pub fn fast() -> Self {
        Self {
            default_ttl_secs: 2,
            max_aggregate_retries: 2,
            sweep_interval_secs: 1,
        }
    }
}

struct CeremonyEntry {
    ceremony: SigningCeremony,
    storage_version: u64,
}

/// The ceremony coordination service
pub struct ThresholdCoordinator {
    backends: Arc<BackendRegistry>,
    sets: Arc<dyn ValidatorSetLedger>,
    slashing: Arc<dyn SlashingLedger>,
    identity: Arc<dyn IdentityVerifier>,
    events: Arc<dyn EventSink>,
    store: Arc<dyn Datastore>,
    ceremonies: RwLock<HashMap<String, Arc<Mutex<CeremonyEntry>>>>,
    ceremony_counter: AtomicU64,
    config: CoordinatorConfig,
}

impl ThresholdCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backends: Arc<BackendRegistry>,
        sets: Arc<dyn ValidatorSetLedger>,
        slashing: Arc<dyn SlashingLedger>,
        identity: Arc<dyn IdentityVerifier>,
        events: Arc<dyn EventSink>,
        store: Arc<dyn Datastore>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            backends,
            sets,
            slashing,
            identity,
            events,
            store,
            ceremonies: RwLock::new(HashMap::new()),
            ceremony_counter: AtomicU64::new(0),
            config,
        }
    }

    fn generate_ceremony_id(&self) -> String {
        let seq = self.ceremony_counter.fetch_add(1, Ordering::SeqCst);
        let timestamp = Utc::now().timestamp_micros();
        format!("cer_{:016x}_{:08x}", timestamp, seq)
    }

    fn storage_key(ceremony_id: &str) -> String {
        format!("ceremony/{}", ceremony_id)
    }

    /// Persist the entry with a compare-and-swap against the version we last
    /// wrote. A conflict means another writer touched the record; the
    /// in-memory entry is authoritative per ceremony, so this is an error.
    async fn persist(&self, entry: &mut CeremonyEntry) -> CoordinatorResult<()> {
        let bytes = serde_json::to_vec(&entry.ceremony).map_err(LedgerError::from)?;
        let expected = if entry.storage_version == 0 {
            None
        } else {
            Some(entry.storage_version)
        };
        let version = self
            .store
            .compare_and_swap(&Self::storage_key(&entry.ceremony.id), expected, bytes)
            .await?;
        entry.storage_version = version;
        Ok(())
    }

    /// Open a ceremony against the subnet's active validator set
    pub async fn request_signature(
        &self,
        subnet_id: &SubnetId,
        message: Vec<u8>,
        purpose: SignaturePurpose,
        metadata: CeremonyMetadata,
        ttl_secs: Option<i64>,
    ) -> CoordinatorResult<String> {
        if let Some(initiator) = &metadata.initiated_by {
            if !self.identity.verify_actor(initiator.as_str()).await? {
                return Err(LedgerError::Validation(format!(
                    "Unknown principal: {}",
                    initiator
                ))
                .into());
            }
        }

        let set = match self.sets.get_active_set(subnet_id, None).await {
            Ok(set) => set,
            Err(LedgerError::NotFound(_)) => {
                return Err(CoordinatorError::NoActiveSet(subnet_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let ttl = Duration::seconds(ttl_secs.unwrap_or(self.config.default_ttl_secs));
        let ceremony_id = self.generate_ceremony_id();
        let ceremony =
            SigningCeremony::new(ceremony_id.clone(), message, purpose, metadata, set, ttl);

        info!(
            ceremony_id = %ceremony_id,
            subnet_id = %subnet_id,
            epoch = ceremony.validator_set.epoch,
            required_shares = ceremony.required_shares,
            "ceremony opened"
        );

        let mut entry = CeremonyEntry {
            ceremony,
            storage_version: 0,
        };
        self.persist(&mut entry).await?;

        let mut ceremonies = self.ceremonies.write().await;
        ceremonies.insert(ceremony_id.clone(), Arc::new(Mutex::new(entry)));
        Ok(ceremony_id)
    }

    async fn entry(&self, ceremony_id: &str) -> CoordinatorResult<Arc<Mutex<CeremonyEntry>>> {
        let ceremonies = self.ceremonies.read().await;
        ceremonies
            .get(ceremony_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::UnknownCeremony(ceremony_id.to_string()))
    }

    /// Submit one validator's share.
    ///
    /// Returns `Ok(true)` when the share was recorded (including audit-only
    /// shares arriving after completion) and `Ok(false)` for an idempotent
    /// resubmission of an identical share.
    pub async fn submit_share(
        &self,
        ceremony_id: &str,
        validator_id: &ValidatorId,
        signature: &str,
        metadata: Option<serde_json::Value>,
    ) -> CoordinatorResult<bool> {
        let handle = self.entry(ceremony_id).await?;

        if !self.identity.verify_actor(validator_id.as_str()).await? {
            return Err(CoordinatorError::UnauthorizedValidator {
                validator_id: validator_id.to_string(),
                cause: "unknown principal".to_string(),
            });
        }

        // Authorization against the ceremony's snapshot, then release the
        // lock so verification runs without it.
        let now = Utc::now();
        let (message, expected_hash, public_key, key_index, scheme_kind) = {
            let mut entry = handle.lock().await;
            let ceremony = &entry.ceremony;

            if ceremony.status == CeremonyStatus::Collecting && ceremony.is_expired_at(now) {
                entry.ceremony.expire();
                let expired_status = entry.ceremony.status;
                if let Err(e) = self.persist(&mut entry).await {
                    warn!(ceremony_id = %ceremony_id, error = %e, "failed to persist expiry");
                }
                self.events.publish(&ProtocolEvent::CeremonyExpired {
                    ceremony_id: ceremony_id.to_string(),
                    subnet_id: entry.ceremony.subnet_id.clone(),
                });
                return Err(CoordinatorError::TerminalState {
                    ceremony_id: ceremony_id.to_string(),
                    status: expired_status,
                });
            }

            let ceremony = &entry.ceremony;
            if !ceremony.status.accepts_shares() {
                return Err(CoordinatorError::TerminalState {
                    ceremony_id: ceremony_id.to_string(),
                    status: ceremony.status,
                });
            }

            let key_index = ceremony
                .validator_set
                .validator_index(validator_id)
                .ok_or_else(|| CoordinatorError::UnauthorizedValidator {
                    validator_id: validator_id.to_string(),
                    cause: "not a member of the ceremony's validator set".to_string(),
                })? as u32;
            let member = &ceremony.validator_set.validators[key_index as usize];
            if member.status != ValidatorStatus::Active {
                return Err(CoordinatorError::UnauthorizedValidator {
                    validator_id: validator_id.to_string(),
                    cause: format!("validator status is {:?}", member.status),
                });
            }
            if member.role == ValidatorRole::Observer {
                return Err(CoordinatorError::UnauthorizedValidator {
                    validator_id: validator_id.to_string(),
                    cause: "observers never contribute counted shares".to_string(),
                });
            }

            let public_key = ceremony
                .validator_set
                .scheme
                .member_public_keys
                .get(key_index as usize)
                .cloned()
                .ok_or_else(|| {
                    LedgerError::Validation(format!(
                        "Missing public key share for index {}",
                        key_index
                    ))
                })?;

            (
                ceremony.message.clone(),
                ceremony.message_hash,
                public_key,
                key_index,
                ceremony.validator_set.scheme.kind,
            )
        };

        if Digest::compute(&message) != expected_hash {
            return Err(CoordinatorError::MessageMismatch);
        }

        // Pure verification, no locks held
        let backend = self.backends.get(scheme_kind)?;
        if let Err(e) = backend.verify_share(&public_key, &message, signature) {
            warn!(
                ceremony_id = %ceremony_id,
                validator_id = %validator_id,
                error = %e,
                "share verification failed"
            );
            self.events.publish(&ProtocolEvent::ShareRejected {
                ceremony_id: ceremony_id.to_string(),
                validator_id: validator_id.clone(),
                cause: e.to_string(),
            });
            self.record_misbehavior(
                validator_id,
                SlashingReason::MaliciousBehavior,
                SlashingSeverity::Major,
                Digest::compute(signature.as_bytes()),
            )
            .await;
            return Err(CoordinatorError::InvalidShare {
                validator_id: validator_id.to_string(),
                cause: e.to_string(),
            });
        }

        // Critical section: share append, threshold check, aggregate write,
        // and the Complete transition are serialized per ceremony.
        let mut entry = handle.lock().await;
        if !entry.ceremony.status.accepts_shares() {
            return Err(CoordinatorError::TerminalState {
                ceremony_id: ceremony_id.to_string(),
                status: entry.ceremony.status,
            });
        }

        let share = SignatureShare {
            validator_id: validator_id.clone(),
            key_index,
            signature: signature.to_string(),
            message_hash: expected_hash,
            submitted_at: now,
            metadata,
        };

        match entry.ceremony.record_share(share) {
            ShareOutcome::Duplicate => {
                debug!(
                    ceremony_id = %ceremony_id,
                    validator_id = %validator_id,
                    "duplicate share ignored"
                );
                return Ok(false);
            }
            ShareOutcome::Conflicting { existing_signature } => {
                drop(entry);
                let evidence = Digest::combine(
                    &Digest::compute(existing_signature.as_bytes()),
                    &Digest::compute(signature.as_bytes()),
                );
                self.events.publish(&ProtocolEvent::ShareRejected {
                    ceremony_id: ceremony_id.to_string(),
                    validator_id: validator_id.clone(),
                    cause: "conflicting resubmission".to_string(),
                });
                self.record_misbehavior(
                    validator_id,
                    SlashingReason::DoubleSigning,
                    SlashingSeverity::Critical,
                    evidence,
                )
                .await;
                return Err(CoordinatorError::InvalidShare {
                    validator_id: validator_id.to_string(),
                    cause: "conflicting share for the same ceremony".to_string(),
                });
            }
            ShareOutcome::Accepted => {}
        }

        if entry.ceremony.status == CeremonyStatus::Complete {
            // Late valid share, retained for audit; the aggregate is fixed.
            debug!(
                ceremony_id = %ceremony_id,
                validator_id = %validator_id,
                "late share retained for audit"
            );
            if let Err(e) = self.persist(&mut entry).await {
                warn!(ceremony_id = %ceremony_id, error = %e, "failed to persist audit share");
            }
        } else {
            if entry.ceremony.threshold_met() {
                self.try_aggregate(ceremony_id, &mut entry, &*backend).await;
            }
            self.persist(&mut entry).await?;
        }
        drop(entry);

        if let Err(e) = self.sets.record_activity(validator_id).await {
            debug!(validator_id = %validator_id, error = %e, "activity update failed");
        }
        Ok(true)
    }

    /// Aggregate under the entry lock and transition to `Complete`, or count
    /// a failed attempt and fail the ceremony past the retry bound.
    async fn try_aggregate(
        &self,
        ceremony_id: &str,
        entry: &mut CeremonyEntry,
        backend: &dyn crate::backend::ThresholdBackend,
    ) {
        let inputs: Vec<ShareInput> = entry
            .ceremony
            .aggregation_set()
            .iter()
            .map(|share| ShareInput {
                key_index: share.key_index,
                public_key: entry.ceremony.validator_set.scheme.member_public_keys
                    [share.key_index as usize]
                    .clone(),
                signature: share.signature.clone(),
            })
            .collect();

        match backend.aggregate(&inputs, entry.ceremony.required_shares) {
            Ok(aggregate) => {
                let now = Utc::now();
                entry.ceremony.complete(aggregate, now);
                info!(
                    ceremony_id = %ceremony_id,
                    subnet_id = %entry.ceremony.subnet_id,
                    count = entry.ceremony.collected_shares(),
                    "ceremony complete"
                );
                self.events.publish(&ProtocolEvent::CeremonyCompleted {
                    ceremony_id: ceremony_id.to_string(),
                    subnet_id: entry.ceremony.subnet_id.clone(),
                    epoch: entry.ceremony.validator_set.epoch,
                    collected_shares: entry.ceremony.collected_shares(),
                });
            }
            Err(e) => {
                // Transient: the ceremony stays collecting and aggregation
                // is re-attempted on the next submission, up to the bound.
                let attempts = entry.ceremony.note_aggregation_failure();
                warn!(
                    ceremony_id = %ceremony_id,
                    error = %e,
                    count = attempts,
                    "aggregation attempt failed"
                );
                if attempts >= self.config.max_aggregate_retries {
                    let cause = format!("aggregation failed: {}", e);
                    entry.ceremony.fail(&cause);
                    self.events.publish(&ProtocolEvent::CeremonyFailed {
                        ceremony_id: ceremony_id.to_string(),
                        subnet_id: entry.ceremony.subnet_id.clone(),
                        cause,
                    });
                }
            }
        }
    }

    /// Manually re-attempt aggregation after a transient backend failure.
    /// Returns whether the ceremony is complete afterwards.
    pub async fn retry_aggregation(&self, ceremony_id: &str) -> CoordinatorResult<bool> {
        let handle = self.entry(ceremony_id).await?;
        let mut entry = handle.lock().await;

        match entry.ceremony.status {
            CeremonyStatus::Complete => return Ok(true),
            CeremonyStatus::Collecting => {}
            status => {
                return Err(CoordinatorError::TerminalState {
                    ceremony_id: ceremony_id.to_string(),
                    status,
                })
            }
        }
        if !entry.ceremony.threshold_met() {
            return Ok(false);
        }

        let backend = self.backends.get(entry.ceremony.validator_set.scheme.kind)?;
        self.try_aggregate(ceremony_id, &mut entry, &*backend).await;
        self.persist(&mut entry).await?;
        Ok(entry.ceremony.status == CeremonyStatus::Complete)
    }

    /// Snapshot of a ceremony, if known
    pub async fn get_ceremony(&self, ceremony_id: &str) -> Option<SigningCeremony> {
        let handle = {
            let ceremonies = self.ceremonies.read().await;
            ceremonies.get(ceremony_id).cloned()
        }?;
        let entry = handle.lock().await;
        Some(entry.ceremony.clone())
    }

    /// Expire overdue ceremonies; returns the number transitioned. Failures
    /// to persist are logged and retried implicitly on the next sweep.
    pub async fn expire_overdue(&self) -> u32 {
        let handles: Vec<(String, Arc<Mutex<CeremonyEntry>>)> = {
            let ceremonies = self.ceremonies.read().await;
            ceremonies
                .iter()
                .map(|(id, handle)| (id.clone(), handle.clone()))
                .collect()
        };

        let now = Utc::now();
        let mut count = 0;
        for (ceremony_id, handle) in handles {
            let mut entry = handle.lock().await;
            if entry.ceremony.status == CeremonyStatus::Collecting
                && entry.ceremony.is_expired_at(now)
            {
                entry.ceremony.expire();
                if let Err(e) = self.persist(&mut entry).await {
                    warn!(ceremony_id = %ceremony_id, error = %e, "failed to persist expiry");
                }
                self.events.publish(&ProtocolEvent::CeremonyExpired {
                    ceremony_id: ceremony_id.clone(),
                    subnet_id: entry.ceremony.subnet_id.clone(),
                });
                info!(ceremony_id = %ceremony_id, "ceremony expired");
                count += 1;
            }
        }
        count
    }

    /// Run the expiry sweep on a fixed interval until the task is aborted
    pub fn spawn_expiry_sweep(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let interval_secs = coordinator.config.sweep_interval_secs;
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
            loop {
                ticker.tick().await;
                let count = coordinator.expire_overdue().await;
                if count > 0 {
                    debug!(count, "expiry sweep transitioned ceremonies");
                }
            }
        })
    }

    /// Record a slashing event for misbehavior observed during submission.
    /// Failures are logged, never masked over the caller's error.
    async fn record_misbehavior(
        &self,
        validator_id: &ValidatorId,
        reason: SlashingReason,
        severity: SlashingSeverity,
        evidence: Digest,
    ) {
        let reporter = ActorId::new(COORDINATOR_ACTOR);
        if let Err(e) = self
            .slashing
            .record_event(validator_id, reason, severity, evidence, &reporter)
            .await
        {
            warn!(validator_id = %validator_id, error = %e, "failed to record slashing event");
        }
    }
}
