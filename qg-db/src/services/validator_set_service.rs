//! Validator Set Service
//!
//! Owns the per-subnet roster lifecycle: epoch initialization, rotation,
//! activity tracking, reputation penalties, and the rotation-due sweep.
//! Initialization and rotation are serialized per subnet so no two sets can
//! ever be active for overlapping windows. Superseded epochs are retained
//! for verification of historical signatures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{info, warn};

use qg_core::constants::REPUTATION_INITIAL;
use qg_core::error::{LedgerError, LedgerResult};
use qg_core::events::{EventSink, ProtocolEvent};
use qg_core::ledger::{InitializedSet, ValidatorSetLedger};
use qg_core::storage::Datastore;
use qg_core::types::{
    ActorId, RotationPolicy, SchemeKind, SchemeParams, SubnetId, ValidatorId, ValidatorInfo,
    ValidatorKeyShare, ValidatorRole, ValidatorSet, ValidatorStatus,
};
use qg_signer::backend::BackendRegistry;

/// Audit record written on every rotation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationRecord {
    pub subnet_id: SubnetId,
    pub old_epoch: u64,
    pub new_epoch: u64,
    pub rotated_by: ActorId,
    pub rotated_at: DateTime<Utc>,
}

/// Validator Set Service implementation
pub struct ValidatorSetService {
    store: Arc<dyn Datastore>,
    backends: Arc<BackendRegistry>,
    events: Arc<dyn EventSink>,
    /// Epoch-ordered sets per subnet; the last entry is the newest
    sets: RwLock<HashMap<SubnetId, Vec<ValidatorSet>>>,
    /// Per-subnet serialization of initialize/rotate
    subnet_locks: Mutex<HashMap<SubnetId, Arc<Mutex<()>>>>,
    /// Rotation policy applied to newly created sets
    rotation_policy: RotationPolicy,
    sequence: AtomicU64,
}

impl ValidatorSetService {
    pub fn new(
        store: Arc<dyn Datastore>,
        backends: Arc<BackendRegistry>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self::with_rotation_policy(store, backends, events, RotationPolicy::default())
    }

    pub fn with_rotation_policy(
        store: Arc<dyn Datastore>,
        backends: Arc<BackendRegistry>,
        events: Arc<dyn EventSink>,
        rotation_policy: RotationPolicy,
    ) -> Self {
        Self {
            store,
            backends,
            events,
            sets: RwLock::new(HashMap::new()),
            subnet_locks: Mutex::new(HashMap::new()),
            rotation_policy,
            sequence: AtomicU64::new(0),
        }
    }

    async fn subnet_lock(&self, subnet_id: &SubnetId) -> Arc<Mutex<()>> {
        let mut locks = self.subnet_locks.lock().await;
        locks
            .entry(subnet_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn set_key(subnet_id: &SubnetId, epoch: u64) -> String {
        format!("validator_set/{}/{}", subnet_id, epoch)
    }

    fn validate_roster(
        &self,
        validator_ids: &[ValidatorId],
        threshold: u32,
    ) -> LedgerResult<()> {
        let total = validator_ids.len() as u32;
        if threshold < 1 || threshold > total {
            return Err(LedgerError::InvalidThreshold { threshold, total });
        }
        let mut seen = std::collections::HashSet::new();
        for id in validator_ids {
            if !seen.insert(id) {
                return Err(LedgerError::Validation(format!(
                    "Duplicate validator: {}",
                    id
                )));
            }
        }
        if validator_ids.len() < self.rotation_policy.min_validators
            || validator_ids.len() > self.rotation_policy.max_validators
        {
            return Err(LedgerError::Validation(format!(
                "Validator count {} outside policy bounds [{}, {}]",
                validator_ids.len(),
                self.rotation_policy.min_validators,
                self.rotation_policy.max_validators
            )));
        }
        Ok(())
    }

    /// Derive key shares and build the set for one new epoch. Caller holds
    /// the subnet lock.
    async fn create_epoch(
        &self,
        subnet_id: &SubnetId,
        validator_ids: &[ValidatorId],
        scheme: SchemeKind,
        threshold: u32,
        roles: Option<&HashMap<ValidatorId, ValidatorRole>>,
        epoch: u64,
    ) -> LedgerResult<InitializedSet> {
        let backend = self
            .backends
            .get(scheme)
            .map_err(|e| LedgerError::Crypto(e.to_string()))?;
        let material = backend
            .generate_key_shares(validator_ids.len() as u32, threshold)
            .map_err(|e| LedgerError::Crypto(e.to_string()))?;

        let now = Utc::now();
        let mut validators = Vec::with_capacity(validator_ids.len());
        let mut key_shares = Vec::with_capacity(validator_ids.len());
        for (i, validator_id) in validator_ids.iter().enumerate() {
            let share = &material.shares[i];
            let role = roles
                .and_then(|map| map.get(validator_id).copied())
                .unwrap_or(if (i as u32) < threshold {
                    ValidatorRole::Primary
                } else {
                    ValidatorRole::Backup
                });
            validators.push(ValidatorInfo {
                validator_id: validator_id.clone(),
                public_key: share.public_key.clone(),
                weight: 1,
                role,
                status: ValidatorStatus::Active,
                reputation: REPUTATION_INITIAL,
                slashing_history: Vec::new(),
                joined_at: now,
                last_activity: now,
            });
            key_shares.push(ValidatorKeyShare {
                validator_id: validator_id.clone(),
                key_index: share.index,
                public_key: share.public_key.clone(),
                secret_key: share.secret_key.clone(),
            });
        }

        let set = ValidatorSet {
            subnet_id: subnet_id.clone(),
            epoch,
            scheme: SchemeParams {
                kind: scheme,
                threshold,
                total: validator_ids.len() as u32,
                aggregate_public_key: material.aggregate_public_key.clone(),
                member_public_keys: material
                    .shares
                    .iter()
                    .map(|s| s.public_key.clone())
                    .collect(),
            },
            validators,
            active_from: now,
            active_until: None,
            rotation_policy: self.rotation_policy.clone(),
        };

        let bytes = serde_json::to_vec(&set)?;
        self.store.put(&Self::set_key(subnet_id, epoch), bytes).await?;

        Ok(InitializedSet { set, key_shares })
    }

    async fn persist_set(&self, set: &ValidatorSet) -> LedgerResult<()> {
        let bytes = serde_json::to_vec(set)?;
        self.store
            .put(&Self::set_key(&set.subnet_id, set.epoch), bytes)
            .await?;
        Ok(())
    }

    fn generate_rotation_id(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Run the rotation-due check on a fixed interval until the task is
    /// aborted. Signals only; rotation stays an explicit call.
    pub fn spawn_rotation_check(
        self: &Arc<Self>,
        interval_secs: u64,
    ) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
            loop {
                ticker.tick().await;
                if let Err(e) = service.rotation_due().await {
                    warn!(error = %e, "rotation check failed");
                }
            }
        })
    }
}

#[async_trait]
impl ValidatorSetLedger for ValidatorSetService {
    async fn initialize_set(
        &self,
        subnet_id: &SubnetId,
        validator_ids: &[ValidatorId],
        scheme: SchemeKind,
        threshold: u32,
        roles: Option<&HashMap<ValidatorId, ValidatorRole>>,
    ) -> LedgerResult<InitializedSet> {
        self.validate_roster(validator_ids, threshold)?;

        let lock = self.subnet_lock(subnet_id).await;
        let _guard = lock.lock().await;

        let now = Utc::now();
        let epoch = {
            let sets = self.sets.read().unwrap();
            match sets.get(subnet_id).and_then(|v| v.last()) {
                Some(current) if current.is_active_at(now) => {
                    return Err(LedgerError::AlreadyExists(format!(
                        "Subnet {} has an active validator set; use rotate",
                        subnet_id
                    )))
                }
                Some(current) => current.epoch + 1,
                None => 0,
            }
        };

        let initialized = self
            .create_epoch(subnet_id, validator_ids, scheme, threshold, roles, epoch)
            .await?;

        {
            let mut sets = self.sets.write().unwrap();
            sets.entry(subnet_id.clone())
                .or_default()
                .push(initialized.set.clone());
        }

        info!(
            subnet_id = %subnet_id,
            epoch,
            count = validator_ids.len(),
            "validator set initialized"
        );
        self.events.publish(&ProtocolEvent::SetInitialized {
            subnet_id: subnet_id.clone(),
            epoch,
            threshold,
            total: validator_ids.len() as u32,
        });

        Ok(initialized)
    }

    async fn rotate(
        &self,
        subnet_id: &SubnetId,
        new_validator_ids: &[ValidatorId],
        rotated_by: &ActorId,
    ) -> LedgerResult<InitializedSet> {
        let lock = self.subnet_lock(subnet_id).await;
        let _guard = lock.lock().await;

        let now = Utc::now();
        let (old_epoch, scheme, threshold) = {
            let sets = self.sets.read().unwrap();
            let current = sets
                .get(subnet_id)
                .and_then(|v| v.last())
                .ok_or_else(|| {
                    LedgerError::NotFound(format!("No validator set for subnet {}", subnet_id))
                })?;
            if !current.is_active_at(now) {
                return Err(LedgerError::InvalidStateTransition(format!(
                    "Subnet {} has no active set to rotate",
                    subnet_id
                )));
            }
            (current.epoch, current.scheme.kind, current.scheme.threshold)
        };
        self.validate_roster(new_validator_ids, threshold)?;

        // Close the current epoch; in-flight ceremonies keep the snapshot
        // they were opened with.
        let closed = {
            let mut sets = self.sets.write().unwrap();
            let current = sets
                .get_mut(subnet_id)
                .and_then(|v| v.last_mut())
                .ok_or_else(|| {
                    LedgerError::NotFound(format!("No validator set for subnet {}", subnet_id))
                })?;
            current.active_until = Some(now);
            current.clone()
        };
        self.persist_set(&closed).await?;

        let new_epoch = old_epoch + 1;
        let initialized = self
            .create_epoch(subnet_id, new_validator_ids, scheme, threshold, None, new_epoch)
            .await?;

        {
            let mut sets = self.sets.write().unwrap();
            sets.entry(subnet_id.clone())
                .or_default()
                .push(initialized.set.clone());
        }

        let record = RotationRecord {
            subnet_id: subnet_id.clone(),
            old_epoch,
            new_epoch,
            rotated_by: rotated_by.clone(),
            rotated_at: now,
        };
        let key = format!(
            "rotation/{}/{}_{:08x}",
            subnet_id,
            new_epoch,
            self.generate_rotation_id()
        );
        self.store.put(&key, serde_json::to_vec(&record)?).await?;

        info!(
            subnet_id = %subnet_id,
            epoch = new_epoch,
            count = new_validator_ids.len(),
            "validator set rotated"
        );
        self.events.publish(&ProtocolEvent::SetRotated {
            subnet_id: subnet_id.clone(),
            old_epoch,
            new_epoch,
            rotated_by: rotated_by.clone(),
        });

        Ok(initialized)
    }

    async fn get_active_set(
        &self,
        subnet_id: &SubnetId,
        at: Option<DateTime<Utc>>,
    ) -> LedgerResult<ValidatorSet> {
        let at = at.unwrap_or_else(Utc::now);
        let sets = self.sets.read().unwrap();
        sets.get(subnet_id)
            .and_then(|v| v.iter().find(|s| s.is_active_at(at)))
            .cloned()
            .ok_or_else(|| {
                LedgerError::NotFound(format!(
                    "No active validator set for subnet {} at {}",
                    subnet_id, at
                ))
            })
    }

    async fn get_set(&self, subnet_id: &SubnetId, epoch: u64) -> LedgerResult<Option<ValidatorSet>> {
        let sets = self.sets.read().unwrap();
        Ok(sets
            .get(subnet_id)
            .and_then(|v| v.iter().find(|s| s.epoch == epoch))
            .cloned())
    }

    async fn record_activity(&self, validator_id: &ValidatorId) -> LedgerResult<()> {
        let now = Utc::now();
        let updated = {
            let mut sets = self.sets.write().unwrap();
            let mut updated = None;
            for subnet_sets in sets.values_mut() {
                if let Some(current) = subnet_sets.last_mut().filter(|s| s.is_active_at(now)) {
                    if let Some(member) = current.validator_mut(validator_id) {
                        member.last_activity = now;
                        updated = Some(current.clone());
                        break;
                    }
                }
            }
            updated
        };

        match updated {
            Some(set) => self.persist_set(&set).await,
            None => Err(LedgerError::NotFound(format!(
                "Validator {} not in any active set",
                validator_id
            ))),
        }
    }

    async fn apply_penalty(
        &self,
        validator_id: &ValidatorId,
        penalty: u32,
        event_id: &str,
        force_compromised: bool,
    ) -> LedgerResult<u32> {
        let now = Utc::now();
        let (reputation, set) = {
            let mut sets = self.sets.write().unwrap();
            let mut applied = None;
            for subnet_sets in sets.values_mut() {
                if let Some(current) = subnet_sets.last_mut().filter(|s| s.is_active_at(now)) {
                    if let Some(member) = current.validator_mut(validator_id) {
                        member.reputation = member.reputation.saturating_sub(penalty);
                        member.slashing_history.push(event_id.to_string());
                        if force_compromised || member.reputation == 0 {
                            member.status = ValidatorStatus::Compromised;
                        }
                        let reputation = member.reputation;
                        applied = Some((reputation, current.clone()));
                        break;
                    }
                }
            }
            applied.ok_or_else(|| {
                LedgerError::NotFound(format!(
                    "Validator {} not in any active set",
                    validator_id
                ))
            })?
        };

        self.persist_set(&set).await?;
        warn!(
            validator_id = %validator_id,
            count = penalty,
            status = ?set.validator(validator_id).map(|v| v.status),
            "penalty applied"
        );
        Ok(reputation)
    }

    async fn rotation_due(&self) -> LedgerResult<Vec<SubnetId>> {
        let now = Utc::now();
        let due: Vec<(SubnetId, u64, String)> = {
            let sets = self.sets.read().unwrap();
            sets.iter()
                .filter_map(|(subnet_id, subnet_sets)| {
                    let current = subnet_sets.last().filter(|s| s.is_active_at(now))?;
                    if current.is_rotation_overdue(now) {
                        Some((
                            subnet_id.clone(),
                            current.epoch,
                            "rotation interval exceeded".to_string(),
                        ))
                    } else if current.has_stale_validator(now) {
                        Some((
                            subnet_id.clone(),
                            current.epoch,
                            "validator activity stale".to_string(),
                        ))
                    } else {
                        None
                    }
                })
                .collect()
        };

        for (subnet_id, epoch, cause) in &due {
            warn!(subnet_id = %subnet_id, epoch, error = %cause, "rotation due");
            self.events.publish(&ProtocolEvent::RotationDue {
                subnet_id: subnet_id.clone(),
                epoch: *epoch,
                cause: cause.clone(),
            });
        }

        Ok(due.into_iter().map(|(subnet_id, _, _)| subnet_id).collect())
    }
}
