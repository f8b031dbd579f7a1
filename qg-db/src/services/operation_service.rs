//! Critical Operation Service
//!
//! Associates signing ceremonies with business-level operations and gates
//! execution on their completion. Operations move forward only:
//! `Pending → Signed → Executed`, with `Failed`/`Expired` reachable from any
//! non-terminal state. Execution is idempotent; the side effect runs once
//! and its stored result is returned on re-execution.
//!
//! Ceremony completions reach the service synchronously through
//! `OperationEventBridge`, an `EventSink` wired into the coordinator's
//! fan-out. Completions for operations already in a terminal state are
//! ignored, which is also the early-abort contract: callers mark an
//! operation failed and any late ceremony completion becomes a no-op.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use qg_core::error::{LedgerError, LedgerResult};
use qg_core::events::{EventSink, ProtocolEvent};
use qg_core::ledger::{IdentityVerifier, OperationExecutor, OperationLedger};
use qg_core::storage::Datastore;
use qg_core::types::{
    ActorId, CeremonyMetadata, CriticalOperation, Digest, OperationStatus, OperationType,
    SignaturePurpose, SubnetId,
};
use qg_signer::coordinator::ThresholdCoordinator;
use qg_signer::error::CoordinatorError;

/// Build the canonical message signed for one sub-signature of an operation
pub fn operation_signing_message(operation_id: &str, index: u32, payload: &Digest) -> Vec<u8> {
    let mut message = Vec::new();
    message.extend_from_slice(b"QG:CriticalOperationMsg:v1\0");
    message.extend_from_slice(operation_id.as_bytes());
    message.push(0);
    message.extend_from_slice(&index.to_le_bytes());
    message.extend_from_slice(payload.as_bytes());
    message
}

fn purpose_for(op_type: OperationType) -> SignaturePurpose {
    match op_type {
        OperationType::Payment => SignaturePurpose::Payment,
        OperationType::GovernanceChange => SignaturePurpose::GovernanceChange,
        OperationType::ValidatorRotation => SignaturePurpose::ValidatorRotation,
        OperationType::ResourcePolicyEdit => SignaturePurpose::ResourcePolicy,
    }
}

fn map_coordinator_error(e: CoordinatorError) -> LedgerError {
    match e {
        CoordinatorError::Ledger(inner) => inner,
        CoordinatorError::NoActiveSet(subnet) => {
            LedgerError::NotFound(format!("No active validator set for subnet {}", subnet))
        }
        other => LedgerError::Validation(other.to_string()),
    }
}

/// Critical Operation Service implementation
pub struct OperationService {
    store: Arc<dyn Datastore>,
    coordinator: Arc<ThresholdCoordinator>,
    executor: Arc<dyn OperationExecutor>,
    identity: Arc<dyn IdentityVerifier>,
    events: Arc<dyn EventSink>,
    operations: RwLock<HashMap<String, CriticalOperation>>,
    /// Ceremony ID to operation ID
    ceremony_index: RwLock<HashMap<String, String>>,
    /// Ceremonies already counted toward their operation
    credited: RwLock<HashSet<String>>,
    /// Operations mutated synchronously, awaiting persistence
    dirty: StdMutex<Vec<CriticalOperation>>,
    /// Per-operation serialization of execute/fail/expiry
    op_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    sequence: AtomicU64,
}

impl OperationService {
    pub fn new(
        store: Arc<dyn Datastore>,
        coordinator: Arc<ThresholdCoordinator>,
        executor: Arc<dyn OperationExecutor>,
        identity: Arc<dyn IdentityVerifier>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            coordinator,
            executor,
            identity,
            events,
            operations: RwLock::new(HashMap::new()),
            ceremony_index: RwLock::new(HashMap::new()),
            credited: RwLock::new(HashSet::new()),
            dirty: StdMutex::new(Vec::new()),
            op_locks: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    fn generate_operation_id(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let timestamp = Utc::now().timestamp_micros();
        format!("op_{:016x}_{:08x}", timestamp, seq)
    }

    fn operation_key(operation_id: &str) -> String {
        format!("operation/{}", operation_id)
    }

    async fn op_lock(&self, operation_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.op_locks.lock().await;
        locks
            .entry(operation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn persist_operation(&self, operation: &CriticalOperation) -> LedgerResult<()> {
        let bytes = serde_json::to_vec(operation)?;
        self.store
            .put(&Self::operation_key(&operation.id), bytes)
            .await?;
        Ok(())
    }

    /// Persist operations mutated on the synchronous event path
    pub async fn flush_dirty(&self) -> LedgerResult<()> {
        let pending: Vec<CriticalOperation> = {
            let mut dirty = self.dirty.lock().unwrap_or_else(|e| e.into_inner());
            dirty.drain(..).collect()
        };
        for operation in pending {
            self.persist_operation(&operation).await?;
        }
        Ok(())
    }

    /// Credit a completed ceremony toward its operation, synchronously.
    /// Idempotent per ceremony; terminal operations ignore late completions.
    pub fn note_ceremony_complete_sync(&self, ceremony_id: &str) {
        let operation_id = {
            let index = self.ceremony_index.read().unwrap();
            match index.get(ceremony_id) {
                Some(id) => id.clone(),
                None => return,
            }
        };

        {
            let mut credited = self.credited.write().unwrap();
            if !credited.insert(ceremony_id.to_string()) {
                return;
            }
        }

        let transitioned = {
            let mut operations = self.operations.write().unwrap();
            let operation = match operations.get_mut(&operation_id) {
                Some(op) => op,
                None => return,
            };
            if operation.status.is_terminal() {
                debug!(
                    operation_id = %operation_id,
                    ceremony_id = %ceremony_id,
                    "ceremony completion ignored for terminal operation"
                );
                return;
            }
            operation.collected_signatures += 1;
            let signed = operation.status == OperationStatus::Pending
                && operation.is_fully_signed();
            if signed {
                operation.status = OperationStatus::Signed;
            }
            let snapshot = operation.clone();
            (signed, snapshot)
        };

        let (signed, snapshot) = transitioned;
        {
            let mut dirty = self.dirty.lock().unwrap_or_else(|e| e.into_inner());
            dirty.push(snapshot.clone());
        }

        if signed {
            info!(
                operation_id = %operation_id,
                count = snapshot.collected_signatures,
                "operation signed"
            );
            self.events.publish(&ProtocolEvent::OperationSigned {
                operation_id: operation_id.clone(),
                subnet_id: snapshot.subnet_id.clone(),
            });
        }
    }

    /// Run the deadline sweep on a fixed interval until the task is aborted
    pub fn spawn_deadline_sweep(
        self: &Arc<Self>,
        interval_secs: u64,
    ) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
            loop {
                ticker.tick().await;
                match service.expire_overdue().await {
                    Ok(count) if count > 0 => {
                        debug!(count, "deadline sweep expired operations")
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "deadline sweep failed"),
                }
            }
        })
    }

    async fn expire_operation(&self, operation_id: &str) -> LedgerResult<Option<CriticalOperation>> {
        let expired = {
            let mut operations = self.operations.write().unwrap();
            let operation = operations
                .get_mut(operation_id)
                .ok_or_else(|| LedgerError::NotFound(format!("Operation {}", operation_id)))?;
            if operation.status.is_terminal() {
                None
            } else {
                operation.status = OperationStatus::Expired;
                Some(operation.clone())
            }
        };

        if let Some(operation) = &expired {
            self.persist_operation(operation).await?;
            self.events.publish(&ProtocolEvent::OperationExpired {
                operation_id: operation.id.clone(),
                subnet_id: operation.subnet_id.clone(),
            });
            info!(operation_id = %operation.id, "operation expired");
        }
        Ok(expired)
    }
}

#[async_trait]
impl OperationLedger for OperationService {
    async fn create(
        &self,
        op_type: OperationType,
        subnet_id: &SubnetId,
        description: &str,
        data: serde_json::Value,
        initiated_by: &ActorId,
        deadline: DateTime<Utc>,
        required_signatures: u32,
        sub_messages: Option<Vec<Vec<u8>>>,
    ) -> LedgerResult<CriticalOperation> {
        if !self.identity.verify_actor(initiated_by.as_str()).await? {
            return Err(LedgerError::Validation(format!(
                "Unknown principal: {}",
                initiated_by
            )));
        }
        if required_signatures < 1 {
            return Err(LedgerError::Validation(
                "At least one signature is required".to_string(),
            ));
        }
        let now = Utc::now();
        let remaining = deadline - now;
        if remaining <= chrono::Duration::zero() {
            return Err(LedgerError::DeadlineExceeded(format!(
                "Deadline {} is not in the future",
                deadline
            )));
        }
        // Gating ceremonies live exactly as long as the operation does
        let ttl_secs = remaining.num_seconds().max(1);
        if let Some(messages) = &sub_messages {
            if messages.len() != required_signatures as usize {
                return Err(LedgerError::Validation(format!(
                    "Expected {} sub-messages, got {}",
                    required_signatures,
                    messages.len()
                )));
            }
        }

        let operation_id = self.generate_operation_id();
        let payload_digest = Digest::compute(&serde_json::to_vec(&data)?);
        let messages = sub_messages.unwrap_or_else(|| {
            (0..required_signatures)
                .map(|i| operation_signing_message(&operation_id, i, &payload_digest))
                .collect()
        });

        let mut ceremony_ids = Vec::with_capacity(messages.len());
        for message in messages {
            let metadata = CeremonyMetadata {
                operation_id: Some(operation_id.clone()),
                proposal_id: None,
                step: None,
                initiated_by: Some(initiated_by.clone()),
                critical: true,
            };
            let ceremony_id = self
                .coordinator
                .request_signature(
                    subnet_id,
                    message,
                    purpose_for(op_type),
                    metadata,
                    Some(ttl_secs),
                )
                .await
                .map_err(map_coordinator_error)?;
            ceremony_ids.push(ceremony_id);
        }

        let operation = CriticalOperation {
            id: operation_id.clone(),
            op_type,
            subnet_id: subnet_id.clone(),
            description: description.to_string(),
            data,
            required_signatures,
            collected_signatures: 0,
            ceremony_ids: ceremony_ids.clone(),
            status: OperationStatus::Pending,
            initiated_by: initiated_by.clone(),
            initiated_at: now,
            deadline,
            byzantine_fault_tolerant: true,
            executed_at: None,
            execution_result: None,
        };

        {
            let mut index = self.ceremony_index.write().unwrap();
            for ceremony_id in &ceremony_ids {
                index.insert(ceremony_id.clone(), operation_id.clone());
            }
        }
        {
            let mut operations = self.operations.write().unwrap();
            operations.insert(operation_id.clone(), operation.clone());
        }
        self.persist_operation(&operation).await?;

        info!(
            operation_id = %operation_id,
            subnet_id = %subnet_id,
            count = operation.ceremony_ids.len(),
            "critical operation created"
        );
        Ok(operation)
    }

    async fn get(&self, operation_id: &str) -> LedgerResult<Option<CriticalOperation>> {
        let operations = self.operations.read().unwrap();
        Ok(operations.get(operation_id).cloned())
    }

    async fn execute(&self, operation_id: &str) -> LedgerResult<serde_json::Value> {
        let lock = self.op_lock(operation_id).await;
        let _guard = lock.lock().await;
        self.flush_dirty().await?;

        let now = Utc::now();
        let snapshot = {
            let operations = self.operations.read().unwrap();
            operations
                .get(operation_id)
                .cloned()
                .ok_or_else(|| LedgerError::NotFound(format!("Operation {}", operation_id)))?
        };

        match snapshot.status {
            OperationStatus::Executed => {
                // Idempotent: the stored result, no second side effect
                Ok(snapshot.execution_result.unwrap_or(serde_json::Value::Null))
            }
            OperationStatus::Signed if snapshot.is_past_deadline(now) => {
                self.expire_operation(operation_id).await?;
                Err(LedgerError::DeadlineExceeded(format!(
                    "Operation {} deadline passed before execution",
                    operation_id
                )))
            }
            OperationStatus::Signed => {
                let result = self.executor.execute(&snapshot).await?;
                let updated = {
                    let mut operations = self.operations.write().unwrap();
                    let operation = operations.get_mut(operation_id).ok_or_else(|| {
                        LedgerError::NotFound(format!("Operation {}", operation_id))
                    })?;
                    operation.status = OperationStatus::Executed;
                    operation.executed_at = Some(now);
                    operation.execution_result = Some(result.clone());
                    operation.clone()
                };
                self.persist_operation(&updated).await?;
                self.events.publish(&ProtocolEvent::OperationExecuted {
                    operation_id: operation_id.to_string(),
                    subnet_id: updated.subnet_id.clone(),
                });
                info!(operation_id = %operation_id, "operation executed");
                Ok(result)
            }
            OperationStatus::Pending => Err(LedgerError::InvalidStateTransition(format!(
                "Operation {} has {}/{} signatures",
                operation_id, snapshot.collected_signatures, snapshot.required_signatures
            ))),
            status => Err(LedgerError::InvalidStateTransition(format!(
                "Operation {} is {:?}",
                operation_id, status
            ))),
        }
    }

    async fn fail(&self, operation_id: &str, reason: &str) -> LedgerResult<CriticalOperation> {
        let lock = self.op_lock(operation_id).await;
        let _guard = lock.lock().await;

        let failed = {
            let mut operations = self.operations.write().unwrap();
            let operation = operations
                .get_mut(operation_id)
                .ok_or_else(|| LedgerError::NotFound(format!("Operation {}", operation_id)))?;
            if operation.status.is_terminal() {
                return Err(LedgerError::InvalidStateTransition(format!(
                    "Operation {} is {:?}",
                    operation_id, operation.status
                )));
            }
            operation.status = OperationStatus::Failed;
            operation.clone()
        };

        self.persist_operation(&failed).await?;
        warn!(operation_id = %operation_id, error = %reason, "operation failed");
        self.events.publish(&ProtocolEvent::OperationFailed {
            operation_id: operation_id.to_string(),
            subnet_id: failed.subnet_id.clone(),
            cause: reason.to_string(),
        });
        Ok(failed)
    }

    async fn note_ceremony_complete(&self, ceremony_id: &str) -> LedgerResult<()> {
        self.note_ceremony_complete_sync(ceremony_id);
        self.flush_dirty().await
    }

    async fn expire_overdue(&self) -> LedgerResult<u32> {
        self.flush_dirty().await?;

        let now = Utc::now();
        let overdue: Vec<String> = {
            let operations = self.operations.read().unwrap();
            operations
                .values()
                .filter(|op| !op.status.is_terminal() && op.is_past_deadline(now))
                .map(|op| op.id.clone())
                .collect()
        };

        let mut count = 0;
        for operation_id in overdue {
            let lock = self.op_lock(&operation_id).await;
            let _guard = lock.lock().await;
            match self.expire_operation(&operation_id).await {
                Ok(Some(_)) => count += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!(operation_id = %operation_id, error = %e, "deadline sweep failed")
                }
            }
        }
        Ok(count)
    }
}

/// Routes ceremony completion events into the operation workflow. Wire this
/// into the fan-out sink handed to the coordinator.
pub struct OperationEventBridge {
    operations: Arc<OperationService>,
}

impl OperationEventBridge {
    pub fn new(operations: Arc<OperationService>) -> Self {
        Self { operations }
    }
}

impl EventSink for OperationEventBridge {
    fn publish(&self, event: &ProtocolEvent) {
        if let ProtocolEvent::CeremonyCompleted { ceremony_id, .. } = event {
            self.operations.note_ceremony_complete_sync(ceremony_id);
        }
    }
}
