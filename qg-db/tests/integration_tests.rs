//! Full-stack integration tests
//!
//! Wires the production BLS backend, the coordinator, and the ledger
//! services together the way an embedding node would, and walks the
//! protocol scenarios end to end: share collection and aggregation,
//! misbehavior slashing, expiry, rotation mid-ceremony, and operation
//! gating.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use qg_core::error::{LedgerError, LedgerResult};
use qg_core::events::{EventSink, FanoutSink, MemoryEventSink, TracingEventSink};
use qg_core::ledger::{OperationExecutor, OperationLedger, SlashingLedger, ValidatorSetLedger};
use qg_core::storage::{Datastore, MemoryDatastore};
use qg_core::types::{
    ActorId, CeremonyMetadata, CeremonyStatus, CriticalOperation, OperationStatus, OperationType,
    SchemeKind, SignaturePurpose, SlashingReason, SubnetId, ValidatorId, ValidatorKeyShare,
    ValidatorStatus,
};
use qg_db::services::{
    IdentityRegistry, OperationEventBridge, OperationService, SlashingService, ValidatorSetService,
};
use qg_signer::backend::{BackendRegistry, ThresholdBackend};
use qg_signer::bls::BlsBackend;
use qg_signer::coordinator::{CoordinatorConfig, ThresholdCoordinator};
use qg_signer::error::CoordinatorError;

struct NullExecutor {
    calls: AtomicU64,
}

#[async_trait]
impl OperationExecutor for NullExecutor {
    async fn execute(&self, operation: &CriticalOperation) -> LedgerResult<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::json!({ "executed": operation.id }))
    }
}

struct Stack {
    store: Arc<MemoryDatastore>,
    sets: Arc<ValidatorSetService>,
    slashing: Arc<SlashingService>,
    identity: Arc<IdentityRegistry>,
    coordinator: Arc<ThresholdCoordinator>,
    operations: Arc<OperationService>,
    events: Arc<MemoryEventSink>,
    executor: Arc<NullExecutor>,
    subnet: SubnetId,
    key_shares: Vec<ValidatorKeyShare>,
}

async fn build_stack(n: usize, t: u32) -> Stack {
    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(BlsBackend::default()));
    let registry = Arc::new(registry);

    let store = Arc::new(MemoryDatastore::new());
    let events = Arc::new(MemoryEventSink::new());
    let fanout = Arc::new(FanoutSink::new(vec![
        Arc::new(TracingEventSink) as Arc<dyn EventSink>,
        events.clone() as Arc<dyn EventSink>,
    ]));

    let sets = Arc::new(ValidatorSetService::new(
        store.clone(),
        registry.clone(),
        fanout.clone(),
    ));
    let slashing = Arc::new(SlashingService::new(
        store.clone(),
        sets.clone(),
        fanout.clone(),
    ));

    let identity = Arc::new(IdentityRegistry::new());
    identity.register("treasurer");
    for i in 0..n {
        identity.register(format!("val_{}", i));
    }

    let coordinator = Arc::new(ThresholdCoordinator::new(
        registry,
        sets.clone(),
        slashing.clone(),
        identity.clone(),
        fanout.clone(),
        store.clone(),
        CoordinatorConfig::default(),
    ));

    let executor = Arc::new(NullExecutor {
        calls: AtomicU64::new(0),
    });
    let operations = Arc::new(OperationService::new(
        store.clone(),
        coordinator.clone(),
        executor.clone(),
        identity.clone(),
        fanout.clone(),
    ));
    fanout.push(Arc::new(OperationEventBridge::new(operations.clone())));

    let subnet = SubnetId::new("subnet-1");
    let validators: Vec<ValidatorId> =
        (0..n).map(|i| ValidatorId::new(format!("val_{}", i))).collect();
    let initialized = sets
        .initialize_set(&subnet, &validators, SchemeKind::Bls12381, t, None)
        .await
        .unwrap();

    Stack {
        store,
        sets,
        slashing,
        identity,
        coordinator,
        operations,
        events,
        executor,
        subnet,
        key_shares: initialized.key_shares,
    }
}

fn sign_with(share: &ValidatorKeyShare, message: &[u8]) -> String {
    BlsBackend::default()
        .partial_sign(&share.secret_key, message)
        .unwrap()
}

async fn open_ceremony(stack: &Stack, message: &[u8]) -> String {
    stack
        .coordinator
        .request_signature(
            &stack.subnet,
            message.to_vec(),
            SignaturePurpose::GovernanceChange,
            CeremonyMetadata::default(),
            None,
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn scenario_a_collection_to_aggregate() {
    let stack = build_stack(5, 3).await;
    let message = b"payload-1";
    let ceremony_id = open_ceremony(&stack, message).await;

    // Two shares: still collecting
    for share in &stack.key_shares[..2] {
        let accepted = stack
            .coordinator
            .submit_share(
                &ceremony_id,
                &share.validator_id,
                &sign_with(share, message),
                None,
            )
            .await
            .unwrap();
        assert!(accepted);
    }
    let ceremony = stack.coordinator.get_ceremony(&ceremony_id).await.unwrap();
    assert_eq!(ceremony.status, CeremonyStatus::Collecting);
    assert_eq!(ceremony.collected_shares(), 2);

    // Third share crosses the threshold
    stack
        .coordinator
        .submit_share(
            &ceremony_id,
            &stack.key_shares[2].validator_id,
            &sign_with(&stack.key_shares[2], message),
            None,
        )
        .await
        .unwrap();

    let ceremony = stack.coordinator.get_ceremony(&ceremony_id).await.unwrap();
    assert_eq!(ceremony.status, CeremonyStatus::Complete);
    let aggregate = ceremony.aggregated_signature.clone().unwrap();
    assert!(BlsBackend::default()
        .verify_aggregate(&aggregate, message)
        .is_ok());

    // A late share is retained for audit, the aggregate unchanged
    let accepted = stack
        .coordinator
        .submit_share(
            &ceremony_id,
            &stack.key_shares[3].validator_id,
            &sign_with(&stack.key_shares[3], message),
            None,
        )
        .await
        .unwrap();
    assert!(accepted);
    let after = stack.coordinator.get_ceremony(&ceremony_id).await.unwrap();
    assert_eq!(after.collected_shares(), 4);
    assert_eq!(
        after.aggregated_signature.unwrap().signature,
        aggregate.signature
    );
    assert_eq!(stack.events.count_kind("ceremony_completed"), 1);

    // The record survived in storage
    let stored = stack
        .store
        .get(&format!("ceremony/{}", ceremony_id))
        .await
        .unwrap();
    assert!(stored.is_some());
}

#[tokio::test]
async fn scenario_b_tampered_share_slashes_reputation() {
    let stack = build_stack(5, 3).await;
    let message = b"payload-1";
    let ceremony_id = open_ceremony(&stack, message).await;
    let validator = stack.key_shares[0].validator_id.clone();

    // A structurally valid but forged signature (96 zero bytes)
    let forged = hex::encode([0u8; 96]);
    let result = stack
        .coordinator
        .submit_share(&ceremony_id, &validator, &forged, None)
        .await;
    assert!(matches!(result, Err(CoordinatorError::InvalidShare { .. })));

    let history = stack.slashing.history(&validator).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].reason, SlashingReason::MaliciousBehavior);

    let set = stack.sets.get_active_set(&stack.subnet, None).await.unwrap();
    let member = set.validator(&validator).unwrap();
    assert!(member.reputation < 500);
    assert_eq!(member.slashing_history.len(), 1);
    assert_eq!(stack.events.count_kind("validator_slashed"), 1);
}

#[tokio::test]
async fn scenario_c_expired_ceremony_rejects_shares() {
    let stack = build_stack(5, 3).await;
    let message = b"payload-1";
    let ceremony_id = stack
        .coordinator
        .request_signature(
            &stack.subnet,
            message.to_vec(),
            SignaturePurpose::Payment,
            CeremonyMetadata::default(),
            Some(0),
        )
        .await
        .unwrap();

    let expired = stack.coordinator.expire_overdue().await;
    assert_eq!(expired, 1);

    let result = stack
        .coordinator
        .submit_share(
            &ceremony_id,
            &stack.key_shares[0].validator_id,
            &sign_with(&stack.key_shares[0], message),
            None,
        )
        .await;
    assert!(matches!(
        result,
        Err(CoordinatorError::TerminalState {
            status: CeremonyStatus::Expired,
            ..
        })
    ));
    assert_eq!(stack.events.count_kind("ceremony_expired"), 1);
}

#[tokio::test]
async fn scenario_d_rotation_mid_ceremony_keeps_snapshot() {
    let stack = build_stack(5, 3).await;
    let message = b"payload-1";
    let ceremony_id = open_ceremony(&stack, message).await;

    // One share, then the set rotates underneath the ceremony
    stack
        .coordinator
        .submit_share(
            &ceremony_id,
            &stack.key_shares[0].validator_id,
            &sign_with(&stack.key_shares[0], message),
            None,
        )
        .await
        .unwrap();

    let validators: Vec<ValidatorId> =
        (0..5).map(|i| ValidatorId::new(format!("val_{}", i))).collect();
    let rotated = stack
        .sets
        .rotate(&stack.subnet, &validators, &ActorId::new("treasurer"))
        .await
        .unwrap();
    assert_eq!(rotated.set.epoch, 1);

    // The in-flight ceremony still completes against epoch 0 keys
    for share in &stack.key_shares[1..3] {
        stack
            .coordinator
            .submit_share(
                &ceremony_id,
                &share.validator_id,
                &sign_with(share, message),
                None,
            )
            .await
            .unwrap();
    }
    let ceremony = stack.coordinator.get_ceremony(&ceremony_id).await.unwrap();
    assert_eq!(ceremony.status, CeremonyStatus::Complete);
    assert_eq!(ceremony.validator_set.epoch, 0);

    // A new ceremony snapshots epoch 1; old-epoch keys no longer verify
    let new_ceremony_id = open_ceremony(&stack, message).await;
    let new_ceremony = stack
        .coordinator
        .get_ceremony(&new_ceremony_id)
        .await
        .unwrap();
    assert_eq!(new_ceremony.validator_set.epoch, 1);

    let stale = stack
        .coordinator
        .submit_share(
            &new_ceremony_id,
            &stack.key_shares[0].validator_id,
            &sign_with(&stack.key_shares[0], message),
            None,
        )
        .await;
    assert!(matches!(stale, Err(CoordinatorError::InvalidShare { .. })));

    // Epoch 1 keys complete the new ceremony
    for share in &rotated.key_shares[1..4] {
        stack
            .coordinator
            .submit_share(
                &new_ceremony_id,
                &share.validator_id,
                &sign_with(share, message),
                None,
            )
            .await
            .unwrap();
    }
    let new_ceremony = stack
        .coordinator
        .get_ceremony(&new_ceremony_id)
        .await
        .unwrap();
    assert_eq!(new_ceremony.status, CeremonyStatus::Complete);
}

#[tokio::test]
async fn operation_gating_end_to_end() {
    let stack = build_stack(5, 3).await;

    let operation = stack
        .operations
        .create(
            OperationType::Payment,
            &stack.subnet,
            "treasury transfer",
            serde_json::json!({"amount": 250_000, "to": "acct-7"}),
            &ActorId::new("treasurer"),
            Utc::now() + Duration::minutes(10),
            1,
            None,
        )
        .await
        .unwrap();
    assert_eq!(operation.status, OperationStatus::Pending);

    let ceremony_id = operation.ceremony_ids[0].clone();
    let ceremony = stack.coordinator.get_ceremony(&ceremony_id).await.unwrap();
    for share in &stack.key_shares[..3] {
        stack
            .coordinator
            .submit_share(
                &ceremony_id,
                &share.validator_id,
                &sign_with(share, &ceremony.message),
                None,
            )
            .await
            .unwrap();
    }

    // Completion propagated synchronously through the event bridge
    let signed = stack.operations.get(&operation.id).await.unwrap().unwrap();
    assert_eq!(signed.status, OperationStatus::Signed);

    let result = stack.operations.execute(&operation.id).await.unwrap();
    assert_eq!(result["executed"], operation.id);
    let again = stack.operations.execute(&operation.id).await.unwrap();
    assert_eq!(again, result);
    assert_eq!(stack.executor.calls.load(Ordering::SeqCst), 1);

    let executed = stack.operations.get(&operation.id).await.unwrap().unwrap();
    assert_eq!(executed.status, OperationStatus::Executed);
    assert!(executed.executed_at.is_some());
}

#[tokio::test]
async fn unknown_principals_are_rejected() {
    let stack = build_stack(3, 2).await;
    let message = b"payload-1";
    let ceremony_id = open_ceremony(&stack, message).await;

    // A validator the identity collaborator does not know
    stack.identity.revoke("val_0");
    let result = stack
        .coordinator
        .submit_share(
            &ceremony_id,
            &stack.key_shares[0].validator_id,
            &sign_with(&stack.key_shares[0], message),
            None,
        )
        .await;
    assert!(matches!(
        result,
        Err(CoordinatorError::UnauthorizedValidator { .. })
    ));

    // An unknown initiator cannot create operations
    let result = stack
        .operations
        .create(
            OperationType::GovernanceChange,
            &stack.subnet,
            "change",
            serde_json::json!({}),
            &ActorId::new("stranger"),
            Utc::now() + Duration::minutes(5),
            1,
            None,
        )
        .await;
    assert!(matches!(result, Err(LedgerError::Validation(_))));
}

#[tokio::test]
async fn compromised_validator_cannot_complete_quorum() {
    let stack = build_stack(3, 2).await;

    // Critical slashing marks val_0 compromised in the active set
    stack
        .slashing
        .record_event(
            &stack.key_shares[0].validator_id,
            SlashingReason::KeyCompromise,
            qg_core::types::SlashingSeverity::Critical,
            qg_core::types::Digest::compute(b"evidence"),
            &ActorId::new("treasurer"),
        )
        .await
        .unwrap();
    let set = stack.sets.get_active_set(&stack.subnet, None).await.unwrap();
    assert_eq!(
        set.validator(&stack.key_shares[0].validator_id).unwrap().status,
        ValidatorStatus::Compromised
    );

    // Ceremonies opened afterwards reject its cryptographically valid shares
    let message = b"payload-1";
    let ceremony_id = open_ceremony(&stack, message).await;
    let result = stack
        .coordinator
        .submit_share(
            &ceremony_id,
            &stack.key_shares[0].validator_id,
            &sign_with(&stack.key_shares[0], message),
            None,
        )
        .await;
    assert!(matches!(
        result,
        Err(CoordinatorError::UnauthorizedValidator { .. })
    ));

    // The remaining validators still reach quorum
    for share in &stack.key_shares[1..3] {
        stack
            .coordinator
            .submit_share(
                &ceremony_id,
                &share.validator_id,
                &sign_with(share, message),
                None,
            )
            .await
            .unwrap();
    }
    let ceremony = stack.coordinator.get_ceremony(&ceremony_id).await.unwrap();
    assert_eq!(ceremony.status, CeremonyStatus::Complete);
}
