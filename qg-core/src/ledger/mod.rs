//! Ledger interfaces
//!
//! Quorumgate maintains three ledgers plus two external collaborators:
//! - Validator-Set Ledger: per-subnet epochs, rotation, reputation state
//! - Slashing Ledger: misbehavior evidence and penalties
//! - Operation Ledger: critical operations gated on quorum approval
//! - Identity verification and operation execution are consumed interfaces
//!   owned by the surrounding system.
//!
//! Implementations live in `qg-db`; the coordinator in `qg-signer` consumes
//! `ValidatorSetLedger`, `SlashingLedger`, and `IdentityVerifier`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::LedgerResult;
use crate::types::{
    ActorId, ConflictMarker, CriticalOperation, Digest, OperationType, SchemeKind, SlashingEvent,
    SlashingReason, SlashingSeverity, SubnetId, ValidatorId, ValidatorKeyShare, ValidatorRole,
    ValidatorSet,
};

/// A freshly initialized validator set together with the secret key shares
/// to be distributed out-of-band to its members
#[derive(Debug, Clone)]
pub struct InitializedSet {
    pub set: ValidatorSet,
    pub key_shares: Vec<ValidatorKeyShare>,
}

/// Validator-Set Ledger trait
#[async_trait]
pub trait ValidatorSetLedger: Send + Sync {
    /// Create the next epoch for a subnet (epoch 0 on first registration).
    /// Fails with `InvalidThreshold` when `threshold < 1` or
    /// `threshold > validator_ids.len()`, and with `AlreadyExists` when the
    /// subnet already has an active set (use `rotate`).
    async fn initialize_set(
        &self,
        subnet_id: &SubnetId,
        validator_ids: &[ValidatorId],
        scheme: SchemeKind,
        threshold: u32,
        roles: Option<&HashMap<ValidatorId, ValidatorRole>>,
    ) -> LedgerResult<InitializedSet>;

    /// Supersede the current set and activate a new epoch. Serialized per
    /// subnet; ceremonies opened against the old epoch keep their snapshot.
    async fn rotate(
        &self,
        subnet_id: &SubnetId,
        new_validator_ids: &[ValidatorId],
        rotated_by: &ActorId,
    ) -> LedgerResult<InitializedSet>;

    /// The set whose activity window contains `at` (default: now)
    async fn get_active_set(
        &self,
        subnet_id: &SubnetId,
        at: Option<DateTime<Utc>>,
    ) -> LedgerResult<ValidatorSet>;

    /// A historical or current set by epoch
    async fn get_set(&self, subnet_id: &SubnetId, epoch: u64) -> LedgerResult<Option<ValidatorSet>>;

    /// Record a validator heartbeat (accepted share or explicit ping)
    async fn record_activity(&self, validator_id: &ValidatorId) -> LedgerResult<()>;

    /// Apply a reputation penalty to a validator in its current set,
    /// appending `event_id` to its slashing history. Flips the validator to
    /// `Compromised` when forced or when reputation reaches 0. Returns the
    /// post-penalty reputation. Serialized per validator.
    async fn apply_penalty(
        &self,
        validator_id: &ValidatorId,
        penalty: u32,
        event_id: &str,
        force_compromised: bool,
    ) -> LedgerResult<u32>;

    /// Emit rotation-due signals for sets violating their rotation policy.
    /// Signals only; rotation is always an explicit `rotate` call.
    async fn rotation_due(&self) -> LedgerResult<Vec<SubnetId>>;
}

/// Slashing Ledger trait
#[async_trait]
pub trait SlashingLedger: Send + Sync {
    /// Record misbehavior evidence and apply its penalty
    async fn record_event(
        &self,
        validator_id: &ValidatorId,
        reason: SlashingReason,
        severity: SlashingSeverity,
        evidence: Digest,
        reported_by: &ActorId,
    ) -> LedgerResult<SlashingEvent>;

    /// Mark an event resolved. The penalty stands; resolution only stops
    /// further enforcement tied to the event.
    async fn resolve(&self, event_id: &str, resolved_by: &ActorId) -> LedgerResult<SlashingEvent>;

    /// All events recorded against a validator
    async fn history(&self, validator_id: &ValidatorId) -> LedgerResult<Vec<SlashingEvent>>;

    /// Record a signature observation under an external ordering key. A
    /// second observation with a different message hash automatically
    /// records a critical double-signing event, which is returned.
    async fn observe_signing(
        &self,
        marker: &ConflictMarker,
        validator_id: &ValidatorId,
        message_hash: Digest,
    ) -> LedgerResult<Option<SlashingEvent>>;
}

/// Operation Ledger trait
#[async_trait]
pub trait OperationLedger: Send + Sync {
    /// Create a critical operation and open its gating ceremonies. When
    /// `sub_messages` is provided one ceremony is opened per sub-message;
    /// otherwise `required_signatures` derived messages are used.
    #[allow(clippy::too_many_arguments)]
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
    ) -> LedgerResult<CriticalOperation>;

    async fn get(&self, operation_id: &str) -> LedgerResult<Option<CriticalOperation>>;

    /// Perform the operation's side effect exactly once; a second call
    /// returns the stored result without re-invoking it.
    async fn execute(&self, operation_id: &str) -> LedgerResult<serde_json::Value>;

    /// Early abort from any non-terminal state
    async fn fail(&self, operation_id: &str, reason: &str) -> LedgerResult<CriticalOperation>;

    /// Credit a completed ceremony toward its operation. Idempotent;
    /// completions for terminal operations are ignored.
    async fn note_ceremony_complete(&self, ceremony_id: &str) -> LedgerResult<()>;

    /// Deadline sweep: expire overdue operations, returning the count
    async fn expire_overdue(&self) -> LedgerResult<u32>;
}

/// Identity/authentication collaborator. Confirms a submitting or initiating
/// principal is known and authenticated before the protocol acts on it.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify_actor(&self, actor: &str) -> LedgerResult<bool>;
}

/// Execution collaborator performing a critical operation's side effect
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    /// Called at most once per operation, from the `Signed` state
    async fn execute(&self, operation: &CriticalOperation) -> LedgerResult<serde_json::Value>;
}
