//! Critical operation types
//!
//! A critical operation is a business action (payment, governance change,
//! validator rotation, resource-policy edit) gated on one or more completed
//! signing ceremonies before it may execute.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::actor::{ActorId, SubnetId};

/// Business category of a critical operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Payment,
    GovernanceChange,
    ValidatorRotation,
    ResourcePolicyEdit,
}

/// Operation lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting for ceremonies to complete
    Pending,
    /// Quorum reached on every required ceremony
    Signed,
    /// Side effect performed; terminal and idempotent
    Executed,
    /// Aborted by the caller or an unrecoverable error
    Failed,
    /// Deadline passed before execution
    Expired,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Failed | Self::Expired)
    }

    /// Forward-only transition check: `Pending → Signed → Executed`, with
    /// `Failed`/`Expired` reachable from any non-terminal state.
    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Signed) => true,
            (Self::Signed, Self::Executed) => true,
            (Self::Pending | Self::Signed, Self::Failed | Self::Expired) => true,
            _ => false,
        }
    }
}

/// A business action gated by signing ceremonies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticalOperation {
    pub id: String,
    pub op_type: OperationType,
    pub subnet_id: SubnetId,
    pub description: String,
    /// Opaque operation payload, fixed at creation
    pub data: serde_json::Value,
    /// Completed ceremonies required before the operation is `Signed`
    pub required_signatures: u32,
    pub collected_signatures: u32,
    /// Ceremonies opened for this operation
    pub ceremony_ids: Vec<String>,
    pub status: OperationStatus,
    pub initiated_by: ActorId,
    pub initiated_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    /// Whether the quorum must tolerate Byzantine validators
    pub byzantine_fault_tolerant: bool,
    pub executed_at: Option<DateTime<Utc>>,
    /// Result stored on first execution; returned verbatim on re-execution
    pub execution_result: Option<serde_json::Value>,
}

impl CriticalOperation {
    pub fn is_fully_signed(&self) -> bool {
        self.collected_signatures >= self.required_signatures
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }
}
