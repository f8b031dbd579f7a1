//! Signing ceremony types
//!
//! A ceremony is one threshold-signing attempt: shares are collected from
//! the validators of one subnet epoch until the scheme threshold is met.
//! The state machine itself lives in `qg-signer`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::actor::{ActorId, ValidatorId};
use super::common::Digest;

/// Ceremony lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CeremonyStatus {
    /// Waiting for shares
    Collecting,
    /// Threshold met, aggregate written
    Complete,
    /// Aggregation failed past the retry bound
    Failed,
    /// Time-to-live elapsed before the threshold was met
    Expired,
}

impl CeremonyStatus {
    /// Check if the ceremony has left `Collecting`
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Collecting)
    }

    /// Whether new shares may still be recorded. Completed ceremonies keep
    /// accepting valid shares for audit; the aggregate never changes.
    pub fn accepts_shares(&self) -> bool {
        matches!(self, Self::Collecting | Self::Complete)
    }
}

/// Operation category a signature is requested for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignaturePurpose {
    Payment,
    GovernanceChange,
    ValidatorRotation,
    ResourcePolicy,
    Custom(String),
}

/// One validator's contribution to a ceremony
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureShare {
    pub validator_id: ValidatorId,
    /// Key-share index of the validator within the ceremony's set
    pub key_index: u32,
    /// Signature bytes (hex)
    pub signature: String,
    /// Hash of the message the share was produced over
    pub message_hash: Digest,
    pub submitted_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

/// Links a ceremony to the business context that opened it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CeremonyMetadata {
    /// Critical operation this ceremony gates, if any
    pub operation_id: Option<String>,
    /// Governance proposal reference, if any
    pub proposal_id: Option<String>,
    /// Workflow step reference, if any
    pub step: Option<String>,
    pub initiated_by: Option<ActorId>,
    /// Marks ceremonies opened on behalf of a critical operation
    pub critical: bool,
}
