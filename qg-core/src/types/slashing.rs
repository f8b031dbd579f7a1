//! Slashing and reputation types
//!
//! Misbehavior is recorded as evidence-backed slashing events. Penalties are
//! monotonic: reputation only decreases from slashing; rehabilitation is a
//! separate concern outside this protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::actor::{ActorId, SubnetId, ValidatorId};
use super::common::Digest;
use crate::constants::{PENALTY_CRITICAL, PENALTY_MAJOR, PENALTY_MINOR, PENALTY_WARNING};

/// Misbehavior category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlashingReason {
    /// Two distinct signatures under the same ordering key
    DoubleSigning,
    /// Missed participation over an extended window
    Unavailability,
    /// Cryptographically invalid or forged share submission
    MaliciousBehavior,
    /// Key material known or suspected compromised
    KeyCompromise,
}

/// Severity of a slashing event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlashingSeverity {
    Warning,
    Minor,
    Major,
    /// Forces the validator to `Compromised` regardless of prior state
    Critical,
}

impl SlashingSeverity {
    /// Reputation delta applied for this severity
    pub fn penalty(&self) -> u32 {
        match self {
            Self::Warning => PENALTY_WARNING,
            Self::Minor => PENALTY_MINOR,
            Self::Major => PENALTY_MAJOR,
            Self::Critical => PENALTY_CRITICAL,
        }
    }
}

/// Evidence-backed penalty record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlashingEvent {
    pub id: String,
    pub validator_id: ValidatorId,
    pub reason: SlashingReason,
    pub severity: SlashingSeverity,
    /// Reputation delta that was applied
    pub penalty: u32,
    /// Digest of the misbehavior evidence
    pub evidence: Digest,
    pub reported_by: ActorId,
    pub reported_at: DateTime<Utc>,
    /// Resolution stops further enforcement; it never reverses the penalty
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Externally supplied ordering key for cross-ceremony double-sign
/// detection. Two distinct message hashes observed from one validator under
/// the same marker constitute double-signing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictMarker {
    pub subnet_id: SubnetId,
    pub epoch: u64,
    /// Consumer-defined ordering position (height, slot, round)
    pub slot: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_penalty_table() {
        assert_eq!(SlashingSeverity::Warning.penalty(), 5);
        assert_eq!(SlashingSeverity::Minor.penalty(), 20);
        assert_eq!(SlashingSeverity::Major.penalty(), 50);
        assert_eq!(SlashingSeverity::Critical.penalty(), 200);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(SlashingSeverity::Warning < SlashingSeverity::Minor);
        assert!(SlashingSeverity::Major < SlashingSeverity::Critical);
    }
}
