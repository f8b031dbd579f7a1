//! Validator Set types
//!
//! A validator set is the per-subnet, per-epoch roster used by signing
//! ceremonies. Sets are superseded (never deleted) on rotation so that
//! historical signatures remain verifiable against the set that produced
//! them. A ceremony snapshots the set it was opened against; later rotations
//! never reach into an in-flight ceremony.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::actor::{SubnetId, ValidatorId};
use crate::constants::{
    DEFAULT_MAX_VALIDATORS, DEFAULT_MAX_VALIDATOR_AGE_SECS, DEFAULT_MIN_VALIDATORS,
    DEFAULT_ROTATION_INTERVAL_SECS,
};

/// Signature scheme implemented by a crypto backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemeKind {
    /// BLS12-381 aggregate signatures
    Bls12381,
    /// Threshold ECDSA over secp256k1
    EcdsaSecp256k1,
    /// CRYSTALS-Dilithium (post-quantum)
    Dilithium3,
}

impl SchemeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bls12381 => "bls12381",
            Self::EcdsaSecp256k1 => "ecdsa_secp256k1",
            Self::Dilithium3 => "dilithium3",
        }
    }
}

impl std::fmt::Display for SchemeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Scheme parameters fixed when a set is initialized
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemeParams {
    /// Backend scheme the set's keys belong to
    pub kind: SchemeKind,
    /// Required distinct shares. Quorum is a plain share count for every
    /// wired scheme; validator weight is recorded for audit only.
    pub threshold: u32,
    /// Total key shares issued
    pub total: u32,
    /// Aggregate public key over the full roster (hex)
    pub aggregate_public_key: String,
    /// Per-validator public key shares (hex), indexed like `validators`
    pub member_public_keys: Vec<String>,
}

/// Validator role within a set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorRole {
    /// Expected to contribute shares to every ceremony
    Primary,
    /// Counted signer, called on when primaries are unavailable
    Backup,
    /// Non-voting; never contributes a counted share
    Observer,
}

/// Validator status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorStatus {
    /// In good standing, shares accepted
    Active,
    /// Temporarily out of rotation
    Inactive,
    /// Key or host compromised; shares rejected even if cryptographically valid
    Compromised,
    /// Being replaced in an ongoing rotation
    Rotating,
}

/// Member of a validator set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorInfo {
    pub validator_id: ValidatorId,
    /// Public key share (hex)
    pub public_key: String,
    /// Voting weight, recorded for audit; does not drive quorum
    pub weight: u32,
    pub role: ValidatorRole,
    pub status: ValidatorStatus,
    /// Reputation score (0..=1000)
    pub reputation: u32,
    /// IDs of slashing events applied to this validator
    pub slashing_history: Vec<String>,
    /// When this validator joined the set
    pub joined_at: DateTime<Utc>,
    /// Last accepted share or explicit heartbeat
    pub last_activity: DateTime<Utc>,
}

impl ValidatorInfo {
    /// Whether this validator's shares count toward a quorum
    pub fn can_sign(&self) -> bool {
        self.status == ValidatorStatus::Active && self.role != ValidatorRole::Observer
    }
}

/// Rotation policy for one validator set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationPolicy {
    /// Set age after which rotation is due
    pub rotation_interval_secs: i64,
    /// Validator inactivity after which rotation is due
    pub max_validator_age_secs: i64,
    /// Minimum validators per set
    pub min_validators: usize,
    /// Maximum validators per set
    pub max_validators: usize,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            rotation_interval_secs: DEFAULT_ROTATION_INTERVAL_SECS,
            max_validator_age_secs: DEFAULT_MAX_VALIDATOR_AGE_SECS,
            min_validators: DEFAULT_MIN_VALIDATORS,
            max_validators: DEFAULT_MAX_VALIDATORS,
        }
    }
}

/// Secret key material handed to one validator at set initialization.
/// Distribution to the validator is an out-of-band concern.
#[derive(Clone, Serialize, Deserialize)]
pub struct ValidatorKeyShare {
    pub validator_id: ValidatorId,
    /// Position of this share within the scheme (0-based)
    pub key_index: u32,
    /// Public key share (hex)
    pub public_key: String,
    /// Secret key share (hex). Never logged.
    pub secret_key: String,
}

impl std::fmt::Debug for ValidatorKeyShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorKeyShare")
            .field("validator_id", &self.validator_id)
            .field("key_index", &self.key_index)
            .field("public_key", &self.public_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Validator set for one subnet epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorSet {
    pub subnet_id: SubnetId,
    /// Monotonic epoch number, starting at 0
    pub epoch: u64,
    pub scheme: SchemeParams,
    pub validators: Vec<ValidatorInfo>,
    pub active_from: DateTime<Utc>,
    /// Set on rotation; a set with no `active_until` is the current one
    pub active_until: Option<DateTime<Utc>>,
    pub rotation_policy: RotationPolicy,
}

impl ValidatorSet {
    /// Required distinct shares for this set's scheme
    pub fn threshold(&self) -> u32 {
        self.scheme.threshold
    }

    /// Total roster size
    pub fn total(&self) -> u32 {
        self.validators.len() as u32
    }

    /// Version string for audit references
    pub fn version_string(&self) -> String {
        format!("{}:{}", self.subnet_id, self.epoch)
    }

    /// Whether the `[active_from, active_until)` window contains `at`
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.active_from <= at && self.active_until.map_or(true, |until| at < until)
    }

    /// Look up a member by validator ID
    pub fn validator(&self, validator_id: &ValidatorId) -> Option<&ValidatorInfo> {
        self.validators
            .iter()
            .find(|v| &v.validator_id == validator_id)
    }

    /// Mutable lookup by validator ID
    pub fn validator_mut(&mut self, validator_id: &ValidatorId) -> Option<&mut ValidatorInfo> {
        self.validators
            .iter_mut()
            .find(|v| &v.validator_id == validator_id)
    }

    /// Index of a member, which is also its key-share index
    pub fn validator_index(&self, validator_id: &ValidatorId) -> Option<usize> {
        self.validators
            .iter()
            .position(|v| &v.validator_id == validator_id)
    }

    /// Whether the set has aged past its rotation interval at `now`
    pub fn is_rotation_overdue(&self, now: DateTime<Utc>) -> bool {
        now - self.active_from > Duration::seconds(self.rotation_policy.rotation_interval_secs)
    }

    /// Whether any validator has been inactive past the policy age at `now`
    pub fn has_stale_validator(&self, now: DateTime<Utc>) -> bool {
        let max_age = Duration::seconds(self.rotation_policy.max_validator_age_secs);
        self.validators
            .iter()
            .any(|v| now - v.last_activity > max_age)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_set(n: usize, t: u32) -> ValidatorSet {
        let now = Utc::now();
        let validators: Vec<ValidatorInfo> = (0..n)
            .map(|i| ValidatorInfo {
                validator_id: ValidatorId::new(format!("val_{}", i)),
                public_key: format!("pk_{}", i),
                weight: 1,
                role: if (i as u32) < t {
                    ValidatorRole::Primary
                } else {
                    ValidatorRole::Backup
                },
                status: ValidatorStatus::Active,
                reputation: 500,
                slashing_history: Vec::new(),
                joined_at: now,
                last_activity: now,
            })
            .collect();
        ValidatorSet {
            subnet_id: SubnetId::new("subnet-1"),
            epoch: 0,
            scheme: SchemeParams {
                kind: SchemeKind::Bls12381,
                threshold: t,
                total: n as u32,
                aggregate_public_key: "agg".to_string(),
                member_public_keys: (0..n).map(|i| format!("pk_{}", i)).collect(),
            },
            validators,
            active_from: now,
            active_until: None,
            rotation_policy: RotationPolicy::default(),
        }
    }

    #[test]
    fn test_active_window() {
        let mut set = make_test_set(5, 3);
        let now = Utc::now();
        assert!(set.is_active_at(now));

        set.active_until = Some(now - Duration::seconds(1));
        assert!(!set.is_active_at(now));
    }

    #[test]
    fn test_validator_lookup_and_index() {
        let set = make_test_set(5, 3);
        let id = ValidatorId::new("val_2");
        assert_eq!(set.validator_index(&id), Some(2));
        assert!(set.validator(&id).is_some());
        assert!(set.validator(&ValidatorId::new("unknown")).is_none());
    }

    #[test]
    fn test_can_sign_excludes_observers_and_compromised() {
        let mut set = make_test_set(5, 3);
        set.validators[0].role = ValidatorRole::Observer;
        set.validators[1].status = ValidatorStatus::Compromised;

        assert!(!set.validators[0].can_sign());
        assert!(!set.validators[1].can_sign());
        assert!(set.validators[2].can_sign());
    }

    #[test]
    fn test_rotation_overdue() {
        let mut set = make_test_set(5, 3);
        assert!(!set.is_rotation_overdue(Utc::now()));

        set.active_from = Utc::now()
            - Duration::seconds(set.rotation_policy.rotation_interval_secs + 60);
        assert!(set.is_rotation_overdue(Utc::now()));
    }

    #[test]
    fn test_key_share_debug_redacts_secret() {
        let share = ValidatorKeyShare {
            validator_id: ValidatorId::new("val_0"),
            key_index: 0,
            public_key: "pk".to_string(),
            secret_key: "sk".to_string(),
        };
        let rendered = format!("{:?}", share);
        assert!(!rendered.contains("sk"));
        assert!(rendered.contains("<redacted>"));
    }
}
