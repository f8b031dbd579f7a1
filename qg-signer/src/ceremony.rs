//! Signing ceremony state machine
//!
//! A ceremony collects signature shares from the validators of one subnet
//! epoch until the scheme threshold is met, then carries the aggregate
//! produced from the first `threshold` distinct shares in arrival order.
//! The ceremony owns a copy of the validator set it was opened against;
//! a later rotation never reaches an in-flight ceremony.
//!
//! State transitions: `Collecting → Complete | Failed | Expired`. The three
//! right-hand states are terminal; `Complete` additionally retains late
//! valid shares for audit without ever touching the aggregate.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use qg_core::types::{
    CeremonyMetadata, CeremonyStatus, Digest, SignaturePurpose, SignatureShare, SubnetId,
    ValidatorId, ValidatorSet,
};

use crate::backend::AggregateSignature;

/// Outcome of recording a share
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareOutcome {
    /// Share recorded
    Accepted,
    /// Identical share already recorded; no state change
    Duplicate,
    /// A different share from the same validator already exists
    Conflicting {
        /// Signature of the share recorded first
        existing_signature: String,
    },
}

/// A single signing ceremony
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningCeremony {
    pub id: String,
    pub subnet_id: SubnetId,
    /// The exact bytes being signed
    pub message: Vec<u8>,
    pub message_hash: Digest,
    pub purpose: SignaturePurpose,
    pub metadata: CeremonyMetadata,
    /// Validator set snapshot the ceremony runs against
    pub validator_set: ValidatorSet,
    /// Distinct shares in arrival order
    shares: Vec<SignatureShare>,
    pub status: CeremonyStatus,
    pub required_shares: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub aggregated_signature: Option<AggregateSignature>,
    /// Consecutive failed aggregation attempts
    pub aggregate_attempts: u32,
    /// Cause recorded when the ceremony fails
    pub failure_cause: Option<String>,
}

impl SigningCeremony {
    /// Open a ceremony against a validator-set snapshot
    pub fn new(
        id: String,
        message: Vec<u8>,
        purpose: SignaturePurpose,
        metadata: CeremonyMetadata,
        validator_set: ValidatorSet,
        ttl: Duration,
    ) -> Self {
        let message_hash = Digest::compute(&message);
        let now = Utc::now();
        Self {
            id,
            subnet_id: validator_set.subnet_id.clone(),
            message,
            message_hash,
            purpose,
            metadata,
            required_shares: validator_set.threshold(),
            validator_set,
            shares: Vec::new(),
            status: CeremonyStatus::Collecting,
            created_at: now,
            expires_at: now + ttl,
            completed_at: None,
            aggregated_signature: None,
            aggregate_attempts: 0,
            failure_cause: None,
        }
    }

    /// Number of distinct shares recorded
    pub fn collected_shares(&self) -> u32 {
        self.shares.len() as u32
    }

    /// All recorded shares, arrival order (including post-completion audit
    /// shares)
    pub fn shares(&self) -> &[SignatureShare] {
        &self.shares
    }

    /// The recorded share from one validator, if any
    pub fn share_from(&self, validator_id: &ValidatorId) -> Option<&SignatureShare> {
        self.shares.iter().find(|s| &s.validator_id == validator_id)
    }

    pub fn threshold_met(&self) -> bool {
        self.collected_shares() >= self.required_shares
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// The aggregation subset: the first `required_shares` distinct shares
    /// in arrival order. Deterministic given a fixed observation order.
    pub fn aggregation_set(&self) -> &[SignatureShare] {
        let take = (self.required_shares as usize).min(self.shares.len());
        &self.shares[..take]
    }

    /// Record a share. Authorization and cryptographic verification are the
    /// caller's responsibility; this only enforces per-validator uniqueness.
    pub fn record_share(&mut self, share: SignatureShare) -> ShareOutcome {
        if let Some(existing) = self.share_from(&share.validator_id) {
            if existing.signature == share.signature {
                return ShareOutcome::Duplicate;
            }
            return ShareOutcome::Conflicting {
                existing_signature: existing.signature.clone(),
            };
        }
        self.shares.push(share);
        ShareOutcome::Accepted
    }

    /// Write the aggregate and transition to `Complete`. A no-op unless the
    /// ceremony is still `Collecting`; the aggregate is written exactly once.
    pub fn complete(&mut self, aggregate: AggregateSignature, now: DateTime<Utc>) {
        if self.status != CeremonyStatus::Collecting {
            return;
        }
        self.aggregated_signature = Some(aggregate);
        self.completed_at = Some(now);
        self.status = CeremonyStatus::Complete;
    }

    /// Transition to `Expired` if still collecting
    pub fn expire(&mut self) {
        if self.status == CeremonyStatus::Collecting {
            self.status = CeremonyStatus::Expired;
        }
    }

    /// Transition to `Failed` with a cause, from any non-terminal state
    pub fn fail(&mut self, cause: &str) {
        if self.status == CeremonyStatus::Collecting {
            self.status = CeremonyStatus::Failed;
            self.failure_cause = Some(cause.to_string());
        }
    }

    /// Count one failed aggregation attempt; returns the running total
    pub fn note_aggregation_failure(&mut self) -> u32 {
        self.aggregate_attempts += 1;
        self.aggregate_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qg_core::types::{
        RotationPolicy, SchemeKind, SchemeParams, ValidatorInfo, ValidatorRole, ValidatorStatus,
    };

    fn make_test_set(n: usize, t: u32) -> ValidatorSet {
        let now = Utc::now();
        let validators: Vec<ValidatorInfo> = (0..n)
            .map(|i| ValidatorInfo {
                validator_id: ValidatorId::new(format!("val_{}", i)),
                public_key: format!("pk_{}", i),
                weight: 1,
                role: ValidatorRole::Primary,
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

    fn make_ceremony(n: usize, t: u32, ttl_secs: i64) -> SigningCeremony {
        SigningCeremony::new(
            "cer_1".to_string(),
            b"payload-1".to_vec(),
            SignaturePurpose::Payment,
            CeremonyMetadata::default(),
            make_test_set(n, t),
            Duration::seconds(ttl_secs),
        )
    }

    fn make_share(i: usize, signature: &str) -> SignatureShare {
        SignatureShare {
            validator_id: ValidatorId::new(format!("val_{}", i)),
            key_index: i as u32,
            signature: signature.to_string(),
            message_hash: Digest::compute(b"payload-1"),
            submitted_at: Utc::now(),
            metadata: None,
        }
    }

    fn make_aggregate() -> AggregateSignature {
        AggregateSignature {
            scheme: SchemeKind::Bls12381,
            signature: "agg_sig".to_string(),
            signer_public_keys: vec![],
        }
    }

    #[test]
    fn test_threshold_progression() {
        let mut ceremony = make_ceremony(5, 3, 3600);

        for i in 0..2 {
            assert_eq!(
                ceremony.record_share(make_share(i, &format!("sig_{}", i))),
                ShareOutcome::Accepted
            );
        }
        assert_eq!(ceremony.collected_shares(), 2);
        assert!(!ceremony.threshold_met());

        ceremony.record_share(make_share(2, "sig_2"));
        assert!(ceremony.threshold_met());
        assert_eq!(ceremony.status, CeremonyStatus::Collecting);
    }

    #[test]
    fn test_duplicate_share_is_noop() {
        let mut ceremony = make_ceremony(5, 3, 3600);

        assert_eq!(
            ceremony.record_share(make_share(0, "sig_0")),
            ShareOutcome::Accepted
        );
        assert_eq!(
            ceremony.record_share(make_share(0, "sig_0")),
            ShareOutcome::Duplicate
        );
        assert_eq!(ceremony.collected_shares(), 1);
    }

    #[test]
    fn test_conflicting_share_reported() {
        let mut ceremony = make_ceremony(5, 3, 3600);

        ceremony.record_share(make_share(0, "sig_a"));
        let outcome = ceremony.record_share(make_share(0, "sig_b"));
        assert_eq!(
            outcome,
            ShareOutcome::Conflicting {
                existing_signature: "sig_a".to_string()
            }
        );
        assert_eq!(ceremony.collected_shares(), 1);
    }

    #[test]
    fn test_aggregation_set_is_first_t_in_arrival_order() {
        let mut ceremony = make_ceremony(5, 3, 3600);
        for i in [4, 1, 3, 0, 2] {
            ceremony.record_share(make_share(i, &format!("sig_{}", i)));
        }

        let subset: Vec<&str> = ceremony
            .aggregation_set()
            .iter()
            .map(|s| s.validator_id.as_str())
            .collect();
        assert_eq!(subset, vec!["val_4", "val_1", "val_3"]);
    }

    #[test]
    fn test_complete_exactly_once() {
        let mut ceremony = make_ceremony(5, 1, 3600);
        ceremony.record_share(make_share(0, "sig_0"));

        let now = Utc::now();
        ceremony.complete(make_aggregate(), now);
        assert_eq!(ceremony.status, CeremonyStatus::Complete);
        let first_completed_at = ceremony.completed_at;

        // A second completion attempt must not overwrite anything
        let mut second = make_aggregate();
        second.signature = "other".to_string();
        ceremony.complete(second, Utc::now());
        assert_eq!(ceremony.completed_at, first_completed_at);
        assert_eq!(
            ceremony.aggregated_signature.as_ref().unwrap().signature,
            "agg_sig"
        );
    }

    #[test]
    fn test_expire_only_from_collecting() {
        let mut ceremony = make_ceremony(5, 1, 0);
        assert!(ceremony.is_expired_at(Utc::now()));
        ceremony.expire();
        assert_eq!(ceremony.status, CeremonyStatus::Expired);

        let mut completed = make_ceremony(5, 1, 3600);
        completed.record_share(make_share(0, "sig_0"));
        completed.complete(make_aggregate(), Utc::now());
        completed.expire();
        assert_eq!(completed.status, CeremonyStatus::Complete);
    }

    #[test]
    fn test_unanimous_and_single_boundaries() {
        // t = n: every validator must contribute
        let mut unanimous = make_ceremony(3, 3, 3600);
        for i in 0..2 {
            unanimous.record_share(make_share(i, &format!("sig_{}", i)));
        }
        assert!(!unanimous.threshold_met());
        unanimous.record_share(make_share(2, "sig_2"));
        assert!(unanimous.threshold_met());

        // t = 1: first valid share suffices
        let mut single = make_ceremony(3, 1, 3600);
        single.record_share(make_share(0, "sig_0"));
        assert!(single.threshold_met());
    }

    #[test]
    fn test_fail_records_cause() {
        let mut ceremony = make_ceremony(5, 3, 3600);
        ceremony.fail("aggregation failed: backend down");
        assert_eq!(ceremony.status, CeremonyStatus::Failed);
        assert_eq!(
            ceremony.failure_cause.as_deref(),
            Some("aggregation failed: backend down")
        );

        // Terminal: a later expiry sweep must not touch it
        ceremony.expire();
        assert_eq!(ceremony.status, CeremonyStatus::Failed);
    }
}
