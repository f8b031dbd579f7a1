//! Slashing & Reputation Service
//!
//! Records evidence-backed misbehavior, applies the severity penalty table
//! through the validator-set ledger, and detects double-signing across
//! ceremonies via externally supplied conflict markers. Penalties are
//! monotonic; resolving an event never reverses one.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use qg_core::error::{LedgerError, LedgerResult};
use qg_core::events::{EventSink, ProtocolEvent};
use qg_core::ledger::{SlashingLedger, ValidatorSetLedger};
use qg_core::storage::Datastore;
use qg_core::types::{
    ActorId, ConflictMarker, Digest, SlashingEvent, SlashingReason, SlashingSeverity, ValidatorId,
};

/// Slashing Service implementation
pub struct SlashingService {
    store: Arc<dyn Datastore>,
    sets: Arc<dyn ValidatorSetLedger>,
    events: Arc<dyn EventSink>,
    records: RwLock<HashMap<String, SlashingEvent>>,
    /// First observed message hash per (marker, validator)
    observed: RwLock<HashMap<(ConflictMarker, ValidatorId), Digest>>,
    sequence: AtomicU64,
}

impl SlashingService {
    pub fn new(
        store: Arc<dyn Datastore>,
        sets: Arc<dyn ValidatorSetLedger>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            sets,
            events,
            records: RwLock::new(HashMap::new()),
            observed: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    fn generate_event_id(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let timestamp = Utc::now().timestamp_micros();
        format!("slash_{:016x}_{:08x}", timestamp, seq)
    }

    fn event_key(event_id: &str) -> String {
        format!("slashing/{}", event_id)
    }

    async fn persist_event(&self, event: &SlashingEvent) -> LedgerResult<()> {
        let bytes = serde_json::to_vec(event)?;
        self.store.put(&Self::event_key(&event.id), bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl SlashingLedger for SlashingService {
    async fn record_event(
        &self,
        validator_id: &ValidatorId,
        reason: SlashingReason,
        severity: SlashingSeverity,
        evidence: Digest,
        reported_by: &ActorId,
    ) -> LedgerResult<SlashingEvent> {
        let event_id = self.generate_event_id();
        let penalty = severity.penalty();

        // Penalty application is serialized per validator by the set ledger;
        // critical severity forces the validator to compromised.
        self.sets
            .apply_penalty(
                validator_id,
                penalty,
                &event_id,
                severity == SlashingSeverity::Critical,
            )
            .await?;

        let event = SlashingEvent {
            id: event_id,
            validator_id: validator_id.clone(),
            reason,
            severity,
            penalty,
            evidence,
            reported_by: reported_by.clone(),
            reported_at: Utc::now(),
            resolved: false,
            resolved_at: None,
        };

        {
            let mut records = self.records.write().unwrap();
            records.insert(event.id.clone(), event.clone());
        }
        self.persist_event(&event).await?;

        warn!(
            validator_id = %validator_id,
            operation = "slash_record",
            count = penalty,
            "validator slashed"
        );
        self.events.publish(&ProtocolEvent::ValidatorSlashed {
            event_id: event.id.clone(),
            validator_id: validator_id.clone(),
            reason,
            severity,
            penalty,
        });

        Ok(event)
    }

    async fn resolve(&self, event_id: &str, resolved_by: &ActorId) -> LedgerResult<SlashingEvent> {
        let event = {
            let mut records = self.records.write().unwrap();
            let event = records
                .get_mut(event_id)
                .ok_or_else(|| LedgerError::NotFound(format!("Slashing event {}", event_id)))?;
            if !event.resolved {
                event.resolved = true;
                event.resolved_at = Some(Utc::now());
            }
            event.clone()
        };

        self.persist_event(&event).await?;
        info!(
            operation = "slash_resolve",
            actor_id = %resolved_by,
            "slashing event resolved"
        );
        Ok(event)
    }

    async fn history(&self, validator_id: &ValidatorId) -> LedgerResult<Vec<SlashingEvent>> {
        let records = self.records.read().unwrap();
        let mut events: Vec<SlashingEvent> = records
            .values()
            .filter(|e| &e.validator_id == validator_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.reported_at);
        Ok(events)
    }

    async fn observe_signing(
        &self,
        marker: &ConflictMarker,
        validator_id: &ValidatorId,
        message_hash: Digest,
    ) -> LedgerResult<Option<SlashingEvent>> {
        let conflict = {
            let mut observed = self.observed.write().unwrap();
            let key = (marker.clone(), validator_id.clone());
            match observed.get(&key) {
                Some(first) if *first == message_hash => None,
                Some(first) => Some(*first),
                None => {
                    observed.insert(key, message_hash);
                    None
                }
            }
        };

        match conflict {
            Some(first_hash) => {
                let evidence = Digest::combine(&first_hash, &message_hash);
                let event = self
                    .record_event(
                        validator_id,
                        SlashingReason::DoubleSigning,
                        SlashingSeverity::Critical,
                        evidence,
                        &ActorId::new(qg_core::constants::COORDINATOR_ACTOR),
                    )
                    .await?;
                Ok(Some(event))
            }
            None => Ok(None),
        }
    }
}
