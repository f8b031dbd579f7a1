//! Typed protocol events
//!
//! Events are published synchronously at well-defined state transitions
//! through an explicit `EventSink`, replacing dynamic emitter-style pub/sub:
//! no hidden subscriber ordering, one publication path per transition.
//! Publication is fire-and-forget; sinks must not panic.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::types::{ActorId, SlashingReason, SlashingSeverity, SubnetId, ValidatorId};

/// Protocol event published at a state transition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProtocolEvent {
    CeremonyCompleted {
        ceremony_id: String,
        subnet_id: SubnetId,
        epoch: u64,
        collected_shares: u32,
    },
    CeremonyFailed {
        ceremony_id: String,
        subnet_id: SubnetId,
        cause: String,
    },
    CeremonyExpired {
        ceremony_id: String,
        subnet_id: SubnetId,
    },
    ShareRejected {
        ceremony_id: String,
        validator_id: ValidatorId,
        cause: String,
    },
    ValidatorSlashed {
        event_id: String,
        validator_id: ValidatorId,
        reason: SlashingReason,
        severity: SlashingSeverity,
        penalty: u32,
    },
    SetInitialized {
        subnet_id: SubnetId,
        epoch: u64,
        threshold: u32,
        total: u32,
    },
    SetRotated {
        subnet_id: SubnetId,
        old_epoch: u64,
        new_epoch: u64,
        rotated_by: ActorId,
    },
    RotationDue {
        subnet_id: SubnetId,
        epoch: u64,
        cause: String,
    },
    OperationSigned {
        operation_id: String,
        subnet_id: SubnetId,
    },
    OperationExecuted {
        operation_id: String,
        subnet_id: SubnetId,
    },
    OperationFailed {
        operation_id: String,
        subnet_id: SubnetId,
        cause: String,
    },
    OperationExpired {
        operation_id: String,
        subnet_id: SubnetId,
    },
}

impl ProtocolEvent {
    /// Stable event name for logging and filtering
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CeremonyCompleted { .. } => "ceremony_completed",
            Self::CeremonyFailed { .. } => "ceremony_failed",
            Self::CeremonyExpired { .. } => "ceremony_expired",
            Self::ShareRejected { .. } => "share_rejected",
            Self::ValidatorSlashed { .. } => "validator_slashed",
            Self::SetInitialized { .. } => "set_initialized",
            Self::SetRotated { .. } => "set_rotated",
            Self::RotationDue { .. } => "rotation_due",
            Self::OperationSigned { .. } => "operation_signed",
            Self::OperationExecuted { .. } => "operation_executed",
            Self::OperationFailed { .. } => "operation_failed",
            Self::OperationExpired { .. } => "operation_expired",
        }
    }
}

/// Synchronous event publication sink
pub trait EventSink: Send + Sync {
    /// Publish one event. Must not panic; failures are the sink's concern.
    fn publish(&self, event: &ProtocolEvent);
}

/// Sink that logs every event through `tracing`
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: &ProtocolEvent) {
        let payload = serde_json::to_string(event).unwrap_or_default();
        match event {
            ProtocolEvent::CeremonyFailed { .. }
            | ProtocolEvent::ShareRejected { .. }
            | ProtocolEvent::ValidatorSlashed { .. }
            | ProtocolEvent::OperationFailed { .. }
            | ProtocolEvent::RotationDue { .. } => {
                warn!(kind = event.kind(), payload = %payload, "protocol event");
            }
            _ => {
                info!(kind = event.kind(), payload = %payload, "protocol event");
            }
        }
    }
}

/// Fan-out to multiple sinks, in registration order. Sinks may be added
/// after construction, which lets mutually referencing components (the
/// coordinator and its observers) be wired up one at a time.
#[derive(Default)]
pub struct FanoutSink {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self {
            sinks: RwLock::new(sinks),
        }
    }

    pub fn push(&self, sink: Arc<dyn EventSink>) {
        if let Ok(mut sinks) = self.sinks.write() {
            sinks.push(sink);
        }
    }
}

impl EventSink for FanoutSink {
    fn publish(&self, event: &ProtocolEvent) {
        let sinks = match self.sinks.read() {
            Ok(sinks) => sinks.clone(),
            Err(_) => return,
        };
        for sink in sinks.iter() {
            sink.publish(event);
        }
    }
}

/// Captures events for assertions in tests and audit tooling
#[derive(Default)]
pub struct MemoryEventSink {
    events: RwLock<Vec<ProtocolEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured events, in publication order
    pub fn events(&self) -> Vec<ProtocolEvent> {
        self.events.read().map(|e| e.clone()).unwrap_or_default()
    }

    /// Number of captured events with the given kind
    pub fn count_kind(&self, kind: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.kind() == kind)
            .count()
    }
}

impl EventSink for MemoryEventSink {
    fn publish(&self, event: &ProtocolEvent) {
        if let Ok(mut events) = self.events.write() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_event() -> ProtocolEvent {
        ProtocolEvent::CeremonyExpired {
            ceremony_id: "cer_1".to_string(),
            subnet_id: SubnetId::new("subnet-1"),
        }
    }

    #[test]
    fn test_memory_sink_captures_in_order() {
        let sink = MemoryEventSink::new();
        sink.publish(&make_event());
        sink.publish(&ProtocolEvent::OperationSigned {
            operation_id: "op_1".to_string(),
            subnet_id: SubnetId::new("subnet-1"),
        });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), "ceremony_expired");
        assert_eq!(events[1].kind(), "operation_signed");
        assert_eq!(sink.count_kind("ceremony_expired"), 1);
    }

    #[test]
    fn test_fanout_reaches_all_sinks() {
        let a = Arc::new(MemoryEventSink::new());
        let b = Arc::new(MemoryEventSink::new());
        let fanout = FanoutSink::new(vec![a.clone(), b.clone()]);

        fanout.publish(&make_event());
        assert_eq!(a.events().len(), 1);
        assert_eq!(b.events().len(), 1);
    }

    #[test]
    fn test_event_serialization_tagged() {
        let json = serde_json::to_string(&make_event()).unwrap();
        assert!(json.contains("\"event\":\"ceremony_expired\""));
    }
}
