//! Audit Sink Adapters
//!
//! `TracingAuditSink` forwards events to the log stream; the recording
//! variant keeps them for test assertions.

use parking_lot::RwLock;
use tracing::info;

use crate::ports::outbound::{AuditEvent, AuditSink};

/// Audit sink that emits one structured log line per event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        match &event {
            AuditEvent::TransitionStarted {
                transition,
                object,
                source,
                target,
            } => info!(
                target: "stategrid::audit",
                %transition, %object, source, target, "transition started"
            ),
            AuditEvent::TransitionCompleted {
                transition,
                object,
                bytes_moved,
            } => info!(
                target: "stategrid::audit",
                %transition, %object, bytes_moved, "transition completed"
            ),
            AuditEvent::TransitionFailed {
                transition,
                object,
                reason,
            } => info!(
                target: "stategrid::audit",
                %transition, %object, reason, "transition failed"
            ),
            AuditEvent::TransitionRolledBack { transition, object } => info!(
                target: "stategrid::audit",
                %transition, %object, "transition rolled back"
            ),
            AuditEvent::ConflictDetected {
                conflict,
                objects,
                description,
            } => info!(
                target: "stategrid::audit",
                %conflict, replicas = objects.len(), description, "conflict detected"
            ),
            AuditEvent::ConflictResolved { strategy, actions } => info!(
                target: "stategrid::audit",
                ?strategy, actions, "conflict resolved"
            ),
            AuditEvent::AlertRaised { object, message } => info!(
                target: "stategrid::audit",
                %object, message, "alert raised"
            ),
        }
    }
}

/// Audit sink that stores events in memory for assertions.
#[derive(Default)]
pub struct RecordingAuditSink {
    events: RwLock<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.read().clone()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.write().push(event);
    }
}
