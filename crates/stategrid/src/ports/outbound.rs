//! # Outbound Ports
//!
//! Traits for external collaborators: the payload store holding blob
//! backups, the inter-partition transport, and the audit sink. The engine
//! only carries checksums and references; bytes at rest and the wire
//! format belong to the implementations behind these traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{EngineError, PartitionId, ResolutionStrategy};

/// Reference to a stored payload blob (content hash).
pub type PayloadRef = [u8; 32];

/// Transport-level failure with retry semantics.
#[derive(Clone, Debug, Error)]
#[error("transport to partition {partition} failed: {message} (retryable: {retryable})")]
pub struct TransportError {
    /// Destination partition.
    pub partition: PartitionId,
    /// Whether the engine may retry the send.
    pub retryable: bool,
    /// What went wrong.
    pub message: String,
}

/// One frame of payload bytes on the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferFrame {
    /// Object the bytes belong to.
    pub object_id: Uuid,
    /// Frame index, 0-based.
    pub sequence: u32,
    /// Total frames in this transfer.
    pub total: u32,
    /// Frame bytes.
    pub bytes: Vec<u8>,
}

/// Acknowledgement for a delivered frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferAck {
    /// Receiving partition.
    pub partition: PartitionId,
    /// Bytes the partition has received for this object so far.
    pub received_bytes: u64,
}

/// Payload store - outbound port.
///
/// Holds pre-transition backups; references are content hashes.
#[async_trait]
pub trait PayloadStore: Send + Sync {
    /// Persist bytes, returning a reference.
    async fn save(&self, bytes: &[u8]) -> Result<PayloadRef, EngineError>;

    /// Fetch bytes by reference.
    async fn load(&self, reference: PayloadRef) -> Result<Vec<u8>, EngineError>;
}

/// Inter-partition transport - outbound port.
///
/// A black box with retryable failure semantics; the engine retries sends
/// whose error carries `retryable: true` and gives up on the rest.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a frame to a partition.
    async fn send(
        &self,
        partition: PartitionId,
        frame: TransferFrame,
    ) -> Result<TransferAck, TransportError>;
}

/// Event recorded to the audit sink.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AuditEvent {
    /// An execute call started.
    TransitionStarted {
        /// Transition record id.
        transition: Uuid,
        /// Object being moved.
        object: Uuid,
        /// Source partition.
        source: PartitionId,
        /// Target partition.
        target: PartitionId,
    },
    /// An execute call committed.
    TransitionCompleted {
        /// Transition record id.
        transition: Uuid,
        /// Object moved.
        object: Uuid,
        /// Bytes moved over transport.
        bytes_moved: u64,
    },
    /// An execute call failed.
    TransitionFailed {
        /// Transition record id.
        transition: Uuid,
        /// Object involved.
        object: Uuid,
        /// Failure summary.
        reason: String,
    },
    /// A rollback plan was replayed.
    TransitionRolledBack {
        /// Transition record id.
        transition: Uuid,
        /// Object restored.
        object: Uuid,
    },
    /// Replicas were found to disagree.
    ConflictDetected {
        /// Conflict id.
        conflict: Uuid,
        /// Replicas involved.
        objects: Vec<Uuid>,
        /// Summary.
        description: String,
    },
    /// A conflict batch was resolved.
    ConflictResolved {
        /// Who resolved.
        strategy: ResolutionStrategy,
        /// How many actions ran.
        actions: usize,
    },
    /// The monitor raised an alert.
    AlertRaised {
        /// Object the alert concerns.
        object: Uuid,
        /// Alert text.
        message: String,
    },
}

/// Audit sink - outbound port. Fire-and-forget.
pub trait AuditSink: Send + Sync {
    /// Record an event. Implementations must not block the caller.
    fn record(&self, event: AuditEvent);
}

/// Audit sink that drops everything. For callers without audit needs.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) {}
}
