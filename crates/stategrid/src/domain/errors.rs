//! # Domain Errors
//!
//! Error types for the state engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Partition identifier (u32 supports sparse partition numbering).
pub type PartitionId = u32;

/// Payload checksum (32-byte SHA-256).
pub type Checksum = [u8; 32];

/// Engine error types.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Unknown state object ID.
    #[error("Unknown state object: {0}")]
    UnknownObject(Uuid),

    /// Partition is not part of the network.
    #[error("Unknown partition: {0}")]
    UnknownPartition(PartitionId),

    /// Payload failed structural validation.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Operation attempted on an object in an incompatible status.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid status transition for a transition record.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status
        from: String,
        /// Attempted status
        to: String,
    },

    /// Projected plan requirements exceed a configured ceiling.
    #[error("Resource ceiling exceeded for {resource}: requires {required}, ceiling {ceiling}")]
    ResourceExhausted {
        /// Which resource overflowed
        resource: String,
        /// Projected requirement
        required: u64,
        /// Configured ceiling
        ceiling: u64,
    },

    /// Transport-level failure that exhausted its retries.
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// Payload checksum does not match content.
    #[error("Data corruption on {object}: {detail}")]
    DataCorruption {
        /// Affected object
        object: Uuid,
        /// What was observed
        detail: String,
    },

    /// Cross-object consistency rule violated.
    #[error("State inconsistency: {0}")]
    StateInconsistency(String),

    /// Hard deadline expired.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// A critical validation check failed.
    #[error("Validation failed: {0}")]
    ValidationFailure(String),

    /// Contention on an object with an in-flight transition.
    #[error("State object busy: {0}")]
    StateBusy(Uuid),

    /// Automatic resolution declined due to critical severity.
    #[error("{0} critical conflict(s) require an explicit caller decision")]
    ConflictUnresolved(usize),

    /// Adding a dependency edge would close a cycle.
    #[error("Dependency cycle involving {0}")]
    DependencyCycle(Uuid),
}

/// Classification of a transition execution failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionErrorKind {
    /// Transport failed and retries were exhausted.
    NetworkFailure,
    /// Payload bytes did not survive the move intact.
    DataCorruption,
    /// A consistency rule was violated mid-transition.
    StateInconsistency,
    /// The context deadline expired.
    Timeout,
    /// A validation check failed.
    ValidationFailure,
}

/// Structured error attached to a transition result.
///
/// Carries enough context for a caller to decide between retrying,
/// rolling back manually, or escalating.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitionError {
    /// Failure classification.
    pub kind: TransitionErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Whether retrying the transition may succeed.
    pub recoverable: bool,
    /// Suggested next step for the operator.
    pub suggested_action: String,
}

impl TransitionError {
    /// Build a timeout error for the given deadline.
    pub fn timeout(deadline: Duration) -> Self {
        Self {
            kind: TransitionErrorKind::Timeout,
            message: format!("transition exceeded its {:?} deadline", deadline),
            recoverable: true,
            suggested_action: "retry with a longer timeout or during lower load".to_string(),
        }
    }

    /// Build a network failure error.
    pub fn network(detail: impl Into<String>) -> Self {
        Self {
            kind: TransitionErrorKind::NetworkFailure,
            message: detail.into(),
            recoverable: true,
            suggested_action: "check partition transport health and retry".to_string(),
        }
    }

    /// Build a validation failure error.
    pub fn validation(detail: impl Into<String>, recoverable: bool) -> Self {
        Self {
            kind: TransitionErrorKind::ValidationFailure,
            message: detail.into(),
            recoverable,
            suggested_action: if recoverable {
                "fix the reported issue and retry".to_string()
            } else {
                "manual inspection of the source object is required".to_string()
            },
        }
    }
}
