//! # StateGrid
//!
//! Transactional state transition and synchronization engine for
//! partitioned state objects.
//!
//! ## Purpose
//!
//! Manage versioned state objects replicated or sharded across a fixed
//! set of partitions:
//! - plan and execute partition-to-partition transitions with rollback
//! - synchronize replica sets with deterministic conflict detection and
//!   highest-version-wins resolution
//! - measure drift, stability, anomalies, and performance for every
//!   tracked object
//!
//! ## Module Structure
//!
//! ```text
//! stategrid/
//! ├── domain/          # Core types: StateObject, TransitionPlan, conflicts
//! ├── algorithms/      # Planning, conflict detection, drift, stability
//! ├── ports/           # API trait + collaborator traits
//! ├── adapters/        # In-memory payload store, transport, audit sink
//! ├── store            # The shared object registry
//! ├── transition       # Per-object exclusive execution with rollback
//! ├── sync             # Replica synchronization and drift tracking
//! ├── monitor          # Stability, anomalies, alerts, rollup reports
//! └── engine           # Network, rules, background monitoring loop
//! ```
//!
//! ## Concurrency
//!
//! At most one execute call runs per object id; unrelated objects proceed
//! in parallel. Synchronization across partitions is eventually
//! consistent: observe convergence through `maintain_consistency` and
//! `detect_drift`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod domain;
pub mod engine;
pub mod monitor;
pub mod ports;
pub mod store;
pub mod sync;
pub mod transition;

// Re-exports
pub use algorithms::{
    Anomaly, AnomalyKind, ConsistencyViolation, StabilityComponents, StabilityWeights,
    ViolationKind,
};
pub use adapters::{
    FailureMode, InMemoryPayloadStore, LoopbackTransport, RecordingAuditSink, TracingAuditSink,
};
pub use domain::{
    AccessControl, ArchivalStrategy, CheckKind, CheckOutcome, CompressionKind, ConflictResolution,
    ConflictType, ContentionPolicy, DriftDirection, EngineError, MetadataValue, PartitionId,
    ResolutionAction, ResolutionActionKind, ResolutionStrategy, ResourceRequirements,
    RetentionPolicy, RollbackPlan, Severity, StabilityTrend, StateConflict, StateMetadata,
    StateObject, StatePayload, StatePredicate, StateStatus, StateTransition, StepKind,
    SyncCondition, SyncDirection, SyncMethod, SyncRuleAction, SynchronizationNetwork,
    SynchronizationRule, TransitionContext, TransitionError, TransitionErrorKind, TransitionKind,
    TransitionPlan, TransitionPriority, TransitionProgress, TransitionResult, TransitionRule,
    TransitionStatus, TransitionStep, ValidationCheck, Version,
};
pub use engine::{EngineConfig, StateGridEngine};
pub use monitor::{
    Alert, AlertLevel, Monitor, PerformanceMetrics, StabilityAssessment, StateHealthReport,
};
pub use ports::{
    AuditEvent, AuditSink, NullAuditSink, PayloadRef, PayloadStore, StateGridApi, TransferAck,
    TransferFrame, Transport, TransportError,
};
pub use store::{MergePolicy, StateStore, ValidationIssue, ValidationReport};
pub use sync::{
    ConsistencyReport, DriftReport, PropagationResult, PropagationTarget, SynchronizationResult,
    Synchronizer,
};
pub use transition::TransitionManager;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
