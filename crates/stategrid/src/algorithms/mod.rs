//! # Algorithms
//!
//! Pure logic behind the engine: plan construction and ordering, replica
//! conflict detection and resolution policy, drift and consistency
//! measurement, and stability heuristics. Nothing in this module touches
//! locks, clocks, or I/O.

pub mod conflict;
pub mod drift;
pub mod planning;
pub mod stability;

pub use conflict::{decide_resolution, detect_replica_conflicts, highest_version};
pub use drift::{
    consistency_report, measure_drift, ConsistencyReport, ConsistencyViolation, DriftReport,
    ViolationKind,
};
pub use planning::{build_plan, default_checks, estimate_resources, execution_order};
pub use stability::{
    classify_trend, compose, conflict_freedom, detect_access_violations, detect_corruption,
    detect_failure_spike, detect_sync_delay_spike, performance_consistency, success_rate, Anomaly,
    AnomalyKind, StabilityComponents, StabilityWeights,
};
