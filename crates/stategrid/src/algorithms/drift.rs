//! # Drift Measurement & Consistency Scoring
//!
//! Pure comparison of replica sets: how far apart they are, which way
//! the spread is moving, and how consistent a set of objects is.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::domain::{DriftDirection, StateObject};

/// Spread tolerated before two magnitudes count as different.
const MAGNITUDE_EPSILON: f64 = 0.01;

/// Version distance (in patch units) treated as full drift.
const VERSION_SPREAD_CAP: u64 = 100;

/// Drift report over a replica set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DriftReport {
    /// Whether any disagreement exists.
    pub drift_detected: bool,
    /// Which way the spread is moving, given past magnitudes.
    pub direction: DriftDirection,
    /// Normalized distance in [0,1] over versions and checksums.
    pub magnitude: f64,
    /// Largest pairwise version distance, in patch units.
    pub version_spread: u64,
    /// Spread of last-modified timestamps, in seconds.
    pub timestamp_spread_secs: u64,
}

/// A violation found by the consistency sweep.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsistencyViolation {
    /// Classification.
    pub kind: ViolationKind,
    /// The objects involved.
    pub object_ids: Vec<Uuid>,
    /// What was observed.
    pub detail: String,
}

/// Kinds of consistency violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationKind {
    /// Same version number, different content.
    DataMismatch,
    /// Replica versions have drifted apart.
    VersionDrift,
    /// An object depends on an id the registry does not know.
    DependencyViolation,
    /// Payload checksum does not cover the content.
    IntegrityFailure,
}

/// Consistency report over a set of objects.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsistencyReport {
    /// Fraction of objects in a consistent status, in [0,1].
    pub score: f64,
    /// Violations found.
    pub violations: Vec<ConsistencyViolation>,
}

/// Measure drift across replicas of one logical object.
///
/// `history` holds previously observed magnitudes, oldest first; the
/// direction is classified from the trajectory, not a single snapshot.
pub fn measure_drift(replicas: &[&StateObject], history: &[f64]) -> DriftReport {
    if replicas.len() < 2 {
        return DriftReport {
            drift_detected: false,
            direction: DriftDirection::Stable,
            magnitude: 0.0,
            version_spread: 0,
            timestamp_spread_secs: 0,
        };
    }

    let version_spread = replicas
        .iter()
        .flat_map(|a| replicas.iter().map(move |b| a.version.distance(&b.version)))
        .max()
        .unwrap_or(0);

    let newest = replicas.iter().map(|o| o.last_modified).max().unwrap_or(0);
    let oldest = replicas.iter().map(|o| o.last_modified).min().unwrap_or(0);
    let timestamp_spread_secs = newest - oldest;

    let distinct_checksums: HashSet<_> = replicas.iter().map(|o| o.payload.checksum).collect();
    let checksum_fraction = (distinct_checksums.len() - 1) as f64 / (replicas.len() - 1) as f64;

    let version_fraction = (version_spread.min(VERSION_SPREAD_CAP)) as f64 / VERSION_SPREAD_CAP as f64;
    let magnitude = 0.5 * version_fraction + 0.5 * checksum_fraction;

    DriftReport {
        drift_detected: magnitude > 0.0,
        direction: classify_direction(magnitude, history),
        magnitude,
        version_spread,
        timestamp_spread_secs,
    }
}

/// Classify the drift direction from the magnitude trajectory.
fn classify_direction(current: f64, history: &[f64]) -> DriftDirection {
    if current <= MAGNITUDE_EPSILON && history.iter().all(|m| *m <= MAGNITUDE_EPSILON) {
        return DriftDirection::Stable;
    }

    let mut trajectory: Vec<f64> = history.to_vec();
    trajectory.push(current);
    if trajectory.len() < 2 {
        // First observation of a non-zero spread.
        return DriftDirection::Diverging;
    }

    let deltas: Vec<f64> = trajectory.windows(2).map(|w| w[1] - w[0]).collect();
    let rising = deltas.iter().filter(|d| **d > MAGNITUDE_EPSILON).count();
    let falling = deltas.iter().filter(|d| **d < -MAGNITUDE_EPSILON).count();

    if rising > 0 && falling > 0 {
        DriftDirection::Oscillating
    } else if rising > 0 {
        DriftDirection::Diverging
    } else if falling > 0 {
        DriftDirection::Converging
    } else {
        DriftDirection::Stable
    }
}

/// Score the consistency of a set of objects and list violations.
///
/// `known_ids` is the full registry id set, used for dependency checks.
pub fn consistency_report(objects: &[&StateObject], known_ids: &HashSet<Uuid>) -> ConsistencyReport {
    let mut violations = Vec::new();

    for object in objects {
        if !object.payload.is_intact() {
            violations.push(ConsistencyViolation {
                kind: ViolationKind::IntegrityFailure,
                object_ids: vec![object.id],
                detail: format!("checksum mismatch on {}", object.id),
            });
        }
        for dep in &object.dependencies {
            if !known_ids.contains(dep) {
                violations.push(ConsistencyViolation {
                    kind: ViolationKind::DependencyViolation,
                    object_ids: vec![object.id, *dep],
                    detail: format!("{} depends on unknown object {}", object.id, dep),
                });
            }
        }
    }

    for i in 0..objects.len() {
        for j in (i + 1)..objects.len() {
            let a = objects[i];
            let b = objects[j];
            if a.version.same_number(&b.version) {
                if a.payload.checksum != b.payload.checksum {
                    violations.push(ConsistencyViolation {
                        kind: ViolationKind::DataMismatch,
                        object_ids: vec![a.id, b.id],
                        detail: "identical versions carry different content".to_string(),
                    });
                }
            } else if a.version.distance(&b.version) > 0 {
                violations.push(ConsistencyViolation {
                    kind: ViolationKind::VersionDrift,
                    object_ids: vec![a.id, b.id],
                    detail: format!(
                        "versions {} patch unit(s) apart",
                        a.version.distance(&b.version)
                    ),
                });
            }
        }
    }

    let consistent = objects.iter().filter(|o| o.status.is_consistent()).count();
    let score = if objects.is_empty() {
        1.0
    } else {
        consistent as f64 / objects.len() as f64
    };

    ConsistencyReport { score, violations }
}
