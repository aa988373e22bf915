//! # Conflict Detection & Resolution
//!
//! Deterministic pairwise comparison of replicas and the policy that
//! decides who resolves what.

use uuid::Uuid;

use crate::domain::{
    ConflictResolution, ConflictType, ResolutionAction, ResolutionActionKind, ResolutionStrategy,
    Severity, StateConflict, StateObject,
};

/// Detect conflicts between replicas of the same logical object.
///
/// Comparison is pure: version triples, checksums, ownership, and
/// partition placement. Nothing here depends on wall-clock state.
pub fn detect_replica_conflicts(replicas: &[&StateObject], now: u64) -> Vec<StateConflict> {
    let mut conflicts = Vec::new();

    for i in 0..replicas.len() {
        for j in (i + 1)..replicas.len() {
            let a = replicas[i];
            let b = replicas[j];
            let pair = vec![a.id, b.id];

            if a.partition == b.partition {
                conflicts.push(StateConflict::new(
                    pair.clone(),
                    ConflictType::ResourceConflict,
                    Severity::Low,
                    format!("two replicas share partition {}", a.partition),
                    now,
                ));
            }

            if a.metadata.owner != b.metadata.owner {
                conflicts.push(StateConflict::new(
                    pair.clone(),
                    ConflictType::AccessConflict,
                    Severity::High,
                    format!(
                        "owners disagree: {} vs {}",
                        a.metadata.owner, b.metadata.owner
                    ),
                    now,
                ));
            }

            if a.version.same_number(&b.version) {
                if a.payload.checksum != b.payload.checksum {
                    // Same version, different bytes: no winner exists, so
                    // this can never be auto-resolved.
                    conflicts.push(StateConflict::new(
                        pair,
                        ConflictType::DataInconsistency,
                        Severity::Critical,
                        format!(
                            "version {}.{}.{} maps to checksums {} and {}",
                            a.version.major,
                            a.version.minor,
                            a.version.patch,
                            a.payload.checksum_prefix(),
                            b.payload.checksum_prefix()
                        ),
                        now,
                    ));
                }
            } else {
                let severity = if a.version.major != b.version.major {
                    Severity::High
                } else {
                    Severity::Medium
                };
                conflicts.push(StateConflict::new(
                    pair,
                    ConflictType::VersionConflict,
                    severity,
                    format!(
                        "versions diverge: {}.{}.{} vs {}.{}.{}",
                        a.version.major,
                        a.version.minor,
                        a.version.patch,
                        b.version.major,
                        b.version.minor,
                        b.version.patch
                    ),
                    now,
                ));
            }
        }
    }

    conflicts
}

/// The replica carrying the highest version.
pub fn highest_version<'a>(replicas: &[&'a StateObject]) -> Option<&'a StateObject> {
    replicas
        .iter()
        .copied()
        .max_by_key(|o| o.version.key())
}

/// Decide how a batch of conflicts is resolved.
///
/// Any critical conflict forces `Manual`; otherwise resolution is
/// `Automatic` with highest-version-wins overrides. Every action records
/// whether it was automated.
pub fn decide_resolution(
    conflicts: &[StateConflict],
    replicas: &[&StateObject],
    now: u64,
) -> ConflictResolution {
    let has_critical = conflicts.iter().any(|c| c.severity == Severity::Critical);

    if has_critical {
        let actions = conflicts
            .iter()
            .filter(|c| c.severity == Severity::Critical)
            .map(|c| ResolutionAction {
                kind: ResolutionActionKind::Notify,
                target: c.object_ids.first().copied().unwrap_or(Uuid::nil()),
                automated: false,
                detail: format!("awaiting caller decision: {}", c.description),
            })
            .collect();
        return ConflictResolution {
            strategy: ResolutionStrategy::Manual,
            actions,
            resolved_at: now,
        };
    }

    let mut actions = Vec::new();
    if let Some(winner) = highest_version(replicas) {
        for conflict in conflicts {
            match conflict.kind {
                ConflictType::VersionConflict => {
                    for loser in conflict.object_ids.iter().filter(|id| **id != winner.id) {
                        actions.push(ResolutionAction {
                            kind: ResolutionActionKind::Override,
                            target: *loser,
                            automated: true,
                            detail: format!(
                                "adopt payload of {} at {}.{}.{}",
                                winner.id,
                                winner.version.major,
                                winner.version.minor,
                                winner.version.patch
                            ),
                        });
                    }
                }
                _ => {
                    actions.push(ResolutionAction {
                        kind: ResolutionActionKind::Notify,
                        target: conflict.object_ids.first().copied().unwrap_or(Uuid::nil()),
                        automated: true,
                        detail: conflict.description.clone(),
                    });
                }
            }
        }
    }

    ConflictResolution {
        strategy: ResolutionStrategy::Automatic,
        actions,
        resolved_at: now,
    }
}
