//! # Transition Planning
//!
//! Deterministic construction of transition plans: step lists, duration
//! estimates, resource accounting, and step ordering.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{
    CheckKind, EngineError, PartitionId, ResourceRequirements, RollbackPlan, StateObject,
    StatePayload, StepKind, TransitionContext, TransitionPlan, TransitionStep, ValidationCheck,
};

/// Assumed sustained transport rate used for duration estimates.
const TRANSPORT_BYTES_PER_SEC: u64 = 10 * 1024 * 1024;

/// Fixed overhead per step, beyond the size-dependent part.
const STEP_BASE_MILLIS: u64 = 20;

/// Project the resource needs of moving `payload`.
///
/// Memory holds the source copy plus the in-flight frame buffer; scratch
/// storage holds the pre-transition backup; bandwidth is the content
/// itself.
pub fn estimate_resources(payload: &StatePayload) -> ResourceRequirements {
    let size = payload.size_bytes;
    ResourceRequirements {
        cpu_millis: 5 + size / (64 * 1024),
        memory_bytes: size * 2,
        storage_bytes: size,
        bandwidth_bytes: size,
    }
}

/// Estimated duration of one step over a payload of `size` bytes.
fn estimate_step(kind: StepKind, size: u64) -> Duration {
    let transfer_millis = size.saturating_mul(1000) / TRANSPORT_BYTES_PER_SEC;
    let millis = match kind {
        StepKind::DataTransfer => STEP_BASE_MILLIS + transfer_millis,
        // Backup writes the same bytes to scratch storage.
        StepKind::Backup => STEP_BASE_MILLIS + transfer_millis / 2,
        // Validation re-hashes the content.
        StepKind::Validation => STEP_BASE_MILLIS + size / (128 * 1024),
        StepKind::Preparation | StepKind::StateUpdate | StepKind::Cleanup => STEP_BASE_MILLIS,
    };
    Duration::from_millis(millis)
}

/// The validation checks a plan carries by default.
pub fn default_checks(validation_required: bool) -> Vec<ValidationCheck> {
    if !validation_required {
        return Vec::new();
    }
    vec![
        ValidationCheck {
            kind: CheckKind::DataIntegrity,
            description: "checksum over moved bytes matches the source".to_string(),
            critical: true,
        },
        ValidationCheck {
            kind: CheckKind::StateConsistency,
            description: "object and lineage statuses remain sane".to_string(),
            critical: true,
        },
        ValidationCheck {
            kind: CheckKind::Security,
            description: "acting principal holds write access".to_string(),
            critical: true,
        },
        ValidationCheck {
            kind: CheckKind::Performance,
            description: "execution stayed within the estimate envelope".to_string(),
            critical: false,
        },
    ]
}

/// Build the immutable plan for moving `object` to `target`.
///
/// Fails with `ResourceExhausted` when the projected requirements exceed
/// any configured ceiling.
pub fn build_plan(
    object: &StateObject,
    target: PartitionId,
    context: &TransitionContext,
    ceilings: &ResourceRequirements,
    extra_checks: &[ValidationCheck],
) -> Result<TransitionPlan, EngineError> {
    let resources = estimate_resources(&object.payload);
    if let Some((resource, required, ceiling)) = resources.first_overflow(ceilings) {
        return Err(EngineError::ResourceExhausted {
            resource: resource.to_string(),
            required,
            ceiling,
        });
    }

    let size = object.payload.size_bytes;
    let mut kinds = vec![StepKind::Preparation];
    if context.rollback_enabled {
        kinds.push(StepKind::Backup);
    }
    kinds.extend([
        StepKind::DataTransfer,
        StepKind::Validation,
        StepKind::StateUpdate,
        StepKind::Cleanup,
    ]);

    // Linear dependency chain; ids start at 1.
    let steps: Vec<TransitionStep> = kinds
        .iter()
        .enumerate()
        .map(|(i, kind)| TransitionStep {
            id: i as u32 + 1,
            kind: *kind,
            estimated: estimate_step(*kind, size),
            depends_on: if i == 0 { vec![] } else { vec![i as u32] },
        })
        .collect();

    let estimated_total = steps.iter().map(|s| s.estimated).sum();

    // Undo in reverse order: re-commit the old location, move bytes back,
    // then clean up.
    let rollback_steps: Vec<TransitionStep> = steps
        .iter()
        .rev()
        .filter(|s| matches!(s.kind, StepKind::StateUpdate | StepKind::DataTransfer))
        .map(|s| s.kind)
        .chain(std::iter::once(StepKind::Cleanup))
        .enumerate()
        .map(|(i, kind)| TransitionStep {
            id: i as u32 + 1,
            kind,
            estimated: estimate_step(kind, size),
            depends_on: if i == 0 { vec![] } else { vec![i as u32] },
        })
        .collect();

    let mut checks = default_checks(context.validation_required);
    checks.extend_from_slice(extra_checks);

    Ok(TransitionPlan {
        id: Uuid::new_v4(),
        object_id: object.id,
        source_partition: object.partition,
        target_partition: target,
        steps,
        estimated_total,
        resources,
        rollback: RollbackPlan {
            steps: rollback_steps,
            backup_required: context.rollback_enabled,
        },
        checks,
    })
}

/// Topological execution order over a plan's steps.
///
/// Kahn's algorithm, ties broken by step id so the order is stable.
pub fn execution_order(steps: &[TransitionStep]) -> Result<Vec<u32>, EngineError> {
    let ids: HashSet<u32> = steps.iter().map(|s| s.id).collect();
    let mut indegree: HashMap<u32, usize> = steps.iter().map(|s| (s.id, 0)).collect();
    let mut dependents: HashMap<u32, Vec<u32>> = HashMap::new();

    for step in steps {
        for dep in &step.depends_on {
            if !ids.contains(dep) {
                return Err(EngineError::StateInconsistency(format!(
                    "step {} depends on unknown step {}",
                    step.id, dep
                )));
            }
            *indegree.entry(step.id).or_default() += 1;
            dependents.entry(*dep).or_default().push(step.id);
        }
    }

    let mut ready: Vec<u32> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    ready.sort_unstable();
    let mut queue: VecDeque<u32> = ready.into();

    let mut order = Vec::with_capacity(steps.len());
    while let Some(id) = queue.pop_front() {
        order.push(id);
        if let Some(next) = dependents.get(&id) {
            let mut unlocked: Vec<u32> = Vec::new();
            for n in next {
                let d = indegree.entry(*n).or_default();
                *d -= 1;
                if *d == 0 {
                    unlocked.push(*n);
                }
            }
            unlocked.sort_unstable();
            queue.extend(unlocked);
        }
    }

    if order.len() != steps.len() {
        return Err(EngineError::StateInconsistency(
            "step dependencies contain a cycle".to_string(),
        ));
    }
    Ok(order)
}
