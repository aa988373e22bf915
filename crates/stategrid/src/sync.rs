//! # Synchronizer
//!
//! Propagates state object values across partitions, detects and resolves
//! replica conflicts, and measures long-term drift. Synchronization is
//! eventually consistent: callers observe convergence through
//! `maintain_consistency` and `detect_drift`, never by assumption.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::algorithms::{conflict, drift};
use crate::domain::{
    unix_now, ConflictResolution, ContentionPolicy, EngineError, PartitionId, ResolutionActionKind,
    ResolutionStrategy, Severity, StateConflict, StateObject, StateStatus, SyncMethod,
};
use crate::ports::outbound::{AuditEvent, AuditSink, TransferFrame, Transport};
use crate::store::StateStore;
use crate::transition::TransitionManager;

pub use crate::algorithms::{ConsistencyReport, DriftReport};

/// Magnitude samples retained per replica group.
const DRIFT_HISTORY_DEPTH: usize = 16;

/// Outcome of one synchronization pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SynchronizationResult {
    /// Detection timing used.
    pub method: SyncMethod,
    /// Objects that reached `Synchronized`.
    pub synchronized: Vec<Uuid>,
    /// Conflicts found, with resolutions attached where resolved.
    pub conflicts: Vec<StateConflict>,
}

/// Per-target outcome of a propagation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PropagationTarget {
    /// Destination partition.
    pub partition: PartitionId,
    /// Whether delivery succeeded.
    pub ok: bool,
    /// Whether the last failure was retryable.
    pub retryable: bool,
    /// Send attempts made.
    pub attempts: u32,
    /// Last error message, if any.
    pub error: Option<String>,
}

/// Result of pushing a source value to several partitions.
///
/// Partial failure is reported per target, never as an all-or-nothing
/// error.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PropagationResult {
    /// Object whose value was pushed.
    pub source: Uuid,
    /// One entry per requested partition.
    pub targets: Vec<PropagationTarget>,
}

impl PropagationResult {
    /// Whether every target acknowledged delivery.
    pub fn fully_delivered(&self) -> bool {
        self.targets.iter().all(|t| t.ok)
    }
}

/// Synchronizes replica sets and tracks their drift.
pub struct Synchronizer {
    store: Arc<StateStore>,
    transitions: Arc<TransitionManager>,
    transport: Arc<dyn Transport>,
    audit: Arc<dyn AuditSink>,
    policy: ContentionPolicy,
    max_retries: u32,
    /// Drift magnitudes per replica group, keyed by the smallest id.
    drift_history: RwLock<HashMap<Uuid, Vec<f64>>>,
    /// Sync outcomes per object: (at, ok, latency).
    sync_history: RwLock<HashMap<Uuid, Vec<(u64, bool, Duration)>>>,
    /// Conflict observations per object: (at, severity).
    conflict_history: RwLock<HashMap<Uuid, Vec<(u64, Severity)>>>,
}

impl Synchronizer {
    /// Create a synchronizer over the given store and collaborators.
    pub fn new(
        store: Arc<StateStore>,
        transitions: Arc<TransitionManager>,
        transport: Arc<dyn Transport>,
        audit: Arc<dyn AuditSink>,
        policy: ContentionPolicy,
        max_retries: u32,
    ) -> Self {
        Self {
            store,
            transitions,
            transport,
            audit,
            policy,
            max_retries,
            drift_history: RwLock::new(HashMap::new()),
            sync_history: RwLock::new(HashMap::new()),
            conflict_history: RwLock::new(HashMap::new()),
        }
    }

    /// Synchronize a replica set.
    ///
    /// `method` controls when conflict detection runs relative to the
    /// writes. A replica with an in-flight transition blocks or fails
    /// fast with `StateBusy`, per the configured contention policy.
    pub async fn synchronize(
        &self,
        ids: &[Uuid],
        method: SyncMethod,
    ) -> Result<SynchronizationResult, EngineError> {
        let started = Instant::now();

        for id in ids {
            if self.transitions.is_in_flight(*id) {
                match self.policy {
                    ContentionPolicy::FailFast => return Err(EngineError::StateBusy(*id)),
                    ContentionPolicy::Block => self.transitions.wait_until_free(*id).await,
                }
            }
        }

        // Pessimistic detection locks every replica for the whole pass.
        let mut guards = Vec::new();
        if method == SyncMethod::Pessimistic {
            for id in ids {
                let lock = self.transitions.lock_entry(*id);
                let guard = match self.policy {
                    ContentionPolicy::Block => lock.lock_owned().await,
                    ContentionPolicy::FailFast => lock
                        .try_lock_owned()
                        .map_err(|_| EngineError::StateBusy(*id))?,
                };
                guards.push(guard);
            }
        }

        let objects = self.store.get_many(ids)?;
        let conflicts = self.detect(&objects, method);
        debug!(
            "[stategrid] synchronize {:?} over {} replica(s): {} conflict(s)",
            method,
            objects.len(),
            conflicts.len()
        );

        for conflict in &conflicts {
            self.note_conflict(conflict);
            self.audit.record(AuditEvent::ConflictDetected {
                conflict: conflict.id,
                objects: conflict.object_ids.clone(),
                description: conflict.description.clone(),
            });
        }

        let result = if conflicts.is_empty() {
            for object in &objects {
                self.store.set_status(object.id, StateStatus::Synchronized)?;
            }
            SynchronizationResult {
                method,
                synchronized: objects.iter().map(|o| o.id).collect(),
                conflicts: Vec::new(),
            }
        } else {
            let resolution = self.resolve_conflicts(&conflicts)?;
            let mut resolved_conflicts = conflicts;
            for conflict in &mut resolved_conflicts {
                conflict.resolution = Some(resolution.clone());
            }

            match resolution.strategy {
                ResolutionStrategy::Manual | ResolutionStrategy::Escalation => {
                    // Critical disagreements stay visible as inconsistent.
                    let critical_ids: Vec<Uuid> = resolved_conflicts
                        .iter()
                        .filter(|c| c.severity == Severity::Critical)
                        .flat_map(|c| c.object_ids.iter().copied())
                        .collect();
                    let mut synchronized = Vec::new();
                    for object in &objects {
                        if critical_ids.contains(&object.id) {
                            self.store.set_status(object.id, StateStatus::Inconsistent)?;
                        } else {
                            self.store.set_status(object.id, StateStatus::Synchronized)?;
                            synchronized.push(object.id);
                        }
                    }
                    SynchronizationResult {
                        method,
                        synchronized,
                        conflicts: resolved_conflicts,
                    }
                }
                ResolutionStrategy::Automatic | ResolutionStrategy::Negotiated => {
                    // Overrides have already converged the replicas.
                    for object in &objects {
                        self.store.set_status(object.id, StateStatus::Synchronized)?;
                    }
                    SynchronizationResult {
                        method,
                        synchronized: objects.iter().map(|o| o.id).collect(),
                        conflicts: resolved_conflicts,
                    }
                }
            }
        };

        let now = unix_now();
        let elapsed = started.elapsed();
        let mut history = self.sync_history.write();
        for object in &objects {
            let ok = result.synchronized.contains(&object.id);
            history.entry(object.id).or_default().push((now, ok, elapsed));
        }
        drop(guards);

        Ok(result)
    }

    /// Resolve a batch of conflicts.
    ///
    /// Chooses `Manual` whenever any conflict is critical, otherwise
    /// `Automatic` with highest-version-wins overrides, applied to the
    /// store immediately. Every action records whether it was automated.
    pub fn resolve_conflicts(
        &self,
        conflicts: &[StateConflict],
    ) -> Result<ConflictResolution, EngineError> {
        let mut ids: Vec<Uuid> = conflicts
            .iter()
            .flat_map(|c| c.object_ids.iter().copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        let replicas = self.store.get_many(&ids)?;
        let refs: Vec<&StateObject> = replicas.iter().collect();

        let resolution = conflict::decide_resolution(conflicts, &refs, unix_now());

        if resolution.strategy == ResolutionStrategy::Automatic {
            if let Some(winner) = conflict::highest_version(&refs) {
                for action in &resolution.actions {
                    if action.kind == ResolutionActionKind::Override && action.automated {
                        self.store.overwrite_replica(
                            action.target,
                            winner.payload.clone(),
                            winner.version.clone(),
                        )?;
                    }
                }
            }
        }

        self.audit.record(AuditEvent::ConflictResolved {
            strategy: resolution.strategy,
            actions: resolution.actions.len(),
        });
        info!(
            "[stategrid] resolved {} conflict(s) via {:?} with {} action(s)",
            conflicts.len(),
            resolution.strategy,
            resolution.actions.len()
        );
        Ok(resolution)
    }

    /// Score the consistency of a set of objects and list violations.
    pub fn maintain_consistency(&self, ids: &[Uuid]) -> Result<ConsistencyReport, EngineError> {
        let objects = self.store.get_many(ids)?;
        let refs: Vec<&StateObject> = objects.iter().collect();
        Ok(drift::consistency_report(&refs, &self.store.ids()))
    }

    /// Push `source`'s payload and version to each target partition.
    pub async fn propagate(
        &self,
        source: Uuid,
        targets: &[PartitionId],
    ) -> Result<PropagationResult, EngineError> {
        let object = self.store.get(source)?;
        let mut outcomes = Vec::with_capacity(targets.len());

        for target in targets {
            let frame = TransferFrame {
                object_id: source,
                sequence: 0,
                total: 1,
                bytes: object.payload.content.clone(),
            };
            let mut attempts = 0u32;
            let outcome = loop {
                attempts += 1;
                match self.transport.send(*target, frame.clone()).await {
                    Ok(_) => {
                        break PropagationTarget {
                            partition: *target,
                            ok: true,
                            retryable: false,
                            attempts,
                            error: None,
                        }
                    }
                    Err(error) if error.retryable && attempts <= self.max_retries => {
                        debug!(
                            "[stategrid] propagate retry {} to partition {}",
                            attempts, target
                        );
                    }
                    Err(error) => {
                        break PropagationTarget {
                            partition: *target,
                            ok: false,
                            retryable: error.retryable,
                            attempts,
                            error: Some(error.to_string()),
                        }
                    }
                }
            };
            outcomes.push(outcome);
        }

        Ok(PropagationResult {
            source,
            targets: outcomes,
        })
    }

    /// Measure drift across replicas and classify its direction from the
    /// group's history.
    pub fn detect_drift(&self, ids: &[Uuid]) -> Result<DriftReport, EngineError> {
        let objects = self.store.get_many(ids)?;
        let refs: Vec<&StateObject> = objects.iter().collect();

        let key = ids.iter().min().copied().unwrap_or(Uuid::nil());
        let mut histories = self.drift_history.write();
        let history = histories.entry(key).or_default();

        let report = drift::measure_drift(&refs, history);

        history.push(report.magnitude);
        if history.len() > DRIFT_HISTORY_DEPTH {
            let excess = history.len() - DRIFT_HISTORY_DEPTH;
            history.drain(..excess);
        }
        Ok(report)
    }

    /// Sync outcomes recorded for an object: (at, ok, latency).
    pub fn sync_history(&self, id: Uuid) -> Vec<(u64, bool, Duration)> {
        self.sync_history.read().get(&id).cloned().unwrap_or_default()
    }

    /// Conflict observations recorded for an object: (at, severity).
    pub fn conflict_history(&self, id: Uuid) -> Vec<(u64, Severity)> {
        self.conflict_history
            .read()
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    fn detect(&self, objects: &[StateObject], method: SyncMethod) -> Vec<StateConflict> {
        let now = unix_now();
        let refs: Vec<&StateObject> = objects.iter().collect();
        match method {
            // Check before every write: fold replicas in one at a time
            // and compare each against the accepted prefix.
            SyncMethod::Immediate | SyncMethod::Optimistic => {
                let mut conflicts = Vec::new();
                for end in 2..=refs.len() {
                    let window = &refs[..end];
                    let fresh = conflict::detect_replica_conflicts(window, now);
                    for found in fresh {
                        let known = conflicts.iter().any(|c: &StateConflict| {
                            c.kind == found.kind && c.object_ids == found.object_ids
                        });
                        if !known {
                            conflicts.push(found);
                        }
                    }
                }
                conflicts
            }
            // One pass over the whole set.
            SyncMethod::Batched | SyncMethod::Lazy | SyncMethod::Pessimistic => {
                conflict::detect_replica_conflicts(&refs, now)
            }
        }
    }

    fn note_conflict(&self, conflict: &StateConflict) {
        let mut history = self.conflict_history.write();
        for id in &conflict.object_ids {
            history
                .entry(*id)
                .or_default()
                .push((conflict.detected_at, conflict.severity));
        }
    }
}
