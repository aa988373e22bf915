//! # State Store
//!
//! The registry of state objects: an arena keyed by id behind a single
//! `RwLock`. Every other component reads and mutates objects through the
//! operations here, never through direct field access, so version bumps
//! are linearizable per object and locking stays in one place.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    invariants, unix_now, EngineError, PartitionId, Severity, StateObject, StatePayload,
    StateStatus, Version,
};

/// How payloads combine when objects merge.
pub enum MergePolicy {
    /// The input with the highest version contributes the payload.
    LastWriterWins,
    /// Caller-supplied merge over the ordered inputs.
    Custom(Box<dyn Fn(&[&StateObject]) -> StatePayload + Send + Sync>),
}

/// An issue found by `validate_consistency`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// How bad it is.
    pub severity: Severity,
    /// What was observed.
    pub detail: String,
}

/// Result of validating one object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Object examined.
    pub object_id: Uuid,
    /// Health score in [0,1]; 1.0 means no issues.
    pub score: f64,
    /// Issues found, most severe first.
    pub issues: Vec<ValidationIssue>,
}

/// In-memory registry of state objects.
#[derive(Default)]
pub struct StateStore {
    objects: RwLock<HashMap<Uuid, StateObject>>,
    /// Split parent id -> child ids, kept until the lineage resolves.
    lineage: RwLock<HashMap<Uuid, Vec<Uuid>>>,
}

impl StateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh object on `partition` at version 1.0.0.
    ///
    /// Fails only on a malformed payload.
    pub fn create(
        &self,
        partition: PartitionId,
        payload: StatePayload,
        owner: &str,
    ) -> Result<StateObject, EngineError> {
        invariants::validate_payload(&payload)?;
        let object = StateObject::new(partition, payload, owner, unix_now());
        debug!(
            "[stategrid] created object {} on partition {} ({} bytes)",
            object.id, partition, object.payload.size_bytes
        );
        self.objects.write().insert(object.id, object.clone());
        Ok(object)
    }

    /// Create a replica of `source` on `partition`.
    ///
    /// The replica carries the source payload and version and depends on
    /// the source.
    pub fn create_replica(
        &self,
        source: Uuid,
        partition: PartitionId,
    ) -> Result<StateObject, EngineError> {
        let mut objects = self.objects.write();
        let origin = objects
            .get(&source)
            .ok_or(EngineError::UnknownObject(source))?
            .clone();
        let mut replica = origin.clone();
        replica.id = Uuid::new_v4();
        replica.partition = partition;
        replica.dependencies = vec![source];
        replica.status = StateStatus::Active;
        objects.insert(replica.id, replica.clone());
        debug!(
            "[stategrid] replicated {} onto partition {} as {}",
            source, partition, replica.id
        );
        Ok(replica)
    }

    /// Fetch a copy of an object.
    pub fn get(&self, id: Uuid) -> Result<StateObject, EngineError> {
        self.objects
            .read()
            .get(&id)
            .cloned()
            .ok_or(EngineError::UnknownObject(id))
    }

    /// Fetch copies of several objects, failing on the first unknown id.
    pub fn get_many(&self, ids: &[Uuid]) -> Result<Vec<StateObject>, EngineError> {
        let objects = self.objects.read();
        ids.iter()
            .map(|id| {
                objects
                    .get(id)
                    .cloned()
                    .ok_or(EngineError::UnknownObject(*id))
            })
            .collect()
    }

    /// Replace an object's payload, bumping the patch version.
    ///
    /// Fails with `InvalidState` while the object is transitioning.
    pub fn update(
        &self,
        id: Uuid,
        payload: StatePayload,
        author: &str,
    ) -> Result<StateObject, EngineError> {
        invariants::validate_payload(&payload)?;
        let mut objects = self.objects.write();
        let object = objects.get_mut(&id).ok_or(EngineError::UnknownObject(id))?;
        if !object.is_mutable() {
            return Err(EngineError::InvalidState(format!(
                "object {} is transitioning",
                id
            )));
        }
        let now = unix_now();
        let next = object.version.bumped_patch(author, "update", now);
        invariants::invariant_version_monotone(&object.version, &next)?;
        object.version = next;
        object.payload = payload;
        object.status = StateStatus::Active;
        object.last_modified = now;
        Ok(object.clone())
    }

    /// Merge several objects into a new one.
    ///
    /// The merged object's dependencies are exactly the input ids; its
    /// version is the highest input version with a minor bump.
    pub fn merge(
        &self,
        ids: &[Uuid],
        policy: MergePolicy,
        author: &str,
    ) -> Result<StateObject, EngineError> {
        if ids.is_empty() {
            return Err(EngineError::InvalidState(
                "merge requires at least one input".to_string(),
            ));
        }
        let mut objects = self.objects.write();
        let inputs: Vec<StateObject> = ids
            .iter()
            .map(|id| {
                objects
                    .get(id)
                    .cloned()
                    .ok_or(EngineError::UnknownObject(*id))
            })
            .collect::<Result<_, _>>()?;
        if let Some(busy) = inputs.iter().find(|o| !o.is_mutable()) {
            return Err(EngineError::StateBusy(busy.id));
        }

        let refs: Vec<&StateObject> = inputs.iter().collect();
        let winner = refs
            .iter()
            .max_by_key(|o| o.version.key())
            .copied()
            .ok_or_else(|| EngineError::InvalidState("empty merge input".to_string()))?;

        let payload = match policy {
            MergePolicy::LastWriterWins => winner.payload.clone(),
            MergePolicy::Custom(merge_fn) => {
                let merged = merge_fn(&refs);
                invariants::validate_payload(&merged)?;
                merged
            }
        };

        let now = unix_now();
        let mut merged = StateObject::new(winner.partition, payload, author, now);
        merged.metadata = winner.metadata.clone();
        merged.version = winner.version.bumped_minor(author, "merge", now);
        merged.dependencies = ids.to_vec();

        let graph = Self::graph_of(&objects);
        invariants::invariant_dependency_dag(&graph, merged.id, &merged.dependencies)?;

        debug!(
            "[stategrid] merged {} object(s) into {} at {}.{}.{}",
            ids.len(),
            merged.id,
            merged.version.major,
            merged.version.minor,
            merged.version.patch
        );
        objects.insert(merged.id, merged.clone());
        Ok(merged)
    }

    /// Split an object into one child per target partition.
    ///
    /// Children depend on the parent; the parent is `Inconsistent` until
    /// every child reaches an active status (`resolve_split_lineage`).
    pub fn split(
        &self,
        id: Uuid,
        partitions: &[PartitionId],
        author: &str,
    ) -> Result<Vec<StateObject>, EngineError> {
        if partitions.is_empty() {
            return Err(EngineError::InvalidState(
                "split requires at least one target partition".to_string(),
            ));
        }
        let mut objects = self.objects.write();
        let parent = objects
            .get(&id)
            .cloned()
            .ok_or(EngineError::UnknownObject(id))?;
        if !parent.is_mutable() {
            return Err(EngineError::StateBusy(id));
        }

        let now = unix_now();
        let children: Vec<StateObject> = partitions
            .iter()
            .map(|partition| {
                let mut child = StateObject::new(*partition, parent.payload.clone(), author, now);
                child.metadata = parent.metadata.clone();
                child.version = parent.version.bumped_patch(author, "split", now);
                child.dependencies = vec![id];
                child
            })
            .collect();

        for child in &children {
            objects.insert(child.id, child.clone());
        }
        if let Some(parent) = objects.get_mut(&id) {
            parent.status = StateStatus::Inconsistent;
            parent.last_modified = now;
        }
        self.lineage
            .write()
            .insert(id, children.iter().map(|c| c.id).collect());

        debug!(
            "[stategrid] split {} into {} children across {:?}",
            id,
            children.len(),
            partitions
        );
        Ok(children)
    }

    /// Flip a split parent back to `Active` once every child is settled.
    ///
    /// Returns whether the lineage resolved.
    pub fn resolve_split_lineage(&self, parent: Uuid) -> Result<bool, EngineError> {
        let children = match self.lineage.read().get(&parent) {
            Some(children) => children.clone(),
            None => return Ok(false),
        };
        let mut objects = self.objects.write();
        let all_settled = children.iter().all(|child| {
            objects
                .get(child)
                .map(|o| o.status.is_consistent())
                .unwrap_or(false)
        });
        if !all_settled {
            return Ok(false);
        }
        let object = objects
            .get_mut(&parent)
            .ok_or(EngineError::UnknownObject(parent))?;
        if object.status == StateStatus::Inconsistent {
            object.status = StateStatus::Active;
            object.last_modified = unix_now();
        }
        drop(objects);
        self.lineage.write().remove(&parent);
        Ok(true)
    }

    /// Validate checksum, dependency graph, and status sanity for one
    /// object.
    pub fn validate_consistency(&self, id: Uuid) -> Result<ValidationReport, EngineError> {
        let objects = self.objects.read();
        let object = objects.get(&id).ok_or(EngineError::UnknownObject(id))?;
        let mut issues = Vec::new();

        if !object.payload.is_intact() {
            issues.push(ValidationIssue {
                severity: Severity::Critical,
                detail: "payload checksum does not match content".to_string(),
            });
        }

        let graph = Self::graph_of(&objects);
        for dep in &object.dependencies {
            if !objects.contains_key(dep) {
                issues.push(ValidationIssue {
                    severity: Severity::High,
                    detail: format!("dependency {} is not in the registry", dep),
                });
            }
        }
        // Re-adding the object's own edges must not close a cycle.
        let mut without = graph.clone();
        without.remove(&id);
        if invariants::invariant_dependency_dag(&without, id, &object.dependencies).is_err() {
            issues.push(ValidationIssue {
                severity: Severity::High,
                detail: "dependency graph contains a cycle".to_string(),
            });
        }

        match object.status {
            StateStatus::Error => issues.push(ValidationIssue {
                severity: Severity::High,
                detail: "object is in error status".to_string(),
            }),
            StateStatus::Inconsistent => {
                if !self.lineage.read().contains_key(&id) {
                    issues.push(ValidationIssue {
                        severity: Severity::Medium,
                        detail: "inconsistent without a pending split lineage".to_string(),
                    });
                }
            }
            StateStatus::Transitioning => issues.push(ValidationIssue {
                severity: Severity::Low,
                detail: "object is mid-transition".to_string(),
            }),
            StateStatus::Active | StateStatus::Synchronized => {}
        }

        issues.sort_by(|a, b| b.severity.cmp(&a.severity));
        let mass: f64 = issues.iter().map(|i| i.severity.weight()).sum();
        Ok(ValidationReport {
            object_id: id,
            score: (1.0 - mass).clamp(0.0, 1.0),
            issues,
        })
    }

    /// Replace an object's metadata (owner, tags, ACLs, retention).
    pub fn set_metadata(
        &self,
        id: Uuid,
        metadata: crate::domain::StateMetadata,
    ) -> Result<(), EngineError> {
        let mut objects = self.objects.write();
        let object = objects.get_mut(&id).ok_or(EngineError::UnknownObject(id))?;
        object.metadata = metadata;
        object.last_modified = unix_now();
        Ok(())
    }

    /// Set an object's status.
    pub fn set_status(&self, id: Uuid, status: StateStatus) -> Result<(), EngineError> {
        let mut objects = self.objects.write();
        let object = objects.get_mut(&id).ok_or(EngineError::UnknownObject(id))?;
        object.status = status;
        object.last_modified = unix_now();
        Ok(())
    }

    /// Mark an object as transitioning.
    ///
    /// Fails with `InvalidState` unless the object is settled.
    pub fn begin_transition(&self, id: Uuid) -> Result<StateObject, EngineError> {
        let mut objects = self.objects.write();
        let object = objects.get_mut(&id).ok_or(EngineError::UnknownObject(id))?;
        if !object.is_mutable() {
            return Err(EngineError::InvalidState(format!(
                "object {} already transitioning",
                id
            )));
        }
        object.status = StateStatus::Transitioning;
        object.last_modified = unix_now();
        Ok(object.clone())
    }

    /// Commit a partition move: new partition, patch bump, `Active`.
    ///
    /// Requires the object to be mid-transition.
    pub fn complete_move(
        &self,
        id: Uuid,
        target: PartitionId,
        author: &str,
    ) -> Result<StateObject, EngineError> {
        let mut objects = self.objects.write();
        let object = objects.get_mut(&id).ok_or(EngineError::UnknownObject(id))?;
        if object.status != StateStatus::Transitioning {
            return Err(EngineError::InvalidState(format!(
                "object {} is not transitioning",
                id
            )));
        }
        let now = unix_now();
        let next = object
            .version
            .bumped_patch(author, format!("moved to partition {}", target), now);
        invariants::invariant_version_monotone(&object.version, &next)?;
        object.version = next;
        object.partition = target;
        object.status = StateStatus::Active;
        object.last_modified = now;
        Ok(object.clone())
    }

    /// Restore an object to a pre-transition snapshot.
    ///
    /// The rollback path: payload, version, partition, and status are put
    /// back exactly as captured, the one sanctioned exception to version
    /// monotonicity.
    pub fn restore(
        &self,
        id: Uuid,
        payload: StatePayload,
        version: Version,
        partition: PartitionId,
        status: StateStatus,
    ) -> Result<(), EngineError> {
        invariants::validate_payload(&payload)?;
        let mut objects = self.objects.write();
        let object = objects.get_mut(&id).ok_or(EngineError::UnknownObject(id))?;
        object.payload = payload;
        object.version = version;
        object.partition = partition;
        object.status = status;
        object.last_modified = unix_now();
        Ok(())
    }

    /// Overwrite a replica's payload and version during conflict
    /// resolution. The incoming version must not be older than the
    /// current one.
    pub fn overwrite_replica(
        &self,
        id: Uuid,
        payload: StatePayload,
        version: Version,
    ) -> Result<(), EngineError> {
        invariants::validate_payload(&payload)?;
        let mut objects = self.objects.write();
        let object = objects.get_mut(&id).ok_or(EngineError::UnknownObject(id))?;
        if version.key() < object.version.key() {
            return Err(EngineError::StateInconsistency(format!(
                "override would downgrade {} from {}.{}.{} to {}.{}.{}",
                id,
                object.version.major,
                object.version.minor,
                object.version.patch,
                version.major,
                version.minor,
                version.patch
            )));
        }
        object.payload = payload;
        object.version = version;
        object.last_modified = unix_now();
        Ok(())
    }

    /// Remove an object from the registry.
    pub fn remove(&self, id: Uuid) -> Result<StateObject, EngineError> {
        let mut objects = self.objects.write();
        let busy = objects
            .get(&id)
            .map(|o| !o.is_mutable())
            .ok_or(EngineError::UnknownObject(id))?;
        if busy {
            return Err(EngineError::StateBusy(id));
        }
        objects.remove(&id).ok_or(EngineError::UnknownObject(id))
    }

    /// Whether an object exists.
    pub fn contains(&self, id: Uuid) -> bool {
        self.objects.read().contains_key(&id)
    }

    /// Number of registered objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// All object ids.
    pub fn ids(&self) -> HashSet<Uuid> {
        self.objects.read().keys().copied().collect()
    }

    /// Copies of all objects; the monitor's read path.
    pub fn snapshot(&self) -> Vec<StateObject> {
        self.objects.read().values().cloned().collect()
    }

    /// Copies of the objects living on `partition`.
    pub fn objects_in_partition(&self, partition: PartitionId) -> Vec<StateObject> {
        self.objects
            .read()
            .values()
            .filter(|o| o.partition == partition)
            .cloned()
            .collect()
    }

    fn graph_of(objects: &HashMap<Uuid, StateObject>) -> HashMap<Uuid, Vec<Uuid>> {
        objects
            .iter()
            .map(|(id, o)| (*id, o.dependencies.clone()))
            .collect()
    }
}
