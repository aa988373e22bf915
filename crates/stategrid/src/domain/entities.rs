//! # Domain Entities
//!
//! Core entities for the state engine: the state object itself, transition
//! plans and their live records, conflicts, and the network aggregate.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use uuid::Uuid;

use super::errors::{Checksum, EngineError, PartitionId, TransitionError};
use super::value_objects::{
    CheckKind, CompressionKind, ConflictType, MetadataValue, ResolutionActionKind,
    ResolutionStrategy, Severity, StateStatus, StepKind, SyncDirection, SyncRuleAction,
    TransitionKind, TransitionPriority, TransitionStatus, Version,
};

/// Opaque payload carried by a state object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatePayload {
    /// Content bytes.
    pub content: Vec<u8>,
    /// Schema tag the content conforms to.
    pub schema: String,
    /// Encoding of the content (e.g. "json", "bincode").
    pub encoding: String,
    /// Declared content size.
    pub size_bytes: u64,
    /// SHA-256 over the content bytes.
    pub checksum: Checksum,
    /// Compression applied to the content.
    pub compression: CompressionKind,
}

impl StatePayload {
    /// Create a payload, computing size and checksum from the content.
    pub fn new(
        content: Vec<u8>,
        schema: impl Into<String>,
        encoding: impl Into<String>,
        compression: CompressionKind,
    ) -> Self {
        let checksum = Self::digest(&content);
        Self {
            size_bytes: content.len() as u64,
            content,
            schema: schema.into(),
            encoding: encoding.into(),
            checksum,
            compression,
        }
    }

    /// Uncompressed JSON payload, the common case in tests and demos.
    pub fn json(content: impl Into<Vec<u8>>) -> Self {
        Self::new(content.into(), "unversioned", "json", CompressionKind::None)
    }

    /// SHA-256 over content bytes.
    pub fn digest(content: &[u8]) -> Checksum {
        let mut hasher = Sha256::new();
        hasher.update(content);
        let result = hasher.finalize();
        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&result);
        checksum
    }

    /// Whether the stored checksum and size match the content.
    pub fn is_intact(&self) -> bool {
        self.size_bytes == self.content.len() as u64 && self.checksum == Self::digest(&self.content)
    }

    /// Short hex prefix of the checksum, for log lines.
    pub fn checksum_prefix(&self) -> String {
        hex::encode(&self.checksum[..4])
    }
}

/// Principal lists controlling access to a state object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    /// Principals allowed to read.
    pub read: Vec<String>,
    /// Principals allowed to write.
    pub write: Vec<String>,
    /// Principals allowed to administer.
    pub admin: Vec<String>,
}

impl AccessControl {
    /// Everyone-may-do-everything default used for unowned objects.
    pub fn open() -> Self {
        Self::default()
    }

    /// Whether `principal` may mutate the object.
    ///
    /// Empty principal lists mean the object is unrestricted.
    pub fn can_write(&self, principal: &str) -> bool {
        (self.write.is_empty() && self.admin.is_empty())
            || self.write.iter().any(|p| p == principal)
            || self.admin.iter().any(|p| p == principal)
    }
}

/// Retention policy for a state object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// How long the object is retained, in seconds.
    pub retain_for_secs: u64,
    /// Interval between payload backups, in seconds.
    pub backup_interval_secs: u64,
    /// What happens when the retention window closes.
    pub archival: super::value_objects::ArchivalStrategy,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retain_for_secs: 30 * 24 * 3600,
            backup_interval_secs: 24 * 3600,
            archival: super::value_objects::ArchivalStrategy::Preserve,
        }
    }
}

/// Metadata attached to a state object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateMetadata {
    /// Owning principal.
    pub owner: String,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Typed properties.
    pub properties: BTreeMap<String, MetadataValue>,
    /// Access-control principal lists.
    pub access: AccessControl,
    /// Retention policy.
    pub retention: RetentionPolicy,
}

impl StateMetadata {
    /// Metadata owned by `owner` with default policies.
    pub fn owned_by(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            ..Self::default()
        }
    }
}

/// The unit of management: a versioned, partitioned state object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateObject {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning partition.
    pub partition: PartitionId,
    /// Payload.
    pub payload: StatePayload,
    /// Metadata.
    pub metadata: StateMetadata,
    /// Version, monotone under mutation.
    pub version: Version,
    /// Lifecycle status.
    pub status: StateStatus,
    /// Creation timestamp.
    pub created_at: u64,
    /// Last mutation timestamp.
    pub last_modified: u64,
    /// Ids of objects this one derives from (merge/split lineage).
    pub dependencies: Vec<Uuid>,
}

impl StateObject {
    /// Create a fresh active object at version 1.0.0.
    pub fn new(partition: PartitionId, payload: StatePayload, owner: &str, now: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            partition,
            payload,
            metadata: StateMetadata::owned_by(owner),
            version: Version::initial(owner, now),
            status: StateStatus::Active,
            created_at: now,
            last_modified: now,
            dependencies: Vec::new(),
        }
    }

    /// Whether a transition or update may start on this object.
    pub fn is_mutable(&self) -> bool {
        !matches!(self.status, StateStatus::Transitioning)
    }
}

/// Projected resource needs of a transition plan.
///
/// The same shape doubles as the engine's configured ceilings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// CPU budget in milliseconds.
    pub cpu_millis: u64,
    /// Peak memory in bytes.
    pub memory_bytes: u64,
    /// Scratch storage in bytes.
    pub storage_bytes: u64,
    /// Bytes moved over transport.
    pub bandwidth_bytes: u64,
}

impl ResourceRequirements {
    /// Per-dimension comparison against a ceiling; first overflow wins.
    pub fn first_overflow(&self, ceiling: &ResourceRequirements) -> Option<(&'static str, u64, u64)> {
        if self.cpu_millis > ceiling.cpu_millis {
            return Some(("cpu", self.cpu_millis, ceiling.cpu_millis));
        }
        if self.memory_bytes > ceiling.memory_bytes {
            return Some(("memory", self.memory_bytes, ceiling.memory_bytes));
        }
        if self.storage_bytes > ceiling.storage_bytes {
            return Some(("storage", self.storage_bytes, ceiling.storage_bytes));
        }
        if self.bandwidth_bytes > ceiling.bandwidth_bytes {
            return Some(("bandwidth", self.bandwidth_bytes, ceiling.bandwidth_bytes));
        }
        None
    }
}

/// A validation check declared by a transition plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationCheck {
    /// What is being checked.
    pub kind: CheckKind,
    /// Human-readable description.
    pub description: String,
    /// Whether a failure aborts the transition.
    pub critical: bool,
}

/// Outcome of one validation check.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckOutcome {
    /// Which check ran.
    pub kind: CheckKind,
    /// Whether it passed.
    pub passed: bool,
    /// Detail for the operator.
    pub detail: String,
}

/// One step of a transition plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionStep {
    /// Step id, unique within the plan.
    pub id: u32,
    /// What the step does.
    pub kind: StepKind,
    /// Estimated duration.
    pub estimated: Duration,
    /// Step ids that must complete first.
    pub depends_on: Vec<u32>,
}

/// Reverse steps replayed when a transition is undone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackPlan {
    /// Steps in replay order.
    pub steps: Vec<TransitionStep>,
    /// Whether a payload backup must exist before execution starts.
    pub backup_required: bool,
}

/// Immutable plan for moving one object between partitions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitionPlan {
    /// Plan id.
    pub id: Uuid,
    /// Object being moved.
    pub object_id: Uuid,
    /// Where the object lives now.
    pub source_partition: PartitionId,
    /// Where it is going.
    pub target_partition: PartitionId,
    /// Ordered steps.
    pub steps: Vec<TransitionStep>,
    /// Sum of step estimates.
    pub estimated_total: Duration,
    /// Projected resource needs.
    pub resources: ResourceRequirements,
    /// How to undo the move.
    pub rollback: RollbackPlan,
    /// Checks run during the validation step.
    pub checks: Vec<ValidationCheck>,
}

/// Caller-supplied context for a transition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitionContext {
    /// Acting principal.
    pub actor: String,
    /// Why the transition was requested.
    pub reason: String,
    /// Scheduling priority.
    pub priority: TransitionPriority,
    /// Hard deadline on the whole execute call.
    pub timeout: Duration,
    /// Whether failures trigger automatic rollback.
    pub rollback_enabled: bool,
    /// Whether validation checks run.
    pub validation_required: bool,
    /// Whether audit events are recorded.
    pub audit_required: bool,
}

impl Default for TransitionContext {
    fn default() -> Self {
        Self {
            actor: "system".to_string(),
            reason: "rebalance".to_string(),
            priority: TransitionPriority::Normal,
            timeout: Duration::from_secs(30),
            rollback_enabled: true,
            validation_required: true,
            audit_required: false,
        }
    }
}

impl TransitionContext {
    /// Context for tests: short timeout, rollback on, no audit.
    pub fn for_testing() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }
}

/// Final outcome of an execute call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitionResult {
    /// Whether the move committed.
    pub success: bool,
    /// Bytes moved over transport.
    pub bytes_moved: u64,
    /// Wall-clock duration of the execute call.
    pub duration: Duration,
    /// Per-check outcomes.
    pub check_outcomes: Vec<CheckOutcome>,
    /// Structured errors, empty on success.
    pub errors: Vec<TransitionError>,
}

/// Live record of a transition being executed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateTransition {
    /// Record id.
    pub id: Uuid,
    /// Plan being executed.
    pub plan_id: Uuid,
    /// Object being moved.
    pub object_id: Uuid,
    /// Source partition.
    pub source_partition: PartitionId,
    /// Target partition.
    pub target_partition: PartitionId,
    /// Caller context.
    pub context: TransitionContext,
    /// Current status.
    pub status: TransitionStatus,
    /// When execution started.
    pub started_at: Option<u64>,
    /// When execution reached a terminal status.
    pub completed_at: Option<u64>,
    /// Final outcome, set on terminal status.
    pub result: Option<TransitionResult>,
}

impl StateTransition {
    /// Create a planned record for `plan` under `context`.
    pub fn new(plan: &TransitionPlan, context: TransitionContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            plan_id: plan.id,
            object_id: plan.object_id,
            source_partition: plan.source_partition,
            target_partition: plan.target_partition,
            context,
            status: TransitionStatus::Planned,
            started_at: None,
            completed_at: None,
            result: None,
        }
    }

    /// Transition the record to a new status.
    pub fn transition_to(&mut self, next: TransitionStatus) -> Result<(), EngineError> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                from: format!("{:?}", self.status),
                to: format!("{:?}", next),
            });
        }
        self.status = next;
        Ok(())
    }
}

/// Progress snapshot of an in-flight transition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitionProgress {
    /// Index of the step currently running (0-based).
    pub current_step: usize,
    /// Total number of steps.
    pub total_steps: usize,
    /// Completed fraction in [0,1].
    pub fraction: f64,
    /// Estimated time remaining.
    pub eta: Duration,
}

/// A disagreement between replicas of the same logical object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateConflict {
    /// Conflict id.
    pub id: Uuid,
    /// The replicas involved.
    pub object_ids: Vec<Uuid>,
    /// Classification.
    pub kind: ConflictType,
    /// Severity.
    pub severity: Severity,
    /// What disagrees.
    pub description: String,
    /// Detection timestamp.
    pub detected_at: u64,
    /// Resolution record, once resolved.
    pub resolution: Option<ConflictResolution>,
}

impl StateConflict {
    /// Create an unresolved conflict.
    pub fn new(
        object_ids: Vec<Uuid>,
        kind: ConflictType,
        severity: Severity,
        description: impl Into<String>,
        now: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            object_ids,
            kind,
            severity,
            description: description.into(),
            detected_at: now,
            resolution: None,
        }
    }
}

/// One concrete action taken during conflict resolution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolutionAction {
    /// What was done.
    pub kind: ResolutionActionKind,
    /// The object acted upon.
    pub target: Uuid,
    /// Whether the engine performed it without a human.
    pub automated: bool,
    /// Detail for the audit trail.
    pub detail: String,
}

/// Resolution record attached to conflicts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConflictResolution {
    /// Who resolved.
    pub strategy: ResolutionStrategy,
    /// Actions taken, in order.
    pub actions: Vec<ResolutionAction>,
    /// Resolution timestamp.
    pub resolved_at: u64,
}

/// Condition side of a synchronization rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncCondition {
    /// Matches every object.
    Always,
    /// Matches objects in the given status.
    StatusIs(StateStatus),
    /// Matches replica sets whose version spread is at least this many
    /// patch units.
    VersionSkewAtLeast(u64),
    /// Matches objects carrying the tag.
    TagPresent(String),
}

impl SyncCondition {
    /// Evaluate against one object and the spread of its replica set.
    pub fn matches(&self, object: &StateObject, version_spread: u64) -> bool {
        match self {
            Self::Always => true,
            Self::StatusIs(status) => object.status == *status,
            Self::VersionSkewAtLeast(skew) => version_spread >= *skew,
            Self::TagPresent(tag) => object.metadata.tags.iter().any(|t| t == tag),
        }
    }
}

/// A synchronization rule: condition, action, direction, priority.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SynchronizationRule {
    /// Rule id.
    pub id: Uuid,
    /// When the rule fires.
    pub condition: SyncCondition,
    /// What it does.
    pub action: SyncRuleAction,
    /// Which way values flow.
    pub direction: SyncDirection,
    /// Higher fires first.
    pub priority: u8,
}

impl SynchronizationRule {
    /// Create a rule.
    pub fn new(condition: SyncCondition, action: SyncRuleAction, priority: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            condition,
            action,
            direction: SyncDirection::Push,
            priority,
        }
    }
}

/// Predicate used by transition rules.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatePredicate {
    /// Object status must be one of these.
    StatusIn(Vec<StateStatus>),
    /// Payload checksum must match content.
    ChecksumValid,
    /// Partition must be registered in the network.
    PartitionKnown,
}

/// A transition rule: preconditions, postconditions, allowed kinds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitionRule {
    /// Rule id.
    pub id: Uuid,
    /// Checked against the source before planning.
    pub preconditions: Vec<StatePredicate>,
    /// Checked against the moved object after commit.
    pub postconditions: Vec<StatePredicate>,
    /// Transition kinds the rule admits.
    pub allowed: Vec<TransitionKind>,
    /// Extra validation checks appended to every plan.
    pub checks: Vec<ValidationCheck>,
}

impl TransitionRule {
    /// The default rule set: moves and replications of intact, settled
    /// objects.
    pub fn default_rules() -> Vec<Self> {
        vec![Self {
            id: Uuid::new_v4(),
            preconditions: vec![
                StatePredicate::StatusIn(vec![
                    StateStatus::Active,
                    StateStatus::Synchronized,
                    StateStatus::Inconsistent,
                ]),
                StatePredicate::ChecksumValid,
                StatePredicate::PartitionKnown,
            ],
            postconditions: vec![
                StatePredicate::StatusIn(vec![StateStatus::Active]),
                StatePredicate::ChecksumValid,
            ],
            allowed: vec![TransitionKind::Move, TransitionKind::Replicate],
            checks: Vec::new(),
        }]
    }
}

/// The root aggregate: partitions, per-partition object sets, and rules.
///
/// Created once at startup and mutated by every transition and
/// synchronization call; the caller owns teardown.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SynchronizationNetwork {
    /// Registered partitions.
    pub partitions: Vec<PartitionId>,
    /// Object ids known to each partition.
    pub objects_by_partition: BTreeMap<PartitionId, BTreeSet<Uuid>>,
    /// Synchronization rules, highest priority first.
    pub sync_rules: Vec<SynchronizationRule>,
    /// Transition rules.
    pub transition_rules: Vec<TransitionRule>,
}

impl SynchronizationNetwork {
    /// Create a network over the given partitions with default rules.
    pub fn new(partitions: Vec<PartitionId>) -> Result<Self, EngineError> {
        if partitions.is_empty() {
            return Err(EngineError::StateInconsistency(
                "a network needs at least one partition".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for p in &partitions {
            if !seen.insert(*p) {
                return Err(EngineError::StateInconsistency(format!(
                    "duplicate partition {} in network",
                    p
                )));
            }
        }
        let objects_by_partition = partitions.iter().map(|p| (*p, BTreeSet::new())).collect();
        let mut sync_rules = vec![
            SynchronizationRule::new(SyncCondition::VersionSkewAtLeast(1), SyncRuleAction::Propagate, 10),
            SynchronizationRule::new(SyncCondition::StatusIs(StateStatus::Inconsistent), SyncRuleAction::Notify, 5),
        ];
        sync_rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(Self {
            partitions,
            objects_by_partition,
            sync_rules,
            transition_rules: TransitionRule::default_rules(),
        })
    }

    /// Whether the partition is registered.
    pub fn knows_partition(&self, partition: PartitionId) -> bool {
        self.partitions.contains(&partition)
    }

    /// Record that `object` lives on `partition`.
    pub fn register_object(
        &mut self,
        partition: PartitionId,
        object: Uuid,
    ) -> Result<(), EngineError> {
        self.objects_by_partition
            .get_mut(&partition)
            .ok_or(EngineError::UnknownPartition(partition))?
            .insert(object);
        Ok(())
    }

    /// Record that `object` moved from `from` to `to`.
    pub fn move_object(
        &mut self,
        object: Uuid,
        from: PartitionId,
        to: PartitionId,
    ) -> Result<(), EngineError> {
        if let Some(set) = self.objects_by_partition.get_mut(&from) {
            set.remove(&object);
        }
        self.register_object(to, object)
    }
}
