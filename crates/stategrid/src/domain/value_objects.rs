//! # Domain Value Objects
//!
//! Immutable value types for the state engine: the version triple, the
//! lifecycle status machines, and the classification enums used by
//! synchronization and monitoring.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Semantic version of a state object.
///
/// The numeric triple plus timestamp gives a total order; every mutation
/// of an object increments at least `patch`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Major component.
    pub major: u32,
    /// Minor component.
    pub minor: u32,
    /// Patch component.
    pub patch: u32,
    /// Unix timestamp of the change.
    pub timestamp: u64,
    /// Who made the change.
    pub author: String,
    /// Change log entries, newest last.
    pub changelog: Vec<String>,
}

impl Version {
    /// Initial version 1.0.0.
    pub fn initial(author: impl Into<String>, now: u64) -> Self {
        Self {
            major: 1,
            minor: 0,
            patch: 0,
            timestamp: now,
            author: author.into(),
            changelog: vec!["created".to_string()],
        }
    }

    /// Ordering key: numeric triple, then timestamp.
    pub fn key(&self) -> (u32, u32, u32, u64) {
        (self.major, self.minor, self.patch, self.timestamp)
    }

    /// Whether this version is strictly newer than `other`.
    pub fn is_newer_than(&self, other: &Version) -> bool {
        self.key() > other.key()
    }

    /// Whether the numeric triples are equal (timestamps ignored).
    pub fn same_number(&self, other: &Version) -> bool {
        (self.major, self.minor, self.patch) == (other.major, other.minor, other.patch)
    }

    /// Distance between numeric triples, collapsed to patch units.
    ///
    /// Used by drift measurement; a major step counts as 10_000 patches,
    /// a minor step as 100.
    pub fn distance(&self, other: &Version) -> u64 {
        let a = self.numeric_weight();
        let b = other.numeric_weight();
        a.abs_diff(b)
    }

    fn numeric_weight(&self) -> u64 {
        self.major as u64 * 10_000 + self.minor as u64 * 100 + self.patch as u64
    }

    /// Return a copy with `patch` incremented.
    pub fn bumped_patch(&self, author: impl Into<String>, note: impl Into<String>, now: u64) -> Self {
        let mut next = self.clone();
        next.patch += 1;
        next.stamp(author, note, now);
        next
    }

    /// Return a copy with `minor` incremented and `patch` reset.
    pub fn bumped_minor(&self, author: impl Into<String>, note: impl Into<String>, now: u64) -> Self {
        let mut next = self.clone();
        next.minor += 1;
        next.patch = 0;
        next.stamp(author, note, now);
        next
    }

    fn stamp(&mut self, author: impl Into<String>, note: impl Into<String>, now: u64) {
        self.timestamp = now;
        self.author = author.into();
        self.changelog.push(note.into());
    }
}

/// Lifecycle status of a state object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StateStatus {
    /// Normal, owned by exactly one partition.
    #[default]
    Active,
    /// An execute call is in flight for this object.
    Transitioning,
    /// Replicas across partitions agree on this value.
    Synchronized,
    /// Replicas or lineage disagree; convergence pending.
    Inconsistent,
    /// The object needs manual intervention.
    Error,
}

impl StateStatus {
    /// Statuses in which the payload checksum must match the content.
    pub fn requires_intact_checksum(&self) -> bool {
        matches!(self, Self::Active | Self::Synchronized)
    }

    /// Statuses counted as consistent by the consistency score.
    pub fn is_consistent(&self) -> bool {
        matches!(self, Self::Active | Self::Synchronized)
    }
}

/// Transition record state machine.
///
/// Strictly forward, except the rollback edge back to `RolledBack`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TransitionStatus {
    /// Plan exists, execution not started.
    #[default]
    Planned,
    /// Preparation and backup steps running.
    Initiating,
    /// Payload bytes moving to the target partition.
    Transferring,
    /// Validation checks running against the moved data.
    Validating,
    /// Store commit and cleanup running.
    Completing,
    /// Terminal: the object lives on the target partition.
    Completed,
    /// Terminal unless rolled back: execution aborted.
    Failed,
    /// Terminal: the rollback plan was replayed.
    RolledBack,
}

impl TransitionStatus {
    /// Check if transition to the next status is valid.
    pub fn can_transition_to(&self, next: TransitionStatus) -> bool {
        match (self, next) {
            (Self::Planned, Self::Initiating) => true,
            (Self::Initiating, Self::Transferring) => true,
            (Self::Transferring, Self::Validating) => true,
            (Self::Validating, Self::Completing) => true,
            (Self::Completing, Self::Completed) => true,
            // Any live stage may abort.
            (Self::Planned, Self::Failed) => true,
            (Self::Initiating, Self::Failed) => true,
            (Self::Transferring, Self::Failed) => true,
            (Self::Validating, Self::Failed) => true,
            (Self::Completing, Self::Failed) => true,
            // Rollback edges.
            (from, Self::RolledBack) => from.can_rollback(),
            _ => false,
        }
    }

    /// Statuses from which the rollback plan may be replayed.
    ///
    /// `Completed` is included so a finished move can be compensated,
    /// restoring the pre-transition payload and version.
    pub fn can_rollback(&self) -> bool {
        matches!(
            self,
            Self::Transferring | Self::Validating | Self::Completing | Self::Completed | Self::Failed
        )
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::RolledBack)
    }
}

/// Kind of a single step inside a transition plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    /// Source checks and lock bookkeeping.
    Preparation,
    /// Pre-transition payload snapshot.
    Backup,
    /// Move the payload bytes.
    DataTransfer,
    /// Run the plan's validation checks.
    Validation,
    /// Commit partition move and version bump.
    StateUpdate,
    /// Release transient resources.
    Cleanup,
}

/// Kind of a validation check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckKind {
    /// Checksum over the moved bytes matches.
    DataIntegrity,
    /// Object and lineage statuses are sane.
    StateConsistency,
    /// The acting principal has write access.
    Security,
    /// Execution stayed within its estimate envelope.
    Performance,
}

/// Payload compression kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CompressionKind {
    /// Uncompressed.
    #[default]
    None,
    /// Gzip-compressed.
    Gzip,
    /// LZ4-compressed.
    Lz4,
    /// Site-specific codec, named.
    Custom(String),
}

/// When conflict detection runs relative to the writes of a
/// synchronization pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SyncMethod {
    /// Check before every write.
    #[default]
    Immediate,
    /// Collect the whole replica set, check once, then write.
    Batched,
    /// Write everything, verify on the next read (end of the pass).
    Lazy,
    /// Write, then verify each object right after its write.
    Optimistic,
    /// Lock every object up front, then write.
    Pessimistic,
}

/// Behavior when a synchronization call meets an in-flight transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ContentionPolicy {
    /// Wait for the transition to reach a terminal state.
    #[default]
    Block,
    /// Fail fast with `StateBusy`.
    FailFast,
}

/// Conflict classification between replicas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictType {
    /// Same version number, different content.
    DataInconsistency,
    /// Replicas carry different versions.
    VersionConflict,
    /// Replicas disagree on ownership or principals.
    AccessConflict,
    /// Two replicas claim the same partition.
    ResourceConflict,
}

/// Severity ladder shared by conflicts, validation issues, and anomalies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Cosmetic; no action needed.
    Low,
    /// Should converge on its own.
    Medium,
    /// Needs attention soon.
    High,
    /// Requires an explicit caller decision.
    Critical,
}

impl Severity {
    /// Weight used by scoring functions.
    pub fn weight(&self) -> f64 {
        match self {
            Self::Low => 0.05,
            Self::Medium => 0.15,
            Self::High => 0.35,
            Self::Critical => 1.0,
        }
    }
}

/// Who resolves a conflict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionStrategy {
    /// The engine resolves without caller involvement.
    Automatic,
    /// Both sides propose, highest priority wins.
    Negotiated,
    /// A human decides.
    Manual,
    /// Routed to an operator queue.
    Escalation,
}

/// Concrete action taken while resolving a conflict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionActionKind {
    /// Combine payloads.
    Merge,
    /// Replace the loser's payload with the winner's.
    Override,
    /// Undo the conflicting change.
    Rollback,
    /// Inform the audit sink, change nothing.
    Notify,
}

/// Direction of replica drift over time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriftDirection {
    /// Spread shrinking.
    Converging,
    /// Spread growing.
    Diverging,
    /// Spread alternating.
    Oscillating,
    /// Replicas identical.
    Stable,
}

/// Trend of an object's stability score.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StabilityTrend {
    /// Slope positive.
    Improving,
    /// Slope flat.
    Stable,
    /// Slope negative.
    Degrading,
    /// Score below the critical threshold.
    Critical,
}

/// Action of a synchronization rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncRuleAction {
    /// Push the source value to matching targets.
    Propagate,
    /// Merge matching replicas.
    Merge,
    /// Overwrite matching replicas with the source value.
    Override,
    /// Record an audit event only.
    Notify,
}

/// Direction flag of a synchronization rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SyncDirection {
    /// Source to targets.
    #[default]
    Push,
    /// Targets to source.
    Pull,
    /// Both ways.
    Bidirectional,
}

/// Kind of a partition-to-partition transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionKind {
    /// Exclusive ownership moves.
    Move,
    /// A copy is placed on the target.
    Replicate,
    /// Several objects collapse into one.
    Merge,
    /// One object fans out to several partitions.
    Split,
}

/// Priority of a transition request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum TransitionPriority {
    /// Background rebalancing.
    Low,
    /// Default.
    #[default]
    Normal,
    /// User-facing migration.
    High,
    /// Evacuation of a failing partition.
    Critical,
}

/// What happens to a state object at the end of its retention window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ArchivalStrategy {
    /// Drop the object.
    Delete,
    /// Keep a compressed copy.
    Compress,
    /// Move to cold-storage partitions.
    Migrate,
    /// Keep as-is indefinitely.
    #[default]
    Preserve,
}

/// Typed metadata value.
///
/// A closed tagged variant instead of an open dynamic type, so every
/// property round-trips through serde without reflection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    /// UTF-8 string.
    Str(String),
    /// Signed integer.
    Int(i64),
    /// Double-precision float.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// Ordered list of values.
    List(Vec<MetadataValue>),
    /// String-keyed map of values.
    Map(BTreeMap<String, MetadataValue>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_initial() {
        let v = Version::initial("alice", 100);
        assert_eq!((v.major, v.minor, v.patch), (1, 0, 0));
        assert_eq!(v.changelog.len(), 1);
    }

    #[test]
    fn test_version_ordering_by_triple() {
        let a = Version::initial("alice", 100);
        let b = a.bumped_patch("bob", "edit", 50);
        // Later triple wins even with an earlier timestamp.
        assert!(b.is_newer_than(&a));
        assert!(!a.is_newer_than(&b));
    }

    #[test]
    fn test_version_ordering_by_timestamp_on_equal_triple() {
        let a = Version::initial("alice", 100);
        let mut b = Version::initial("bob", 200);
        b.changelog.clear();
        assert!(b.is_newer_than(&a));
        assert!(a.same_number(&b));
    }

    #[test]
    fn test_version_bump_patch_monotone() {
        let a = Version::initial("alice", 100);
        let b = a.bumped_patch("alice", "moved", 101);
        assert_eq!(b.patch, a.patch + 1);
        assert!(b.key() > a.key());
        assert_eq!(b.changelog.len(), 2);
    }

    #[test]
    fn test_version_distance() {
        let a = Version::initial("a", 0);
        let b = a.bumped_patch("a", "x", 1);
        assert_eq!(a.distance(&b), 1);
        let c = a.bumped_minor("a", "y", 2);
        assert_eq!(a.distance(&c), 100);
    }

    #[test]
    fn test_transition_status_forward_chain() {
        use TransitionStatus::*;
        assert!(Planned.can_transition_to(Initiating));
        assert!(Initiating.can_transition_to(Transferring));
        assert!(Transferring.can_transition_to(Validating));
        assert!(Validating.can_transition_to(Completing));
        assert!(Completing.can_transition_to(Completed));
    }

    #[test]
    fn test_transition_status_no_backward_edges() {
        use TransitionStatus::*;
        assert!(!Completed.can_transition_to(Planned));
        assert!(!Validating.can_transition_to(Transferring));
        assert!(!RolledBack.can_transition_to(Failed));
    }

    #[test]
    fn test_transition_status_rollback_edges() {
        use TransitionStatus::*;
        assert!(Transferring.can_transition_to(RolledBack));
        assert!(Validating.can_transition_to(RolledBack));
        assert!(Completing.can_transition_to(RolledBack));
        assert!(Failed.can_transition_to(RolledBack));
        assert!(Completed.can_transition_to(RolledBack));
        assert!(!Planned.can_transition_to(RolledBack));
        assert!(!RolledBack.can_transition_to(RolledBack));
    }

    #[test]
    fn test_transition_status_terminal() {
        use TransitionStatus::*;
        assert!(Completed.is_terminal());
        assert!(Failed.is_terminal());
        assert!(RolledBack.is_terminal());
        assert!(!Validating.is_terminal());
    }

    #[test]
    fn test_state_status_checksum_rule() {
        assert!(StateStatus::Active.requires_intact_checksum());
        assert!(StateStatus::Synchronized.requires_intact_checksum());
        assert!(!StateStatus::Transitioning.requires_intact_checksum());
        assert!(!StateStatus::Inconsistent.requires_intact_checksum());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_metadata_value_roundtrip() {
        let mut map = BTreeMap::new();
        map.insert("region".to_string(), MetadataValue::Str("eu-1".to_string()));
        map.insert("replicas".to_string(), MetadataValue::Int(3));
        let value = MetadataValue::Map(map);
        let json = serde_json::to_string(&value).unwrap();
        let back: MetadataValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
