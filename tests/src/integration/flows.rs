//! # Integration Test Flows
//!
//! End-to-end flows through the engine API: network setup, transitions,
//! replica synchronization, and split/merge lineage.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use stategrid::{
        EngineConfig, MergePolicy, StateGridApi, StateGridEngine, StatePayload, StateStatus,
        SyncMethod, TransitionContext, TransitionStatus,
    };

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    async fn engine() -> StateGridEngine {
        crate::integration::init_tracing();
        let engine = StateGridEngine::in_memory(EngineConfig::for_testing());
        engine.initialize_network(vec![1, 2, 3]).await.unwrap();
        engine
    }

    fn context() -> TransitionContext {
        TransitionContext {
            timeout: Duration::from_secs(30),
            rollback_enabled: true,
            ..TransitionContext::default()
        }
    }

    // =============================================================================
    // INTEGRATION TESTS: TRANSITION FLOW
    // =============================================================================

    /// Create an object on partition 1 and move it to partition 2: the
    /// record completes, the partition changes, and exactly one patch
    /// version is added.
    #[tokio::test]
    async fn test_transition_round_trip() {
        let engine = engine().await;
        let object = engine
            .create_state(1, StatePayload::json(b"v1".to_vec()), "alice")
            .unwrap();

        let record = engine.transition(object.id, 2, context()).await.unwrap();

        assert_eq!(record.status, TransitionStatus::Completed);
        let result = record.result.expect("completed record carries a result");
        assert!(result.success);
        assert_eq!(result.bytes_moved, 2);

        let moved = engine.store().get(object.id).unwrap();
        assert_eq!(moved.partition, 2);
        assert_eq!(moved.status, StateStatus::Active);
        assert_eq!(moved.version.patch, object.version.patch + 1);
        assert_eq!(moved.version.major, object.version.major);
        assert_eq!(moved.version.minor, object.version.minor);
    }

    /// Progress is observable while a transition is in flight and reads
    /// 100% afterwards.
    #[tokio::test]
    async fn test_progress_during_and_after_execute() {
        let engine = engine().await;
        let object = engine
            .create_state(1, StatePayload::json(vec![0u8; 64 * 1024]), "alice")
            .unwrap();

        let record = engine.transition(object.id, 2, context()).await.unwrap();
        let progress = engine.transitions().progress(record.id).unwrap();
        assert_eq!(progress.fraction, 1.0);
        assert_eq!(progress.eta, Duration::ZERO);
    }

    /// Two transitions on distinct objects run concurrently; both finish.
    #[tokio::test]
    async fn test_parallel_transitions_on_distinct_objects() {
        let engine = Arc::new(engine().await);
        let a = engine
            .create_state(1, StatePayload::json(b"a".to_vec()), "alice")
            .unwrap();
        let b = engine
            .create_state(1, StatePayload::json(b"b".to_vec()), "alice")
            .unwrap();

        let e1 = engine.clone();
        let e2 = engine.clone();
        let (ra, rb) = tokio::join!(
            e1.transition(a.id, 2, context()),
            e2.transition(b.id, 3, context()),
        );

        assert_eq!(ra.unwrap().status, TransitionStatus::Completed);
        assert_eq!(rb.unwrap().status, TransitionStatus::Completed);
        assert_eq!(engine.store().get(a.id).unwrap().partition, 2);
        assert_eq!(engine.store().get(b.id).unwrap().partition, 3);
    }

    // =============================================================================
    // INTEGRATION TESTS: SYNCHRONIZATION FLOW
    // =============================================================================

    /// Synchronizing across partitions materializes replicas and marks
    /// the whole group synchronized.
    #[tokio::test]
    async fn test_synchronize_across_partitions() {
        let engine = engine().await;
        let object = engine
            .create_state(1, StatePayload::json(b"shared".to_vec()), "alice")
            .unwrap();

        let result = engine
            .synchronize_across(object.id, vec![2, 3])
            .await
            .unwrap();

        assert_eq!(result.synchronized.len(), 3);
        assert!(result.conflicts.is_empty());
        for id in &result.synchronized {
            assert_eq!(
                engine.store().get(*id).unwrap().status,
                StateStatus::Synchronized
            );
        }
    }

    /// Version conflict between replicas resolves automatically to the
    /// highest version's payload.
    #[tokio::test]
    async fn test_version_conflict_auto_resolution() {
        let engine = engine().await;
        let store = engine.store().clone();

        // A at 1.0.0 with "x"; B at 1.0.1 with "y".
        let a = store.create(1, StatePayload::json(b"x".to_vec()), "alice").unwrap();
        let b = store.create(2, StatePayload::json(b"x".to_vec()), "alice").unwrap();
        let b = store.update(b.id, StatePayload::json(b"y".to_vec()), "alice").unwrap();

        let result = engine
            .synchronizer()
            .synchronize(&[a.id, b.id], SyncMethod::Immediate)
            .await
            .unwrap();

        assert_eq!(result.conflicts.len(), 1);
        let conflict = &result.conflicts[0];
        assert_eq!(format!("{:?}", conflict.kind), "VersionConflict");

        // A adopted B's payload.
        let merged = store.get(a.id).unwrap();
        assert_eq!(merged.payload.content, b"y");
        assert_eq!(merged.version.patch, b.version.patch);
    }

    /// Synchronizing twice leaves the replica set exactly where one pass
    /// left it.
    #[tokio::test]
    async fn test_synchronize_idempotent() {
        let engine = engine().await;
        let object = engine
            .create_state(1, StatePayload::json(b"v".to_vec()), "alice")
            .unwrap();

        let first = engine
            .synchronize_across(object.id, vec![2])
            .await
            .unwrap();
        let snapshot_after_first: Vec<_> = first
            .synchronized
            .iter()
            .map(|id| engine.store().get(*id).unwrap())
            .collect();

        let second = engine
            .synchronize_across(object.id, vec![2])
            .await
            .unwrap();
        assert_eq!(second.synchronized.len(), first.synchronized.len());
        assert!(second.conflicts.is_empty());

        for before in &snapshot_after_first {
            let after = engine.store().get(before.id).unwrap();
            assert_eq!(after.payload, before.payload);
            assert_eq!(after.version, before.version);
            assert_eq!(after.status, before.status);
        }
    }

    // =============================================================================
    // INTEGRATION TESTS: SPLIT / MERGE LINEAGE
    // =============================================================================

    /// Split then merge: the merged object depends on both children, and
    /// on the parent only when the parent is an input.
    #[tokio::test]
    async fn test_split_merge_lineage() {
        let engine = engine().await;
        let store = engine.store().clone();
        let parent = engine
            .create_state(1, StatePayload::json(b"whole".to_vec()), "alice")
            .unwrap();

        let children = store.split(parent.id, &[2, 3], "alice").unwrap();
        assert_eq!(
            store.get(parent.id).unwrap().status,
            StateStatus::Inconsistent
        );

        let child_ids: Vec<_> = children.iter().map(|c| c.id).collect();
        let merged = store
            .merge(&child_ids, MergePolicy::LastWriterWins, "alice")
            .unwrap();

        assert!(merged.dependencies.contains(&child_ids[0]));
        assert!(merged.dependencies.contains(&child_ids[1]));
        assert!(!merged.dependencies.contains(&parent.id));

        // Children settled at creation, so the parent lineage resolves.
        assert!(store.resolve_split_lineage(parent.id).unwrap());
        assert_eq!(store.get(parent.id).unwrap().status, StateStatus::Active);
    }

    /// Health report rolls up object counts and transition outcomes.
    #[tokio::test]
    async fn test_health_report_rollup() {
        let engine = engine().await;
        let object = engine
            .create_state(1, StatePayload::json(b"v".to_vec()), "alice")
            .unwrap();
        engine.transition(object.id, 2, context()).await.unwrap();
        engine
            .synchronize_across(object.id, vec![3])
            .await
            .unwrap();

        let report = engine.health_report().await;
        assert_eq!(report.transitions_completed, 1);
        assert_eq!(report.transitions_failed, 0);
        assert!(report.total_objects >= 2);
        assert!(report.average_stability > 0.9);
        assert!(!report.recommendations.is_empty());
    }
}
