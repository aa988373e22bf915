//! # Consistency, Drift & Monitoring Flows
//!
//! Replica drift detection, critical conflict surfacing, consistency
//! scoring, and the background monitoring sweep.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use stategrid::{
        DriftDirection, EngineConfig, EngineError, InMemoryPayloadStore, LoopbackTransport,
        RecordingAuditSink, StateGridApi, StateGridEngine, StatePayload, StateStatus, Severity,
        SyncMethod, TransitionContext,
    };

    async fn engine() -> StateGridEngine {
        let engine = StateGridEngine::in_memory(EngineConfig::for_testing());
        engine.initialize_network(vec![1, 2, 3]).await.unwrap();
        engine
    }

    /// Identical replicas report no drift.
    #[tokio::test]
    async fn test_no_drift_on_identical_replicas() {
        let engine = engine().await;
        let object = engine
            .create_state(1, StatePayload::json(b"v".to_vec()), "alice")
            .unwrap();
        let replica = engine.store().create_replica(object.id, 2).unwrap();

        let report = engine
            .synchronizer()
            .detect_drift(&[object.id, replica.id])
            .unwrap();
        assert!(!report.drift_detected);
        assert_eq!(report.magnitude, 0.0);
        assert_eq!(report.direction, DriftDirection::Stable);
    }

    /// Updates on one replica register as divergence; synchronization
    /// then converges the group.
    #[tokio::test]
    async fn test_drift_diverges_then_converges() {
        let engine = engine().await;
        let object = engine
            .create_state(1, StatePayload::json(b"v1".to_vec()), "alice")
            .unwrap();
        let replica = engine.store().create_replica(object.id, 2).unwrap();
        let group = [object.id, replica.id];

        engine
            .store()
            .update(object.id, StatePayload::json(b"v2".to_vec()), "alice")
            .unwrap();
        let diverged = engine.synchronizer().detect_drift(&group).unwrap();
        assert!(diverged.drift_detected);
        assert_eq!(diverged.direction, DriftDirection::Diverging);
        assert!(diverged.version_spread >= 1);

        engine
            .synchronizer()
            .synchronize(&group, SyncMethod::Batched)
            .await
            .unwrap();
        let settled = engine.synchronizer().detect_drift(&group).unwrap();
        assert!(!settled.drift_detected);
        assert_eq!(settled.direction, DriftDirection::Converging);
    }

    /// Same version number with different bytes is critical: the engine
    /// refuses to auto-resolve and surfaces ConflictUnresolved.
    #[tokio::test]
    async fn test_critical_conflict_requires_caller_decision() {
        let engine = engine().await;
        let store = engine.store().clone();
        let a = store.create(1, StatePayload::json(b"left".to_vec()), "alice").unwrap();
        let b = store.create(2, StatePayload::json(b"right".to_vec()), "alice").unwrap();

        let result = engine
            .synchronizer()
            .synchronize(&[a.id, b.id], SyncMethod::Immediate)
            .await
            .unwrap();
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].severity, Severity::Critical);
        assert!(result.synchronized.is_empty());

        // Neither payload was touched; both replicas are flagged.
        assert_eq!(store.get(a.id).unwrap().payload.content, b"left");
        assert_eq!(store.get(b.id).unwrap().payload.content, b"right");
        assert_eq!(store.get(a.id).unwrap().status, StateStatus::Inconsistent);
    }

    /// Consistency score counts settled objects and lists violations for
    /// drifted replicas.
    #[tokio::test]
    async fn test_maintain_consistency_scoring() {
        let engine = engine().await;
        let object = engine
            .create_state(1, StatePayload::json(b"v".to_vec()), "alice")
            .unwrap();
        let replica = engine.store().create_replica(object.id, 2).unwrap();

        let clean = engine
            .synchronizer()
            .maintain_consistency(&[object.id, replica.id])
            .unwrap();
        assert_eq!(clean.score, 1.0);
        assert!(clean.violations.is_empty());

        engine
            .store()
            .update(replica.id, StatePayload::json(b"v9".to_vec()), "alice")
            .unwrap();
        let drifted = engine
            .synchronizer()
            .maintain_consistency(&[object.id, replica.id])
            .unwrap();
        assert!(!drifted.violations.is_empty());
    }

    /// The background loop sweeps without disturbing foreground calls and
    /// shuts down cleanly.
    #[tokio::test]
    async fn test_monitoring_loop_alongside_foreground_work() {
        let transport = Arc::new(LoopbackTransport::new());
        let audit = Arc::new(RecordingAuditSink::new());
        let engine = StateGridEngine::new(
            EngineConfig::for_testing(),
            Arc::new(InMemoryPayloadStore::new()),
            transport,
            audit,
        );
        engine.initialize_network(vec![1, 2]).await.unwrap();
        engine.start();

        let object = engine
            .create_state(1, StatePayload::json(b"v".to_vec()), "alice")
            .unwrap();
        let ctx = TransitionContext {
            timeout: Duration::from_secs(30),
            ..TransitionContext::default()
        };
        let record = engine.transition(object.id, 2, ctx).await.unwrap();
        assert!(record.result.unwrap().success);

        // Let the 50ms loop tick a few times over live state.
        tokio::time::sleep(Duration::from_millis(150)).await;
        engine.shutdown().await;

        let report = engine.health_report().await;
        assert_eq!(report.transitions_completed, 1);
        assert!(report.average_stability > 0.9);
    }

    /// Synchronization against an unknown object id fails cleanly.
    #[tokio::test]
    async fn test_unknown_object_synchronization() {
        let engine = engine().await;
        let ghost = uuid::Uuid::new_v4();
        let result = engine.synchronize_across(ghost, vec![2]).await;
        assert!(matches!(result, Err(EngineError::UnknownObject(_))));
    }

    /// Stability assessments accumulate and trend toward stable for a
    /// healthy object.
    #[tokio::test]
    async fn test_stability_assessments_accumulate() {
        let engine = engine().await;
        let object = engine
            .create_state(1, StatePayload::json(b"v".to_vec()), "alice")
            .unwrap();

        for _ in 0..5 {
            let assessment = engine.monitor().stability(object.id).unwrap();
            assert!(assessment.score > 0.9);
        }
        let assessment = engine.monitor().stability(object.id).unwrap();
        assert_eq!(
            format!("{:?}", assessment.trend),
            "Stable"
        );
    }
}
