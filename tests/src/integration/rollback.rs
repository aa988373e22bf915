//! # Rollback & Failure Flows
//!
//! Timeout handling, transport failure, automatic rollback, and the
//! rollback round-trip law.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use stategrid::{
        EngineConfig, EngineError, FailureMode, InMemoryPayloadStore, LoopbackTransport,
        RecordingAuditSink, StateGridApi, StateGridEngine, StatePayload, StateStatus,
        TransitionContext, TransitionStatus,
    };

    struct Fixture {
        engine: StateGridEngine,
        transport: Arc<LoopbackTransport>,
        audit: Arc<RecordingAuditSink>,
    }

    async fn fixture() -> Fixture {
        crate::integration::init_tracing();
        let transport = Arc::new(LoopbackTransport::new());
        let audit = Arc::new(RecordingAuditSink::new());
        let engine = StateGridEngine::new(
            EngineConfig::for_testing(),
            Arc::new(InMemoryPayloadStore::new()),
            transport.clone(),
            audit.clone(),
        );
        engine.initialize_network(vec![1, 2, 3]).await.unwrap();
        Fixture {
            engine,
            transport,
            audit,
        }
    }

    fn context() -> TransitionContext {
        TransitionContext {
            timeout: Duration::from_secs(30),
            rollback_enabled: true,
            audit_required: true,
            ..TransitionContext::default()
        }
    }

    /// A deadline the plan cannot fit fails with Timeout, and with
    /// rollback enabled the source object ends Active, not Transitioning.
    #[tokio::test]
    async fn test_timeout_returns_object_to_active() {
        let f = fixture().await;
        let object = f
            .engine
            .create_state(1, StatePayload::json(b"v".to_vec()), "alice")
            .unwrap();

        let ctx = TransitionContext {
            timeout: Duration::from_millis(1),
            ..context()
        };
        let error = f.engine.transition(object.id, 2, ctx).await.unwrap_err();
        assert!(matches!(error, EngineError::Timeout(_)));

        let untouched = f.engine.store().get(object.id).unwrap();
        assert_eq!(untouched.status, StateStatus::Active);
        assert_eq!(untouched.partition, 1);
        assert_eq!(untouched.version, object.version);
    }

    /// An unreachable target partition triggers automatic rollback; the
    /// source keeps its payload, version, and partition.
    #[tokio::test]
    async fn test_transport_failure_auto_rollback() {
        let f = fixture().await;
        f.transport.fail_partition(2, FailureMode::Permanent);
        let object = f
            .engine
            .create_state(1, StatePayload::json(b"precious".to_vec()), "alice")
            .unwrap();

        let error = f.engine.transition(object.id, 2, context()).await.unwrap_err();
        assert!(matches!(error, EngineError::NetworkFailure(_)));

        let restored = f.engine.store().get(object.id).unwrap();
        assert_eq!(restored.payload.content, b"precious");
        assert_eq!(restored.version, object.version);
        assert_eq!(restored.partition, 1);
        assert_eq!(restored.status, StateStatus::Active);

        let records = f.engine.transitions().records_for_object(object.id);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TransitionStatus::RolledBack);
    }

    /// Rollback after a completed transition restores the pre-transition
    /// payload and version, and a second rollback is a no-op.
    #[tokio::test]
    async fn test_rollback_round_trip_and_idempotence() {
        let f = fixture().await;
        let object = f
            .engine
            .create_state(1, StatePayload::json(b"original".to_vec()), "alice")
            .unwrap();

        let record = f.engine.transition(object.id, 2, context()).await.unwrap();
        assert_eq!(record.status, TransitionStatus::Completed);
        assert_eq!(f.engine.store().get(object.id).unwrap().partition, 2);

        let first = f.engine.transitions().rollback(record.id).await.unwrap();
        assert_eq!(first.status, TransitionStatus::RolledBack);

        let restored = f.engine.store().get(object.id).unwrap();
        assert_eq!(restored.payload.content, b"original");
        assert_eq!(restored.version, object.version);
        assert_eq!(restored.partition, 1);

        // Idempotence: a second rollback changes nothing.
        let second = f.engine.transitions().rollback(record.id).await.unwrap();
        assert_eq!(second.status, TransitionStatus::RolledBack);
        let still = f.engine.store().get(object.id).unwrap();
        assert_eq!(still.payload.content, b"original");
        assert_eq!(still.version, object.version);
    }

    /// With rollback disabled, a failed transition is left for manual
    /// intervention and the object is flagged.
    #[tokio::test]
    async fn test_failure_without_rollback_needs_manual_intervention() {
        let f = fixture().await;
        f.transport.fail_partition(2, FailureMode::Permanent);
        let object = f
            .engine
            .create_state(1, StatePayload::json(b"v".to_vec()), "alice")
            .unwrap();

        let ctx = TransitionContext {
            rollback_enabled: false,
            ..context()
        };
        assert!(f.engine.transition(object.id, 2, ctx).await.is_err());

        let records = f.engine.transitions().records_for_object(object.id);
        assert_eq!(records[0].status, TransitionStatus::Failed);
        let result = records[0].result.as_ref().unwrap();
        assert!(!result.success);
        assert!(!result.errors.is_empty());
        assert!(result.errors[0].recoverable);

        assert_eq!(f.engine.store().get(object.id).unwrap().status, StateStatus::Error);
    }

    /// While a transition is in flight its object id is exclusive: a
    /// second execute fails fast with StateBusy, and progress stays
    /// readable the whole time.
    #[tokio::test]
    async fn test_mutual_exclusion_per_object() {
        let f = fixture().await;
        let object = f
            .engine
            .create_state(1, StatePayload::json(b"v".to_vec()), "alice")
            .unwrap();

        // Delivery latency keeps the first execute in flight long enough
        // for the contender to observe it.
        f.transport.set_latency(2, Duration::from_millis(150));

        let manager = f.engine.transitions().clone();
        let plan_a = manager.plan(object.id, 2, &context(), &[]).unwrap();
        let plan_b = manager.plan(object.id, 3, &context(), &[]).unwrap();

        let winner = manager.clone();
        let in_flight = tokio::spawn(async move { winner.execute(&plan_a, context()).await });
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(manager.is_in_flight(object.id));
        let error = manager.execute(&plan_b, context()).await.unwrap_err();
        assert!(matches!(error, EngineError::StateBusy(_)));

        let record = in_flight.await.unwrap().unwrap();
        assert_eq!(record.status, TransitionStatus::Completed);
        assert_eq!(f.engine.store().get(object.id).unwrap().partition, 2);
    }

    /// Audit trail covers the full lifecycle of a rolled-back transition.
    #[tokio::test]
    async fn test_audit_trail_for_rollback() {
        let f = fixture().await;
        f.transport.fail_partition(2, FailureMode::Permanent);
        let object = f
            .engine
            .create_state(1, StatePayload::json(b"v".to_vec()), "alice")
            .unwrap();
        let _ = f.engine.transition(object.id, 2, context()).await;

        let events = f.audit.events();
        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                stategrid::AuditEvent::TransitionStarted { .. } => "started",
                stategrid::AuditEvent::TransitionFailed { .. } => "failed",
                stategrid::AuditEvent::TransitionRolledBack { .. } => "rolled_back",
                _ => "other",
            })
            .collect();
        assert!(kinds.contains(&"started"));
        assert!(kinds.contains(&"failed"));
        assert!(kinds.contains(&"rolled_back"));
    }
}
