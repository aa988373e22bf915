//! # Monitor
//!
//! Read-mostly observation of every tracked object: stability scoring,
//! anomaly detection, performance measurement, alerting, and the periodic
//! rollup report. All numbers come from recorded history and real
//! timings, never simulation.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::algorithms::stability::{
    self, Anomaly, StabilityComponents, StabilityWeights,
};
use crate::domain::{
    unix_now, EngineError, ResourceRequirements, StabilityTrend, StateStatus,
    TransitionErrorKind, TransitionStatus,
};
use crate::store::StateStore;
use crate::sync::Synchronizer;
use crate::transition::TransitionManager;

/// Stability score history retained per object.
const ASSESSMENT_DEPTH: usize = 20;

/// Window for failure-spike detection, in seconds.
const FAILURE_WINDOW_SECS: u64 = 3600;

/// Failures within the window that count as a spike.
const FAILURE_SPIKE_COUNT: usize = 3;

/// Latency factor over the median that counts as a delay spike.
const DELAY_SPIKE_FACTOR: f64 = 3.0;

/// One stability assessment of an object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StabilityAssessment {
    /// Object assessed.
    pub object_id: Uuid,
    /// Composite score in [0,1].
    pub score: f64,
    /// Component breakdown.
    pub components: StabilityComponents,
    /// Trend over recent assessments.
    pub trend: StabilityTrend,
}

/// Performance snapshot of an object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Operations (transitions + synchronizations) per minute.
    pub throughput_per_min: f64,
    /// Mean operation latency.
    pub avg_latency: Duration,
    /// Failed fraction of recorded operations.
    pub error_rate: f64,
    /// Availability in [0,1], derived from status and error rate.
    pub availability: f64,
    /// Payload footprint against the storage ceiling, in [0,1].
    pub resource_utilization: f64,
}

/// Alert level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertLevel {
    /// Stability below the warning threshold.
    Warning,
    /// Stability below the critical threshold.
    Critical,
}

/// An alert raised for one object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Alert {
    /// Object the alert concerns.
    pub object_id: Uuid,
    /// Level.
    pub level: AlertLevel,
    /// What happened.
    pub message: String,
    /// Suggested remediation.
    pub remediation: String,
    /// When the alert was raised.
    pub raised_at: u64,
}

/// Periodic rollup over the whole registry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateHealthReport {
    /// Report timestamp.
    pub generated_at: u64,
    /// Objects tracked.
    pub total_objects: usize,
    /// Objects in `Active` or `Synchronized`.
    pub active_objects: usize,
    /// Objects currently transitioning.
    pub transitioning_objects: usize,
    /// Transitions that completed.
    pub transitions_completed: usize,
    /// Transitions that failed or rolled back.
    pub transitions_failed: usize,
    /// Mean duration of completed transitions.
    pub avg_transition_duration: Duration,
    /// Mean stability score across objects.
    pub average_stability: f64,
    /// Anomalies currently detected.
    pub anomaly_count: usize,
    /// Free-text operator recommendations.
    pub recommendations: Vec<String>,
}

/// Observes stability, anomalies, and performance for every object.
pub struct Monitor {
    store: Arc<StateStore>,
    transitions: Arc<TransitionManager>,
    synchronizer: Arc<Synchronizer>,
    weights: StabilityWeights,
    warning_threshold: f64,
    critical_threshold: f64,
    ceilings: ResourceRequirements,
    /// Stability score history per object, newest last.
    assessments: RwLock<HashMap<Uuid, Vec<f64>>>,
}

impl Monitor {
    /// Create a monitor over the given components.
    pub fn new(
        store: Arc<StateStore>,
        transitions: Arc<TransitionManager>,
        synchronizer: Arc<Synchronizer>,
        warning_threshold: f64,
        critical_threshold: f64,
        ceilings: ResourceRequirements,
    ) -> Self {
        Self {
            store,
            transitions,
            synchronizer,
            weights: StabilityWeights::default(),
            warning_threshold,
            critical_threshold,
            ceilings,
            assessments: RwLock::new(HashMap::new()),
        }
    }

    /// Assess an object's stability and record the score.
    pub fn stability(&self, object_id: Uuid) -> Result<StabilityAssessment, EngineError> {
        if !self.store.contains(object_id) {
            return Err(EngineError::UnknownObject(object_id));
        }
        let outcomes = self.transitions.outcome_history(object_id);
        let syncs = self.synchronizer.sync_history(object_id);
        let conflicts = self.synchronizer.conflict_history(object_id);

        let transition_oks: Vec<bool> = outcomes.iter().map(|(_, ok, _)| *ok).collect();
        let sync_oks: Vec<bool> = syncs.iter().map(|(_, ok, _)| *ok).collect();
        let durations: Vec<Duration> = outcomes.iter().map(|(_, _, d)| *d).collect();
        let interactions = outcomes.len() + syncs.len();

        let components = StabilityComponents {
            transition_success: stability::success_rate(&transition_oks),
            synchronization: stability::success_rate(&sync_oks),
            conflict_freedom: stability::conflict_freedom(conflicts.len(), interactions),
            performance_consistency: stability::performance_consistency(&durations),
        };
        let score = stability::compose(&components, &self.weights);

        let trend = {
            let mut assessments = self.assessments.write();
            let history = assessments.entry(object_id).or_default();
            history.push(score);
            if history.len() > ASSESSMENT_DEPTH {
                let excess = history.len() - ASSESSMENT_DEPTH;
                history.drain(..excess);
            }
            stability::classify_trend(history, self.critical_threshold)
        };

        Ok(StabilityAssessment {
            object_id,
            score,
            components,
            trend,
        })
    }

    /// Run the anomaly heuristics over an object's recorded history.
    pub fn anomalies(&self, object_id: Uuid) -> Result<Vec<Anomaly>, EngineError> {
        let object = self.store.get(object_id)?;
        let now = unix_now();
        let records = self.transitions.records_for_object(object_id);
        let mut found = Vec::new();

        let failure_times: Vec<u64> = records
            .iter()
            .filter(|r| {
                matches!(
                    r.status,
                    TransitionStatus::Failed | TransitionStatus::RolledBack
                ) && r.result.as_ref().map(|res| !res.success).unwrap_or(false)
            })
            .filter_map(|r| r.completed_at)
            .collect();
        if let Some(anomaly) =
            stability::detect_failure_spike(&failure_times, FAILURE_WINDOW_SECS, FAILURE_SPIKE_COUNT, now)
        {
            found.push(anomaly);
        }

        let latencies: Vec<Duration> = self
            .synchronizer
            .sync_history(object_id)
            .iter()
            .map(|(_, _, latency)| *latency)
            .collect();
        if let Some(anomaly) = stability::detect_sync_delay_spike(&latencies, DELAY_SPIKE_FACTOR, now) {
            found.push(anomaly);
        }

        let mut corruption_times: Vec<u64> = records
            .iter()
            .filter(|r| {
                r.result
                    .as_ref()
                    .map(|res| {
                        res.errors
                            .iter()
                            .any(|e| e.kind == TransitionErrorKind::DataCorruption)
                    })
                    .unwrap_or(false)
            })
            .filter_map(|r| r.completed_at)
            .collect();
        if !object.payload.is_intact() {
            corruption_times.push(now);
        }
        if let Some(anomaly) = stability::detect_corruption(&corruption_times, now) {
            found.push(anomaly);
        }

        let violations: Vec<(u64, String)> = records
            .iter()
            .filter_map(|r| {
                let result = r.result.as_ref()?;
                let denied = result.errors.iter().find(|e| {
                    e.kind == TransitionErrorKind::ValidationFailure
                        && e.message.contains("lacks write access")
                })?;
                let actor = denied
                    .message
                    .split_whitespace()
                    .next()
                    .unwrap_or("unknown")
                    .to_string();
                Some((r.completed_at.unwrap_or(0), actor))
            })
            .collect();
        if let Some(anomaly) = stability::detect_access_violations(&violations, now) {
            found.push(anomaly);
        }

        Ok(found)
    }

    /// Measure an object's performance from recorded operations.
    pub fn performance(&self, object_id: Uuid) -> Result<PerformanceMetrics, EngineError> {
        let object = self.store.get(object_id)?;
        let outcomes = self.transitions.outcome_history(object_id);
        let syncs = self.synchronizer.sync_history(object_id);

        let timestamps: Vec<u64> = outcomes
            .iter()
            .map(|(at, _, _)| *at)
            .chain(syncs.iter().map(|(at, _, _)| *at))
            .collect();
        let total_ops = timestamps.len();

        let throughput_per_min = if total_ops < 2 {
            total_ops as f64
        } else {
            let newest = timestamps.iter().max().copied().unwrap_or(0);
            let oldest = timestamps.iter().min().copied().unwrap_or(0);
            let span_secs = (newest - oldest).max(1) as f64;
            total_ops as f64 * 60.0 / span_secs
        };

        let durations: Vec<Duration> = outcomes
            .iter()
            .map(|(_, _, d)| *d)
            .chain(syncs.iter().map(|(_, _, d)| *d))
            .collect();
        let avg_latency = if durations.is_empty() {
            Duration::ZERO
        } else {
            durations.iter().sum::<Duration>() / durations.len() as u32
        };

        let failures = outcomes.iter().filter(|(_, ok, _)| !ok).count()
            + syncs.iter().filter(|(_, ok, _)| !ok).count();
        let error_rate = if total_ops == 0 {
            0.0
        } else {
            failures as f64 / total_ops as f64
        };

        let status_factor = match object.status {
            StateStatus::Active | StateStatus::Synchronized => 1.0,
            StateStatus::Transitioning => 0.9,
            StateStatus::Inconsistent => 0.5,
            StateStatus::Error => 0.0,
        };
        let availability = status_factor * (1.0 - error_rate / 2.0);

        let resource_utilization = if self.ceilings.storage_bytes == 0 {
            1.0
        } else {
            (object.payload.size_bytes as f64 / self.ceilings.storage_bytes as f64).min(1.0)
        };

        Ok(PerformanceMetrics {
            throughput_per_min,
            avg_latency,
            error_rate,
            availability,
            resource_utilization,
        })
    }

    /// Alerts for an object, based on its current stability.
    pub fn alerts(&self, object_id: Uuid) -> Result<Vec<Alert>, EngineError> {
        let assessment = self.stability(object_id)?;
        let now = unix_now();
        let mut alerts = Vec::new();

        if assessment.score < self.critical_threshold {
            alerts.push(Alert {
                object_id,
                level: AlertLevel::Critical,
                message: format!(
                    "stability {:.2} below critical threshold {:.2}",
                    assessment.score, self.critical_threshold
                ),
                remediation: "halt transitions for this object and resolve outstanding \
                              conflicts before retrying"
                    .to_string(),
                raised_at: now,
            });
        } else if assessment.score < self.warning_threshold {
            alerts.push(Alert {
                object_id,
                level: AlertLevel::Warning,
                message: format!(
                    "stability {:.2} below warning threshold {:.2}",
                    assessment.score, self.warning_threshold
                ),
                remediation: "review recent transition failures and synchronize replicas"
                    .to_string(),
                raised_at: now,
            });
        }

        for alert in &alerts {
            warn!(
                "[stategrid] {:?} alert for {}: {}",
                alert.level, object_id, alert.message
            );
        }
        Ok(alerts)
    }

    /// Rollup over the whole registry.
    pub fn report(&self) -> StateHealthReport {
        let objects = self.store.snapshot();
        let records = self.transitions.all_records();

        let active_objects = objects.iter().filter(|o| o.status.is_consistent()).count();
        let transitioning_objects = objects
            .iter()
            .filter(|o| o.status == StateStatus::Transitioning)
            .count();

        let completed: Vec<_> = records
            .iter()
            .filter(|r| r.status == TransitionStatus::Completed)
            .collect();
        let failed = records
            .iter()
            .filter(|r| {
                matches!(
                    r.status,
                    TransitionStatus::Failed | TransitionStatus::RolledBack
                )
            })
            .count();
        let avg_transition_duration = if completed.is_empty() {
            Duration::ZERO
        } else {
            completed
                .iter()
                .filter_map(|r| r.result.as_ref().map(|res| res.duration))
                .sum::<Duration>()
                / completed.len() as u32
        };

        let mut stability_total = 0.0;
        let mut anomaly_count = 0;
        for object in &objects {
            if let Ok(assessment) = self.stability(object.id) {
                stability_total += assessment.score;
            }
            if let Ok(anomalies) = self.anomalies(object.id) {
                anomaly_count += anomalies.len();
            }
        }
        let average_stability = if objects.is_empty() {
            1.0
        } else {
            stability_total / objects.len() as f64
        };

        let mut recommendations = Vec::new();
        if failed > completed.len() {
            recommendations.push(
                "transition failures outnumber successes; check partition transport health"
                    .to_string(),
            );
        }
        if objects
            .iter()
            .any(|o| o.status == StateStatus::Inconsistent)
        {
            recommendations.push(
                "inconsistent objects present; run synchronization across their replicas"
                    .to_string(),
            );
        }
        if average_stability < self.warning_threshold {
            recommendations.push(
                "average stability below the warning threshold; reduce transition load"
                    .to_string(),
            );
        }
        if recommendations.is_empty() {
            recommendations.push("all tracked objects within normal parameters".to_string());
        }

        StateHealthReport {
            generated_at: unix_now(),
            total_objects: objects.len(),
            active_objects,
            transitioning_objects,
            transitions_completed: completed.len(),
            transitions_failed: failed,
            avg_transition_duration,
            average_stability,
            anomaly_count,
            recommendations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{FailureMode, InMemoryPayloadStore, LoopbackTransport, RecordingAuditSink};
    use crate::domain::{
        ContentionPolicy, StatePayload, SyncMethod, TransitionContext,
    };

    struct Fixture {
        store: Arc<StateStore>,
        transitions: Arc<TransitionManager>,
        sync: Arc<Synchronizer>,
        transport: Arc<LoopbackTransport>,
        monitor: Monitor,
    }

    fn big_ceilings() -> ResourceRequirements {
        ResourceRequirements {
            cpu_millis: u64::MAX,
            memory_bytes: u64::MAX,
            storage_bytes: 1024 * 1024,
            bandwidth_bytes: u64::MAX,
        }
    }

    fn fixture() -> Fixture {
        let store = Arc::new(StateStore::new());
        let transport = Arc::new(LoopbackTransport::new());
        let audit = Arc::new(RecordingAuditSink::new());
        let transitions = Arc::new(TransitionManager::new(
            store.clone(),
            Arc::new(InMemoryPayloadStore::new()),
            transport.clone(),
            audit.clone(),
            big_ceilings(),
            1024,
            2,
        ));
        let sync = Arc::new(Synchronizer::new(
            store.clone(),
            transitions.clone(),
            transport.clone(),
            audit,
            ContentionPolicy::Block,
            2,
        ));
        let monitor = Monitor::new(
            store.clone(),
            transitions.clone(),
            sync.clone(),
            0.8,
            0.5,
            big_ceilings(),
        );
        Fixture {
            store,
            transitions,
            sync,
            transport,
            monitor,
        }
    }

    fn context() -> TransitionContext {
        TransitionContext {
            timeout: Duration::from_secs(10),
            ..TransitionContext::for_testing()
        }
    }

    #[tokio::test]
    async fn test_stability_fresh_object_is_perfect() {
        let f = fixture();
        let object = f.store.create(1, StatePayload::json(b"v".to_vec()), "a").unwrap();
        let assessment = f.monitor.stability(object.id).unwrap();
        assert!((assessment.score - 1.0).abs() < 1e-9);
        assert_eq!(assessment.trend, StabilityTrend::Stable);
    }

    #[tokio::test]
    async fn test_stability_degrades_with_failures() {
        let f = fixture();
        f.transport.fail_partition(2, FailureMode::Permanent);
        let object = f.store.create(1, StatePayload::json(b"v".to_vec()), "a").unwrap();

        for _ in 0..2 {
            let plan = f.transitions.plan(object.id, 2, &context(), &[]).unwrap();
            let _ = f.transitions.execute(&plan, context()).await;
        }

        let assessment = f.monitor.stability(object.id).unwrap();
        assert!(assessment.score < 1.0);
        assert!(assessment.components.transition_success < 1.0);
    }

    #[tokio::test]
    async fn test_anomaly_failure_spike() {
        let f = fixture();
        f.transport.fail_partition(2, FailureMode::Permanent);
        let object = f.store.create(1, StatePayload::json(b"v".to_vec()), "a").unwrap();

        for _ in 0..3 {
            let plan = f.transitions.plan(object.id, 2, &context(), &[]).unwrap();
            let _ = f.transitions.execute(&plan, context()).await;
        }

        let anomalies = f.monitor.anomalies(object.id).unwrap();
        assert!(anomalies
            .iter()
            .any(|a| a.kind == stability::AnomalyKind::TransitionFailureSpike));
    }

    #[tokio::test]
    async fn test_clean_object_has_no_anomalies() {
        let f = fixture();
        let object = f.store.create(1, StatePayload::json(b"v".to_vec()), "a").unwrap();
        assert!(f.monitor.anomalies(object.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_performance_metrics_after_transitions() {
        let f = fixture();
        let object = f.store.create(1, StatePayload::json(b"v".to_vec()), "a").unwrap();
        let plan = f.transitions.plan(object.id, 2, &context(), &[]).unwrap();
        f.transitions.execute(&plan, context()).await.unwrap();

        let metrics = f.monitor.performance(object.id).unwrap();
        assert_eq!(metrics.error_rate, 0.0);
        assert!(metrics.availability > 0.9);
        assert!(metrics.throughput_per_min > 0.0);
        assert!(metrics.resource_utilization > 0.0);
    }

    #[tokio::test]
    async fn test_alerts_on_low_stability() {
        let f = fixture();
        f.transport.fail_partition(2, FailureMode::Permanent);
        let object = f.store.create(1, StatePayload::json(b"v".to_vec()), "a").unwrap();

        // Repeated failures drag the transition component to zero.
        for _ in 0..4 {
            let plan = f.transitions.plan(object.id, 2, &context(), &[]).unwrap();
            let _ = f.transitions.execute(&plan, context()).await;
        }

        let alerts = f.monitor.alerts(object.id).unwrap();
        assert!(!alerts.is_empty());
        assert!(alerts[0].remediation.len() > 10);
    }

    #[tokio::test]
    async fn test_report_rollup() {
        let f = fixture();
        let a = f.store.create(1, StatePayload::json(b"a".to_vec()), "x").unwrap();
        let b = f.store.create(1, StatePayload::json(b"a".to_vec()), "x").unwrap();
        let replica = f.store.create_replica(b.id, 2).unwrap();

        let plan = f.transitions.plan(a.id, 2, &context(), &[]).unwrap();
        f.transitions.execute(&plan, context()).await.unwrap();
        f.sync
            .synchronize(&[b.id, replica.id], SyncMethod::Immediate)
            .await
            .unwrap();

        let report = f.monitor.report();
        assert_eq!(report.total_objects, 3);
        assert_eq!(report.active_objects, 3);
        assert_eq!(report.transitions_completed, 1);
        assert_eq!(report.transitions_failed, 0);
        assert!(report.average_stability > 0.9);
        assert!(!report.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_object_rejected() {
        let f = fixture();
        assert!(f.monitor.stability(Uuid::new_v4()).is_err());
        assert!(f.monitor.performance(Uuid::new_v4()).is_err());
    }
}
