//! # Stability Scoring & Anomaly Heuristics
//!
//! Pure aggregation over recorded outcomes. Everything here is
//! deterministic arithmetic on history the monitor supplies.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::{Severity, StabilityTrend};

/// Slope below which a trend counts as flat.
const TREND_EPSILON: f64 = 0.02;

/// Assessments considered when classifying a trend.
const TREND_WINDOW: usize = 5;

/// Weights of the stability composite.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct StabilityWeights {
    /// Transition success rate.
    pub transition: f64,
    /// Synchronization success rate.
    pub synchronization: f64,
    /// Conflict freedom.
    pub conflict: f64,
    /// Performance consistency.
    pub performance: f64,
}

impl Default for StabilityWeights {
    fn default() -> Self {
        Self {
            transition: 0.35,
            synchronization: 0.25,
            conflict: 0.20,
            performance: 0.20,
        }
    }
}

/// Component breakdown behind a stability score.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct StabilityComponents {
    /// Fraction of transitions that completed.
    pub transition_success: f64,
    /// Fraction of synchronization passes without failure.
    pub synchronization: f64,
    /// 1 minus the conflict density.
    pub conflict_freedom: f64,
    /// Inverse coefficient of variation of execution durations.
    pub performance_consistency: f64,
}

/// Success fraction over recorded outcomes; no history counts as stable.
pub fn success_rate(outcomes: &[bool]) -> f64 {
    if outcomes.is_empty() {
        return 1.0;
    }
    outcomes.iter().filter(|ok| **ok).count() as f64 / outcomes.len() as f64
}

/// Conflict freedom: 1 minus conflicts per interaction, floored at zero.
pub fn conflict_freedom(conflicts: usize, interactions: usize) -> f64 {
    if interactions == 0 {
        return 1.0;
    }
    (1.0 - conflicts as f64 / interactions as f64).max(0.0)
}

/// Consistency of execution durations: 1 / (1 + coefficient of variation).
pub fn performance_consistency(durations: &[Duration]) -> f64 {
    if durations.len() < 2 {
        return 1.0;
    }
    let samples: Vec<f64> = durations.iter().map(|d| d.as_secs_f64()).collect();
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    if mean == 0.0 {
        return 1.0;
    }
    let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / samples.len() as f64;
    let cv = variance.sqrt() / mean;
    1.0 / (1.0 + cv)
}

/// Weighted composite of the component scores, clamped to [0,1].
pub fn compose(components: &StabilityComponents, weights: &StabilityWeights) -> f64 {
    let total = weights.transition + weights.synchronization + weights.conflict + weights.performance;
    if total == 0.0 {
        return 1.0;
    }
    let score = (components.transition_success * weights.transition
        + components.synchronization * weights.synchronization
        + components.conflict_freedom * weights.conflict
        + components.performance_consistency * weights.performance)
        / total;
    score.clamp(0.0, 1.0)
}

/// Classify the trend of a score series, newest last.
pub fn classify_trend(scores: &[f64], critical_threshold: f64) -> StabilityTrend {
    let Some(latest) = scores.last() else {
        return StabilityTrend::Stable;
    };
    if *latest < critical_threshold {
        return StabilityTrend::Critical;
    }
    let window: Vec<f64> = scores.iter().rev().take(TREND_WINDOW).rev().copied().collect();
    if window.len() < 2 {
        return StabilityTrend::Stable;
    }
    let slope = (window[window.len() - 1] - window[0]) / (window.len() - 1) as f64;
    if slope > TREND_EPSILON {
        StabilityTrend::Improving
    } else if slope < -TREND_EPSILON {
        StabilityTrend::Degrading
    } else {
        StabilityTrend::Stable
    }
}

/// Kinds of anomaly the heuristics detect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyKind {
    /// Several transition failures inside the window.
    TransitionFailureSpike,
    /// Synchronization latency well above its baseline.
    SyncDelaySpike,
    /// Checksum mismatch signatures observed.
    DataCorruption,
    /// Writes attempted by principals without access.
    AccessViolation,
}

/// A detected anomaly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Anomaly {
    /// Classification.
    pub kind: AnomalyKind,
    /// Severity.
    pub severity: Severity,
    /// Detection timestamp.
    pub detected_at: u64,
    /// What was observed.
    pub detail: String,
}

/// Failure spike: at least `min_count` failures within `window_secs` of
/// `now`.
pub fn detect_failure_spike(
    failure_timestamps: &[u64],
    window_secs: u64,
    min_count: usize,
    now: u64,
) -> Option<Anomaly> {
    let cutoff = now.saturating_sub(window_secs);
    let recent = failure_timestamps.iter().filter(|at| **at >= cutoff).count();
    if recent >= min_count {
        Some(Anomaly {
            kind: AnomalyKind::TransitionFailureSpike,
            severity: if recent >= min_count * 2 { Severity::High } else { Severity::Medium },
            detected_at: now,
            detail: format!("{} transition failures in the last {}s", recent, window_secs),
        })
    } else {
        None
    }
}

/// Delay spike: newest latency more than `factor` times the median.
pub fn detect_sync_delay_spike(latencies: &[Duration], factor: f64, now: u64) -> Option<Anomaly> {
    if latencies.len() < 4 {
        return None;
    }
    let mut samples: Vec<f64> = latencies.iter().map(|d| d.as_secs_f64()).collect();
    let newest = *samples.last()?;
    samples.sort_by(|a, b| a.total_cmp(b));
    let median = samples[samples.len() / 2];
    if median > 0.0 && newest > median * factor {
        Some(Anomaly {
            kind: AnomalyKind::SyncDelaySpike,
            severity: Severity::Medium,
            detected_at: now,
            detail: format!(
                "latest synchronization took {:.3}s against a {:.3}s median",
                newest, median
            ),
        })
    } else {
        None
    }
}

/// Corruption signature: any recorded checksum mismatch is high severity.
pub fn detect_corruption(signatures: &[u64], now: u64) -> Option<Anomaly> {
    let count = signatures.len();
    if count == 0 {
        return None;
    }
    Some(Anomaly {
        kind: AnomalyKind::DataCorruption,
        severity: Severity::High,
        detected_at: now,
        detail: format!("{} checksum mismatch signature(s) recorded", count),
    })
}

/// Access-violation attempts become anomalies verbatim.
pub fn detect_access_violations(attempts: &[(u64, String)], now: u64) -> Option<Anomaly> {
    if attempts.is_empty() {
        return None;
    }
    Some(Anomaly {
        kind: AnomalyKind::AccessViolation,
        severity: Severity::High,
        detected_at: now,
        detail: format!(
            "{} write attempt(s) by principals without access, last by {}",
            attempts.len(),
            attempts.last().map(|(_, who)| who.as_str()).unwrap_or("?")
        ),
    })
}
