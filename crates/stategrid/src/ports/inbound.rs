//! # Inbound Port
//!
//! The public API trait of the engine.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{
    EngineError, PartitionId, StateTransition, SynchronizationNetwork, TransitionContext,
};
use crate::monitor::StateHealthReport;
use crate::sync::SynchronizationResult;

/// State engine API - inbound port.
#[async_trait]
pub trait StateGridApi: Send + Sync {
    /// Create the partition network. Called once at startup; a second
    /// call replaces the network only if no objects are registered yet.
    async fn initialize_network(
        &self,
        partitions: Vec<PartitionId>,
    ) -> Result<SynchronizationNetwork, EngineError>;

    /// Plan and execute the move of `source` to `target_partition`.
    async fn transition(
        &self,
        source: Uuid,
        target_partition: PartitionId,
        context: TransitionContext,
    ) -> Result<StateTransition, EngineError>;

    /// Propagate `object`'s value across `partitions`, detecting and
    /// resolving conflicts along the way.
    async fn synchronize_across(
        &self,
        object: Uuid,
        partitions: Vec<PartitionId>,
    ) -> Result<SynchronizationResult, EngineError>;

    /// Rollup of object counts, transition outcomes, stability, and
    /// anomalies.
    async fn health_report(&self) -> StateHealthReport;
}
