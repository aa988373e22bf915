//! # Engine
//!
//! The root of the system: owns the partition network and the rules, wires
//! the store, transition manager, synchronizer, and monitor together, and
//! runs the cancellable background monitoring loop.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::adapters::{InMemoryPayloadStore, LoopbackTransport, TracingAuditSink};
use crate::domain::{
    ContentionPolicy, EngineError, PartitionId, ResolutionStrategy, ResourceRequirements,
    Severity, StateObject, StatePayload, StatePredicate, StateTransition,
    SynchronizationNetwork, SyncMethod, SyncRuleAction, TransitionContext, TransitionKind,
};
use crate::monitor::{Monitor, StateHealthReport};
use crate::ports::inbound::StateGridApi;
use crate::ports::outbound::{AuditEvent, AuditSink, PayloadStore, Transport};
use crate::store::StateStore;
use crate::sync::{SynchronizationResult, Synchronizer};
use crate::transition::TransitionManager;

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Ceilings a transition plan must fit under.
    pub resource_ceilings: ResourceRequirements,
    /// Interval of the background monitoring loop.
    pub monitor_interval: Duration,
    /// Stability score below which a warning alert is raised.
    pub warning_threshold: f64,
    /// Stability score below which a critical alert is raised.
    pub critical_threshold: f64,
    /// Behavior when synchronization meets an in-flight transition.
    pub contention_policy: ContentionPolicy,
    /// Frame size for payload transfer.
    pub transfer_chunk_bytes: usize,
    /// Retries for retryable transport failures.
    pub max_transport_retries: u32,
    /// Detection timing used by `synchronize_across`.
    pub default_sync_method: SyncMethod,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resource_ceilings: ResourceRequirements {
                cpu_millis: 60_000,
                memory_bytes: 256 * 1024 * 1024,
                storage_bytes: 1024 * 1024 * 1024,
                bandwidth_bytes: 256 * 1024 * 1024,
            },
            monitor_interval: Duration::from_secs(60),
            warning_threshold: 0.8,
            critical_threshold: 0.5,
            contention_policy: ContentionPolicy::Block,
            transfer_chunk_bytes: 64 * 1024,
            max_transport_retries: 3,
            default_sync_method: SyncMethod::Immediate,
        }
    }
}

impl EngineConfig {
    /// Config for tests: tight monitoring interval, fail-fast contention.
    pub fn for_testing() -> Self {
        Self {
            monitor_interval: Duration::from_millis(50),
            contention_policy: ContentionPolicy::FailFast,
            ..Self::default()
        }
    }
}

/// The state transition and synchronization engine.
pub struct StateGridEngine {
    config: EngineConfig,
    store: Arc<StateStore>,
    transitions: Arc<TransitionManager>,
    synchronizer: Arc<Synchronizer>,
    monitor: Arc<Monitor>,
    audit: Arc<dyn AuditSink>,
    network: RwLock<Option<SynchronizationNetwork>>,
    /// Replica bookkeeping: source object -> partition -> replica id.
    replicas: RwLock<HashMap<Uuid, HashMap<PartitionId, Uuid>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

impl StateGridEngine {
    /// Create an engine over the given collaborators.
    pub fn new(
        config: EngineConfig,
        payloads: Arc<dyn PayloadStore>,
        transport: Arc<dyn Transport>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let store = Arc::new(StateStore::new());
        let transitions = Arc::new(TransitionManager::new(
            store.clone(),
            payloads,
            transport.clone(),
            audit.clone(),
            config.resource_ceilings,
            config.transfer_chunk_bytes,
            config.max_transport_retries,
        ));
        let synchronizer = Arc::new(Synchronizer::new(
            store.clone(),
            transitions.clone(),
            transport,
            audit.clone(),
            config.contention_policy,
            config.max_transport_retries,
        ));
        let monitor = Arc::new(Monitor::new(
            store.clone(),
            transitions.clone(),
            synchronizer.clone(),
            config.warning_threshold,
            config.critical_threshold,
            config.resource_ceilings,
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            store,
            transitions,
            synchronizer,
            monitor,
            audit,
            network: RwLock::new(None),
            replicas: RwLock::new(HashMap::new()),
            shutdown_tx,
            shutdown_rx,
            monitor_task: Mutex::new(None),
        }
    }

    /// Engine wired to in-memory adapters.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryPayloadStore::new()),
            Arc::new(LoopbackTransport::new()),
            Arc::new(TracingAuditSink),
        )
    }

    /// The shared object registry.
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// The transition manager.
    pub fn transitions(&self) -> &Arc<TransitionManager> {
        &self.transitions
    }

    /// The synchronizer.
    pub fn synchronizer(&self) -> &Arc<Synchronizer> {
        &self.synchronizer
    }

    /// The monitor.
    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    /// Create a state object on a registered partition.
    pub fn create_state(
        &self,
        partition: PartitionId,
        payload: StatePayload,
        owner: &str,
    ) -> Result<StateObject, EngineError> {
        {
            let network = self.network.read();
            let network = network
                .as_ref()
                .ok_or_else(|| EngineError::InvalidState("network not initialized".to_string()))?;
            if !network.knows_partition(partition) {
                return Err(EngineError::UnknownPartition(partition));
            }
        }
        let object = self.store.create(partition, payload, owner)?;
        if let Some(network) = self.network.write().as_mut() {
            network.register_object(partition, object.id)?;
        }
        Ok(object)
    }

    /// Start the background monitoring loop.
    ///
    /// The loop assesses every object on the configured interval, raising
    /// alerts through the audit sink. It never blocks foreground calls
    /// and stops promptly on [`StateGridEngine::shutdown`].
    pub fn start(&self) {
        let mut task = self.monitor_task.lock();
        if task.is_some() {
            return;
        }
        let store = self.store.clone();
        let monitor = self.monitor.clone();
        let audit = self.audit.clone();
        let interval = self.config.monitor_interval;
        let mut shutdown = self.shutdown_rx.clone();

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(
                "[stategrid] monitoring loop started (interval {:?})",
                interval
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for object in store.snapshot() {
                            if let Ok(alerts) = monitor.alerts(object.id) {
                                for alert in alerts {
                                    audit.record(AuditEvent::AlertRaised {
                                        object: object.id,
                                        message: alert.message.clone(),
                                    });
                                }
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("[stategrid] monitoring loop stopped");
        }));
    }

    /// Stop the background monitoring loop and wait for it to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.monitor_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    fn check_predicates(
        &self,
        predicates: &[StatePredicate],
        object: &StateObject,
        network: &SynchronizationNetwork,
    ) -> Result<(), EngineError> {
        for predicate in predicates {
            match predicate {
                StatePredicate::StatusIn(allowed) => {
                    if !allowed.contains(&object.status) {
                        return Err(EngineError::InvalidState(format!(
                            "object {} is {:?}, rule requires one of {:?}",
                            object.id, object.status, allowed
                        )));
                    }
                }
                StatePredicate::ChecksumValid => {
                    if !object.payload.is_intact() {
                        return Err(EngineError::DataCorruption {
                            object: object.id,
                            detail: "checksum check failed in a transition rule".to_string(),
                        });
                    }
                }
                StatePredicate::PartitionKnown => {
                    if !network.knows_partition(object.partition) {
                        return Err(EngineError::UnknownPartition(object.partition));
                    }
                }
            }
        }
        Ok(())
    }

    fn replica_group(
        &self,
        source: &StateObject,
        partitions: &[PartitionId],
    ) -> Result<Vec<Uuid>, EngineError> {
        let mut group = vec![source.id];
        let mut replicas = self.replicas.write();
        let by_partition = replicas.entry(source.id).or_default();

        for partition in partitions {
            if *partition == source.partition {
                continue;
            }
            let replica_id = match by_partition.get(partition) {
                Some(id) if self.store.contains(*id) => *id,
                _ => {
                    let replica = self.store.create_replica(source.id, *partition)?;
                    by_partition.insert(*partition, replica.id);
                    if let Some(network) = self.network.write().as_mut() {
                        network.register_object(*partition, replica.id)?;
                    }
                    replica.id
                }
            };
            group.push(replica_id);
        }
        Ok(group)
    }
}

#[async_trait]
impl StateGridApi for StateGridEngine {
    async fn initialize_network(
        &self,
        partitions: Vec<PartitionId>,
    ) -> Result<SynchronizationNetwork, EngineError> {
        let mut slot = self.network.write();
        if let Some(existing) = slot.as_ref() {
            let populated = existing
                .objects_by_partition
                .values()
                .any(|set| !set.is_empty());
            if populated {
                return Err(EngineError::InvalidState(
                    "network already initialized with registered objects".to_string(),
                ));
            }
        }
        let network = SynchronizationNetwork::new(partitions)?;
        info!(
            "[stategrid] network initialized with {} partition(s)",
            network.partitions.len()
        );
        *slot = Some(network.clone());
        Ok(network)
    }

    async fn transition(
        &self,
        source: Uuid,
        target_partition: PartitionId,
        context: TransitionContext,
    ) -> Result<StateTransition, EngineError> {
        let (object, rules) = {
            let network = self.network.read();
            let network = network
                .as_ref()
                .ok_or_else(|| EngineError::InvalidState("network not initialized".to_string()))?;
            if !network.knows_partition(target_partition) {
                return Err(EngineError::UnknownPartition(target_partition));
            }
            let object = self.store.get(source)?;
            let applicable: Vec<_> = network
                .transition_rules
                .iter()
                .filter(|r| r.allowed.contains(&TransitionKind::Move))
                .cloned()
                .collect();
            for rule in &applicable {
                self.check_predicates(&rule.preconditions, &object, network)?;
            }
            (object, applicable)
        };

        let extra_checks: Vec<_> = rules.iter().flat_map(|r| r.checks.clone()).collect();
        let plan = self
            .transitions
            .plan(object.id, target_partition, &context, &extra_checks)?;
        let record = self.transitions.execute(&plan, context).await?;

        {
            let mut network = self.network.write();
            if let Some(network) = network.as_mut() {
                network.move_object(object.id, plan.source_partition, target_partition)?;
            }
        }
        {
            let network = self.network.read();
            if let Some(network) = network.as_ref() {
                let moved = self.store.get(object.id)?;
                for rule in &rules {
                    self.check_predicates(&rule.postconditions, &moved, network)?;
                }
            }
        }
        debug!(
            "[stategrid] transition {} for {} finished as {:?}",
            record.id, source, record.status
        );
        Ok(record)
    }

    async fn synchronize_across(
        &self,
        object: Uuid,
        partitions: Vec<PartitionId>,
    ) -> Result<SynchronizationResult, EngineError> {
        let source = {
            let network = self.network.read();
            let network = network
                .as_ref()
                .ok_or_else(|| EngineError::InvalidState("network not initialized".to_string()))?;
            for partition in &partitions {
                if !network.knows_partition(*partition) {
                    return Err(EngineError::UnknownPartition(*partition));
                }
            }
            self.store.get(object)?
        };

        let group = self.replica_group(&source, &partitions)?;
        let replicas = self.store.get_many(&group)?;
        let version_spread = replicas
            .iter()
            .flat_map(|a| replicas.iter().map(move |b| a.version.distance(&b.version)))
            .max()
            .unwrap_or(0);

        // Fire the matching rules, highest priority first.
        let rules = {
            let network = self.network.read();
            network
                .as_ref()
                .map(|n| n.sync_rules.clone())
                .unwrap_or_default()
        };
        for rule in rules {
            if !rule.condition.matches(&source, version_spread) {
                continue;
            }
            match rule.action {
                SyncRuleAction::Propagate => {
                    let result = self.synchronizer.propagate(source.id, &partitions).await?;
                    debug!(
                        "[stategrid] rule {} propagated {} to {} target(s)",
                        rule.id,
                        source.id,
                        result.targets.len()
                    );
                }
                SyncRuleAction::Notify => {
                    self.audit.record(AuditEvent::AlertRaised {
                        object: source.id,
                        message: format!("synchronization rule {} matched", rule.id),
                    });
                }
                // Merge and override happen inside conflict resolution.
                SyncRuleAction::Merge | SyncRuleAction::Override => {}
            }
        }

        let result = self
            .synchronizer
            .synchronize(&group, self.config.default_sync_method)
            .await?;

        let unresolved = result
            .conflicts
            .iter()
            .filter(|c| {
                c.severity == Severity::Critical
                    && c.resolution
                        .as_ref()
                        .map(|r| r.strategy == ResolutionStrategy::Manual)
                        .unwrap_or(true)
            })
            .count();
        if unresolved > 0 {
            return Err(EngineError::ConflictUnresolved(unresolved));
        }
        Ok(result)
    }

    async fn health_report(&self) -> StateHealthReport {
        self.monitor.report()
    }
}
