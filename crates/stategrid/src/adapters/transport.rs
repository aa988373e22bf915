//! Loopback Transport Adapter
//!
//! In-memory implementation of the `Transport` port with injectable
//! failure modes, so transition and propagation retry paths can be
//! exercised without a network.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use crate::domain::PartitionId;
use crate::ports::outbound::{TransferAck, TransferFrame, Transport, TransportError};

/// Failure behavior injected for a partition.
#[derive(Clone, Copy, Debug)]
pub enum FailureMode {
    /// Fail the next `n` sends with a retryable error, then deliver.
    Retryable(u32),
    /// Fail every send permanently.
    Permanent,
}

/// Transport that delivers frames to in-process partition inboxes.
#[derive(Default)]
pub struct LoopbackTransport {
    delivered: RwLock<HashMap<PartitionId, Vec<TransferFrame>>>,
    failures: RwLock<HashMap<PartitionId, FailureMode>>,
    latencies: RwLock<HashMap<PartitionId, std::time::Duration>>,
}

impl LoopbackTransport {
    /// Create a transport with no failures configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a failure mode for a partition.
    pub fn fail_partition(&self, partition: PartitionId, mode: FailureMode) {
        self.failures.write().insert(partition, mode);
    }

    /// Add a per-frame delivery latency for a partition.
    pub fn set_latency(&self, partition: PartitionId, latency: std::time::Duration) {
        self.latencies.write().insert(partition, latency);
    }

    /// Frames delivered to a partition so far.
    pub fn deliveries(&self, partition: PartitionId) -> Vec<TransferFrame> {
        self.delivered
            .read()
            .get(&partition)
            .cloned()
            .unwrap_or_default()
    }

    /// Total bytes delivered to a partition.
    pub fn delivered_bytes(&self, partition: PartitionId) -> u64 {
        self.deliveries(partition)
            .iter()
            .map(|f| f.bytes.len() as u64)
            .sum()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(
        &self,
        partition: PartitionId,
        frame: TransferFrame,
    ) -> Result<TransferAck, TransportError> {
        let latency = self.latencies.read().get(&partition).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        {
            let mut failures = self.failures.write();
            match failures.get_mut(&partition) {
                Some(FailureMode::Permanent) => {
                    return Err(TransportError {
                        partition,
                        retryable: false,
                        message: "partition unreachable".to_string(),
                    });
                }
                Some(FailureMode::Retryable(remaining)) => {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(TransportError {
                            partition,
                            retryable: true,
                            message: "transient delivery failure".to_string(),
                        });
                    }
                }
                None => {}
            }
        }

        debug!(
            "[stategrid] delivering frame {}/{} for {} to partition {}",
            frame.sequence + 1,
            frame.total,
            frame.object_id,
            partition
        );

        let mut delivered = self.delivered.write();
        let inbox = delivered.entry(partition).or_default();
        inbox.push(frame);
        let received_bytes = inbox.iter().map(|f| f.bytes.len() as u64).sum();
        Ok(TransferAck {
            partition,
            received_bytes,
        })
    }
}
