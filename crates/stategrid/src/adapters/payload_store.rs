//! Payload Store Adapter
//!
//! Content-addressed in-memory implementation of the `PayloadStore` port.
//!
//! In production this would sit in front of object storage.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{EngineError, StatePayload};
use crate::ports::outbound::{PayloadRef, PayloadStore};

/// In-memory payload store keyed by content hash.
///
/// Saving identical bytes twice is a no-op returning the same reference.
#[derive(Default)]
pub struct InMemoryPayloadStore {
    blobs: RwLock<HashMap<PayloadRef, Vec<u8>>>,
}

impl InMemoryPayloadStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blobs held.
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// Whether the store holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

#[async_trait]
impl PayloadStore for InMemoryPayloadStore {
    async fn save(&self, bytes: &[u8]) -> Result<PayloadRef, EngineError> {
        let reference = StatePayload::digest(bytes);
        debug!(
            "[stategrid] saving {} byte blob as {}",
            bytes.len(),
            hex::encode(&reference[..4])
        );
        self.blobs.write().insert(reference, bytes.to_vec());
        Ok(reference)
    }

    async fn load(&self, reference: PayloadRef) -> Result<Vec<u8>, EngineError> {
        self.blobs.read().get(&reference).cloned().ok_or_else(|| {
            EngineError::DataCorruption {
                object: Uuid::nil(),
                detail: format!("no blob stored under {}", hex::encode(&reference[..4])),
            }
        })
    }
}
