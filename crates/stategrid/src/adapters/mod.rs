//! # Adapters
//!
//! In-memory implementations of the outbound ports. Production
//! deployments replace these with object storage, a real wire transport,
//! and a durable audit backend.

pub mod audit;
pub mod payload_store;
pub mod transport;

pub use audit::{RecordingAuditSink, TracingAuditSink};
pub use payload_store::InMemoryPayloadStore;
pub use transport::{FailureMode, LoopbackTransport};
