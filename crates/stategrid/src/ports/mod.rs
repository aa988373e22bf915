//! # Ports
//!
//! Inbound API trait and outbound dependency traits.

pub mod inbound;
pub mod outbound;

pub use inbound::StateGridApi;
pub use outbound::{
    AuditEvent, AuditSink, NullAuditSink, PayloadRef, PayloadStore, TransferAck, TransferFrame,
    Transport, TransportError,
};
