//! # Domain Layer
//!
//! Entities, value objects, errors, and invariants for the state engine.

pub mod entities;
pub mod errors;
pub mod invariants;
pub mod value_objects;

pub use entities::*;
pub use errors::*;
pub use invariants::*;
pub use value_objects::*;

/// Current unix timestamp in seconds.
///
/// Clock skew before the epoch collapses to zero rather than panicking.
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
