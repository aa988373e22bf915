//! # StateGrid Test Suite
//!
//! Unified test crate containing:
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/      # Cross-component flows
//!     ├── flows.rs      # Transition + synchronization round trips
//!     ├── rollback.rs   # Failure, timeout, and rollback behavior
//!     └── consistency.rs# Drift, conflicts, and monitoring sweeps
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p stategrid-tests
//!
//! # By category
//! cargo test -p stategrid-tests integration::flows::
//! cargo test -p stategrid-tests integration::rollback::
//! cargo test -p stategrid-tests integration::consistency::
//! ```

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod integration;
