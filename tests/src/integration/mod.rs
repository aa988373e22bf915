//! Cross-component integration flows.

pub mod consistency;
pub mod flows;
pub mod rollback;

/// Route engine logs through a subscriber during test debugging.
///
/// Honors `RUST_LOG`; repeated calls are harmless.
#[cfg(test)]
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
