//! Tracing initialization for deployments embedding the core.

use tracing_subscriber::EnvFilter;

/// Initialize structured tracing. Safe to call more than once; later
/// calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,wf_runtime=debug")),
        )
        .try_init();
}
