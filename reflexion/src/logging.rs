//! Diagnostic tracing.
//!
//! Diagnostics go to stderr and are filtered by `RUST_LOG`. Product output
//! (the result JSON and the run journal) never goes through tracing.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the stderr subscriber. `default_filter` applies when `RUST_LOG`
/// is unset.
///
/// ```bash
/// RUST_LOG=reflexion=debug reflexion run "Explain TCP slow start"
/// ```
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
