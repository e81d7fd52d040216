//! Logging initialization.
//!
//! The library logs through the `log` macros (with `tracing` spans around
//! job execution); this helper installs a tracing subscriber plus the
//! log-to-tracing bridge so both ends land in the same output.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes logging for the process. `RUST_LOG` overrides the default
/// filter. Safe to call once; subsequent calls are no-ops.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    // Bridge log:: macros into tracing. Ignore the error if a logger is
    // already installed (tests call init repeatedly).
    let _ = tracing_log::LogTracer::init();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}
