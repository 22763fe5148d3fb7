//! Tracing bootstrap for embedders and examples
//!
//! The fabric only emits `tracing` events; installing a subscriber is
//! the host's call. This helper wires the common case: an env-filtered
//! fmt layer on stdout.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a global fmt subscriber with the given filter directive
/// (e.g. `"info,engram=debug"`). Safe to call more than once; later
/// calls are no-ops.
pub fn init_tracing(level: &str) {
    let log_filter = tracing_subscriber::EnvFilter::new(level);
    let _ = tracing_subscriber::registry()
        .with(log_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
