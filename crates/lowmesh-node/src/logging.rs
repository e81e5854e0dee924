//! Tracing subscriber configuration for lowmesh nodes.
//!
//! Log levels follow these conventions:
//! - ERROR: Unrecoverable failures
//! - WARN: Degraded operation (parent lost, broadcast sent without passive ack)
//! - INFO: Membership milestones (network formed, joined, child admitted, left)
//! - DEBUG: Control-plane state changes, route discovery, leave processing
//! - TRACE: Per-frame decisions and transmission confirms

use tracing_subscriber::EnvFilter;

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` overrides `default_level`.
pub fn init(default_level: &str) {
    tracing_subscriber::fmt().with_env_filter(filter(default_level)).init();
}

/// Initialize the tracing subscriber with JSON output.
///
/// Activated by setting `RUST_LOG_FORMAT=json`.
pub fn init_json(default_level: &str) {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter(default_level))
        .init();
}

/// Initialize the tracing subscriber for tests.
///
/// Uses `try_init` so repeated calls are harmless.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter("debug"))
        .with_test_writer()
        .try_init();
}
