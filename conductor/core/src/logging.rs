//! Logging setup for programs embedding the core.
//!
//! The core only emits `tracing` events; nothing in it installs a
//! subscriber. Embedding binaries call [`init_logging`] once at startup and
//! tests call [`init_test_logging`] as often as they like.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
#[must_use]
pub fn default_filter(level: &str) -> String {
    format!("chorus_core={level}")
}

/// Install a formatted subscriber
///
/// `RUST_LOG` takes precedence over `level`.
///
/// # Errors
///
/// Fails when a global subscriber is already installed.
pub fn init_logging(level: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install subscriber: {e}"))
}

/// Install a test-writer subscriber, ignoring repeat calls
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
