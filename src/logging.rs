//! Logging setup for hosts, demos, and tests.
//!
//! The library itself only emits `tracing` events; installing a
//! subscriber is the embedding application's call. This module provides
//! the standard console setup, filtered via the `RUST_LOG` environment
//! variable.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter applied when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Install a console subscriber for the whole process.
///
/// Safe to call more than once; only the first call installs anything,
/// which keeps test binaries with many entry points happy.
pub fn init_logging() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let stdout_layer = tracing_subscriber::fmt::layer().with_ansi(true);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .try_init();
}
