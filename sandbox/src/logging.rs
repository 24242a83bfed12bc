//! Logging setup.
//!
//! The library only emits `tracing` events. Binaries and tests that want to
//! see them call [`init_logging`] once; later calls are no-ops.

use tracing_subscriber::EnvFilter;

/// Install a global `fmt` subscriber.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Setting
/// `WEBZ_LOG_JSON=1` switches to JSON lines.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("WEBZ_LOG_JSON").is_ok_and(|v| v == "1");

    let result = if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_names(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .try_init()
    };
    if result.is_ok() {
        tracing::debug!(json, "logging initialised");
    }
}
