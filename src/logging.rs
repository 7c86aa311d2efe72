//! Logging setup (`tracing` + `tracing-subscriber`)
//!
//! The library only emits `tracing` events; binaries call [`init`] once.

use tracing_subscriber::EnvFilter;

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "POPCAST_LOG";

/// Install a formatted subscriber filtered by `POPCAST_LOG`, then
/// `RUST_LOG`, then `info`.
///
/// Calling it twice is harmless; the second install is ignored.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}
