//! Centralized logging setup

use tracing_subscriber::EnvFilter;

/// Initialize stdout logging.
///
/// The log level comes from the RUST_LOG environment variable and defaults
/// to "info" when unset.
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}
