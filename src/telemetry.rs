//! Diagnostic logging setup.
//!
//! Diagnostics (startup, connection errors, backend retries, panics) go
//! through `tracing`. The access log is separate: see
//! [`access_log`](crate::access_log).

use tracing_subscriber::EnvFilter;

use crate::config::{Config, LogFormat};
use crate::error::{Error, Result};

/// Installs the global subscriber for the configured profile.
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
pub fn init(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_ascii_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = match config.log_format {
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    installed.map_err(|e| Error::Internal(format!("installing log subscriber: {e}")))
}
