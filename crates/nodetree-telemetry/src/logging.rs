//! Subscriber installation.

use crate::{TelemetryConfig, TelemetryError};
use std::sync::Once;
use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

fn filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(&config.log_level).map_err(|e| TelemetryError::Config(e.to_string()))
}

/// Install the global `tracing` subscriber.
///
/// Fails with [`TelemetryError::AlreadyInitialized`] if another subscriber
/// is already installed.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = filter(config)?;

    let installed = if config.json_logs {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .try_init()
    } else {
        fmt().with_env_filter(filter).with_target(true).try_init()
    };
    installed.map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        log_level = %config.log_level,
        json_logs = config.json_logs,
        "Logging initialized"
    );
    Ok(())
}

/// Install a test-writer subscriber once per process. Safe to call from
/// every test.
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("NODETREE_LOG_LEVEL")
            .unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}
