//! Telemetry configuration from environment variables.

use std::env;

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to every log line
    pub service_name: String,

    /// Filter directive (`info`, `nodetree_client=debug`, ...)
    pub log_level: String,

    /// Whether to emit JSON lines instead of human-readable output
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "nodetree-client".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `NODETREE_SERVICE_NAME`: Service name (default: nodetree-client)
    /// - `NODETREE_LOG_LEVEL` or `RUST_LOG`: Filter directive (default: info)
    /// - `NODETREE_LOG_JSON`: Enable JSON logs (default: false)
    pub fn from_env() -> Self {
        Self {
            service_name: env::var("NODETREE_SERVICE_NAME")
                .unwrap_or_else(|_| "nodetree-client".to_string()),

            log_level: env::var("NODETREE_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            json_logs: env::var("NODETREE_LOG_JSON")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(false),
        }
    }
}
