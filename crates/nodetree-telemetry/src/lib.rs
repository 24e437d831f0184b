//! # Nodetree Telemetry
//!
//! Structured logging setup for nodetree clients and their test suites.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use nodetree_telemetry::{init_logging, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! init_logging(&config).expect("Failed to init logging");
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `NODETREE_SERVICE_NAME` | `nodetree-client` | Service name in logs |
//! | `NODETREE_LOG_LEVEL` | `info` | Filter directive |
//! | `NODETREE_LOG_JSON` | `false` | JSON output |

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::{init_logging, init_test_logging};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("A global subscriber is already installed: {0}")]
    AlreadyInitialized(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
