//! Client configuration with validation.

use nodetree_proto::DEFAULT_MAX_MESSAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("invalid limit: {0}")]
    InvalidLimit(String),

    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Main client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Client name announced in the handshake
    pub client_name: String,
    /// Client version announced in the handshake
    pub client_version: String,
    /// Free-form description announced in the handshake
    pub client_description: String,
    /// Client type announced in the handshake
    pub client_type: String,
    /// Time allowed between transport setup and the `connected` reply
    pub handshake_timeout_ms: u64,
    /// Capacity of the single-writer outbound queue
    pub outbound_queue_capacity: usize,
    /// Largest inbound record accepted by the decoder
    pub max_message_size: usize,
    /// Size of each transport read
    pub read_buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_name: "nodetree-client".to_string(),
            client_version: crate::VERSION.to_string(),
            client_description: String::new(),
            client_type: "client".to_string(),
            handshake_timeout_ms: 10_000,
            outbound_queue_capacity: 1024,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            read_buffer_size: 8 * 1024,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `NODETREE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(name) = env::var("NODETREE_CLIENT_NAME") {
            config.client_name = name;
        }
        if let Some(ms) = parse_env("NODETREE_HANDSHAKE_TIMEOUT_MS")? {
            config.handshake_timeout_ms = ms;
        }
        if let Some(size) = parse_env("NODETREE_MAX_MESSAGE_SIZE")? {
            config.max_message_size = size;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout(
                "handshake_timeout_ms cannot be 0".into(),
            ));
        }

        if self.outbound_queue_capacity == 0 {
            return Err(ConfigError::InvalidLimit(
                "outbound_queue_capacity cannot be 0".into(),
            ));
        }

        if self.max_message_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_message_size cannot be 0".into(),
            ));
        }

        if self.read_buffer_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "read_buffer_size cannot be 0".into(),
            ));
        }

        Ok(())
    }

    /// Handshake deadline as a [`Duration`].
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
        Err(_) => Ok(None),
    }
}
