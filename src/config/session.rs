//! Session configuration module.
//!
//! Timeouts applied to requests and the handshake, and the size of the
//! runtime that drives the session.

use super::ConfigResult;
use super::Validate;
use crate::error::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Default request timeout in milliseconds; 0 disables it
    pub request_timeout_ms: u64,

    /// Time allowed for the `initialize` exchange in milliseconds
    pub handshake_timeout_ms: u64,

    /// Number of runtime worker threads
    pub worker_threads: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            handshake_timeout_ms: 10_000,
            worker_threads: num_cpus::get(),
        }
    }
}

impl SessionConfig {
    /// Default per-request timeout, `None` when disabled.
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl Validate for SessionConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.worker_threads == 0 {
            return Err(ConfigError::ValidationError(
                "worker_threads must be greater than 0".to_string(),
            ));
        }

        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "handshake_timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
