//! Transport configuration module.
//!
//! Describes how to reach the server: spawn it as a child process or connect
//! to it over server-sent events.

use super::ConfigResult;
use super::Validate;
use crate::error::config::ConfigError;
use serde::{Deserialize, Serialize};

/// Which transport to use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Spawn the server and talk over its stdio
    #[default]
    ChildProcess,
    /// Connect to an SSE endpoint
    Sse,
}

/// An environment variable passed to a spawned server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Transport to use
    pub kind: TransportKind,

    /// Program to spawn (child_process)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Arguments for the program (child_process)
    pub args: Vec<String>,

    /// Extra environment for the program (child_process)
    pub env: Vec<EnvVar>,

    /// Pass the server's stderr through instead of discarding it
    pub inherit_stderr: bool,

    /// Event stream URL (sse)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Connect timeout in milliseconds (sse)
    pub connect_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            command: None,
            args: Vec::new(),
            env: Vec::new(),
            inherit_stderr: true,
            url: None,
            connect_timeout_ms: 10_000,
        }
    }
}

impl TransportConfig {
    /// Checks that the settings the selected transport needs are present.
    ///
    /// Not part of [`Validate`] so a configuration without a server can
    /// still be loaded and inspected.
    pub fn ensure_complete(&self) -> ConfigResult<()> {
        match self.kind {
            TransportKind::ChildProcess if self.command.is_none() => {
                Err(ConfigError::MissingValue("transport.command".to_string()))
            }
            TransportKind::Sse if self.url.is_none() => {
                Err(ConfigError::MissingValue("transport.url".to_string()))
            }
            _ => Ok(()),
        }
    }
}

impl Validate for TransportConfig {
    fn validate(&self) -> ConfigResult<()> {
        if matches!(&self.command, Some(command) if command.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "transport.command cannot be empty".to_string(),
            ));
        }

        if let Some(url) = &self.url {
            let parsed = url::Url::parse(url)
                .map_err(|e| ConfigError::ValidationError(format!("Invalid transport.url {url}: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::ValidationError(format!(
                    "transport.url must be http or https, got {}",
                    parsed.scheme()
                )));
            }
        }

        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ValueOutOfRange {
                key: "transport.connect_timeout_ms".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if let Some(var) = self.env.iter().find(|var| var.key.is_empty() || var.key.contains('=')) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid environment variable name: {:?}",
                var.key
            )));
        }

        Ok(())
    }
}
