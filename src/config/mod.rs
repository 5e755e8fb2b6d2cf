//! Configuration module for the Kaula MCP client.
//!
//! Settings are layered: built-in defaults, then an optional TOML, JSON or
//! YAML file, then `KAULA__`-prefixed environment variables (nested keys
//! separated by `__`, e.g. `KAULA__SESSION__REQUEST_TIMEOUT_MS=0`). The
//! merged result is validated before use.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::config::ConfigError;
use config::{Config, ConfigError as ExternalConfigError, Environment, File, FileFormat};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

pub mod client;
pub mod session;
pub mod transport;

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Default environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "KAULA";

/// A trait for types that can be validated.
pub trait Validate {
    /// Validates that the configuration is correct.
    ///
    /// # Returns
    ///
    /// * `Ok(())` if the configuration is valid
    /// * `Err(ConfigError)` if the configuration is invalid
    fn validate(&self) -> ConfigResult<()>;
}

/// Main configuration for the Kaula MCP client.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KaulaConfig {
    /// Client identity and capabilities
    pub client: client::ClientConfig,

    /// Session timeouts and runtime sizing
    pub session: session::SessionConfig,

    /// How to reach the server
    pub transport: transport::TransportConfig,

    /// Log configuration
    pub log: LogConfig,
}

impl Validate for KaulaConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.client.validate()?;
        self.session.validate()?;
        self.transport.validate()?;
        self.log.validate()?;
        Ok(())
    }
}

impl KaulaConfig {
    /// Renders the configuration as TOML.
    pub fn to_toml(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Writes the configuration to `path` as TOML.
    pub fn write_toml(&self, path: &Path) -> ConfigResult<()> {
        std::fs::write(path, self.to_toml()?)
            .map_err(|e| ConfigError::FileAccess(format!("{}: {e}", path.display())))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    pub level: String,

    /// Whether to log in JSON format
    pub json: bool,

    /// Whether to include source code locations in logs
    pub source_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            source_location: false,
        }
    }
}

impl Validate for LogConfig {
    fn validate(&self) -> ConfigResult<()> {
        match self.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            _ => Err(ConfigError::ValidationError(format!(
                "Invalid log level: {}",
                self.level
            ))),
        }
    }
}

/// Configuration loader for the Kaula MCP client.
#[derive(Debug)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_prefix: String,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// # Arguments
    ///
    /// * `config_path` - Optional path to the configuration file
    /// * `env_prefix` - Prefix for environment variables that override configuration values
    pub fn new<P: AsRef<Path>>(config_path: Option<P>, env_prefix: &str) -> Self {
        Self {
            config_path: config_path.map(|p| p.as_ref().to_path_buf()),
            env_prefix: env_prefix.to_string(),
        }
    }

    /// Loads the configuration from a file and environment variables.
    ///
    /// # Returns
    ///
    /// * `Ok(KaulaConfig)` if the configuration was loaded and is valid
    /// * `Err(ConfigError)` if there was an error loading the configuration
    pub fn load(&self) -> ConfigResult<KaulaConfig> {
        let mut builder = Config::builder().add_source(
            Config::try_from(&KaulaConfig::default())
                .map_err(|e| ConfigError::ParseError(e.to_string()))?,
        );

        if let Some(path) = &self.config_path {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.clone()));
            }

            let format = match path.extension().and_then(|ext| ext.to_str()) {
                Some("toml") => FileFormat::Toml,
                Some("json") => FileFormat::Json,
                Some("yaml" | "yml") => FileFormat::Yaml,
                _ => {
                    return Err(ConfigError::ParseError(format!(
                        "Unsupported file extension for: {path:?}"
                    )))
                }
            };
            builder = builder.add_source(File::from(path.as_path()).format(format));
        }

        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().map_err(|e| match e {
            ExternalConfigError::NotFound(path) => ConfigError::FileNotFound(PathBuf::from(path)),
            other => ConfigError::ParseError(other.to_string()),
        })?;

        let kaula_config: KaulaConfig = config
            .try_deserialize()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        kaula_config.validate()?;

        Ok(kaula_config)
    }
}

static GLOBAL_CONFIG: OnceCell<Arc<KaulaConfig>> = OnceCell::new();

/// Initialize the global configuration.
///
/// Only the first call takes effect.
pub fn init_global_config(config: KaulaConfig) {
    if GLOBAL_CONFIG.set(Arc::new(config)).is_err() {
        tracing::warn!("Global configuration was already initialized, ignoring new configuration");
    }
}

/// Get the global configuration, if it has been initialized.
pub fn get_global_config() -> Option<Arc<KaulaConfig>> {
    GLOBAL_CONFIG.get().cloned()
}
