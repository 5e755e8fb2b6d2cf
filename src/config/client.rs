//! Client identity configuration.
//!
//! This module defines how the client introduces itself during the handshake
//! and which client-side capabilities it declares.

use super::ConfigResult;
use super::Validate;
use crate::error::config::ConfigError;
use crate::protocol::model::{
    ClientCapabilities, Implementation, JsonObject, Root, RootsCapability, LATEST_PROTOCOL_VERSION,
};
use serde::{Deserialize, Serialize};

/// A filesystem root served on `roots/list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RootConfig {
    /// Root URI, usually `file://...`
    pub uri: String,

    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl From<&RootConfig> for Root {
    fn from(root: &RootConfig) -> Self {
        Root {
            uri: root.uri.clone(),
            name: root.name.clone(),
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Name reported in `clientInfo`
    pub name: String,

    /// Version reported in `clientInfo`
    pub version: String,

    /// Protocol version requested in `initialize`
    pub protocol_version: String,

    /// Roots answered on `roots/list`
    pub roots: Vec<RootConfig>,

    /// Whether the client announces roots list changes
    pub roots_list_changed: bool,

    /// Whether the client declares the sampling capability
    pub sampling: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "kaula-mcp".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            roots: Vec::new(),
            roots_list_changed: false,
            sampling: false,
        }
    }
}

impl ClientConfig {
    /// The `clientInfo` sent during the handshake.
    pub fn implementation(&self) -> Implementation {
        Implementation {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }

    /// Capabilities declared during the handshake.
    ///
    /// `roots` is declared when roots are configured or change notifications
    /// are enabled.
    pub fn capabilities(&self) -> ClientCapabilities {
        let roots = (!self.roots.is_empty() || self.roots_list_changed).then(|| RootsCapability {
            list_changed: self.roots_list_changed.then_some(true),
        });
        ClientCapabilities {
            experimental: None,
            roots,
            sampling: self.sampling.then(JsonObject::new),
        }
    }

    /// Configured roots as protocol values.
    pub fn root_list(&self) -> Vec<Root> {
        self.roots.iter().map(Root::from).collect()
    }
}

impl Validate for ClientConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Client name cannot be empty".to_string(),
            ));
        }

        if self.protocol_version.trim().is_empty() {
            return Err(ConfigError::MissingValue("client.protocol_version".to_string()));
        }

        if let Some(root) = self.roots.iter().find(|root| root.uri.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "Root uri cannot be empty (name: {:?})",
                root.name
            )));
        }

        Ok(())
    }
}
