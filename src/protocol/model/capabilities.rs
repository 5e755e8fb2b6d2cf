// Copyright (c) 2025 Kaula MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Capability sets exchanged during initialization.
//!
//! A declared capability is an object (possibly empty); an undeclared one is
//! absent from the wire. Once negotiated, both sets are frozen for the
//! session.

use serde::{Deserialize, Serialize};

use super::JsonObject;

/// Sub-options of the `roots` client capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootsCapability {
    /// Whether the client emits `notifications/roots/list_changed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Sub-options of the `tools` server capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    /// Whether the server emits `notifications/tools/list_changed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Capabilities the client declares in `initialize`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<JsonObject>,

    /// The client can answer `roots/list`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapability>,

    /// The client can answer `sampling/createMessage`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<JsonObject>,
}

impl ClientCapabilities {
    /// Returns true if the client declared the capability.
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Experimental => self.experimental.is_some(),
            Capability::Roots => self.roots.is_some(),
            Capability::RootsListChanged => self
                .roots
                .as_ref()
                .and_then(|roots| roots.list_changed)
                .unwrap_or(false),
            Capability::Sampling => self.sampling.is_some(),
            _ => false,
        }
    }
}

/// Capabilities the server declares in its `initialize` result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<JsonObject>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<JsonObject>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completions: Option<JsonObject>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<JsonObject>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<JsonObject>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

impl ServerCapabilities {
    /// Returns true if the server declared the capability.
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Experimental => self.experimental.is_some(),
            Capability::Logging => self.logging.is_some(),
            Capability::Completions => self.completions.is_some(),
            Capability::Prompts => self.prompts.is_some(),
            Capability::Resources => self.resources.is_some(),
            Capability::Tools => self.tools.is_some(),
            _ => false,
        }
    }
}

/// Names of the capabilities either side may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Experimental,
    Logging,
    Completions,
    Prompts,
    Resources,
    Tools,
    Roots,
    RootsListChanged,
    Sampling,
}

impl Capability {
    /// Wire name of the capability.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Experimental => "experimental",
            Self::Logging => "logging",
            Self::Completions => "completions",
            Self::Prompts => "prompts",
            Self::Resources => "resources",
            Self::Tools => "tools",
            Self::Roots => "roots",
            Self::RootsListChanged => "roots.listChanged",
            Self::Sampling => "sampling",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
