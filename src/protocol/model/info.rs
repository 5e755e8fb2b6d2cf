// Copyright (c) 2025 Kaula MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Initialization payloads and the negotiated peer description.

use serde::{Deserialize, Serialize};

use super::capabilities::{ClientCapabilities, ServerCapabilities};

/// Name and version of a protocol implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

impl Implementation {
    /// Describes this crate.
    pub fn from_build_env() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Params of the `initialize` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    pub client_info: Implementation,
}

/// Result of the `initialize` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    pub server_info: Implementation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// What the client learned about the server during initialization.
///
/// Set exactly once per session and never modified afterward.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerInfo {
    /// Server implementation name and version
    pub server_info: Implementation,

    /// Protocol version the server answered with
    pub protocol_version: String,

    /// Capabilities the server declared
    pub capabilities: ServerCapabilities,

    /// Optional usage instructions supplied by the server
    pub instructions: Option<String>,
}

impl From<InitializeResult> for PeerInfo {
    fn from(result: InitializeResult) -> Self {
        Self {
            server_info: result.server_info,
            protocol_version: result.protocol_version,
            capabilities: result.capabilities,
            instructions: result.instructions,
        }
    }
}
