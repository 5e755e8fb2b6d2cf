// Copyright (c) 2025 Kaula MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! MCP message payloads.
//!
//! Typed params and results carried inside JSON-RPC envelopes. Field names
//! follow the wire format (camelCase); absent optional fields are omitted
//! when serializing.

pub mod capabilities;
pub mod info;
pub mod notifications;
pub mod roots;
pub mod sampling;
pub mod tool;

pub use capabilities::{
    Capability, ClientCapabilities, RootsCapability, ServerCapabilities, ToolsCapability,
};
pub use info::{Implementation, InitializeParams, InitializeResult, PeerInfo};
pub use notifications::{CancelledParams, LoggingLevel, LoggingMessageParams, ProgressParams};
pub use roots::{ListRootsResult, Root};
pub use sampling::{
    ContextInclusion, CreateMessageParams, CreateMessageResult, ModelHint, ModelPreferences, Role,
    SamplingMessage,
};
pub use tool::{
    CallToolParams, CallToolResult, Content, ListToolsParams, ListToolsResult, ResourceContents,
    Tool,
};

/// A JSON object, as used for tool arguments and schemas.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// Newest protocol revision this client speaks.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-03-26";

/// Protocol revisions this client accepts from a server without warning.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-03-26", "2024-11-05"];

/// Method names used by the protocol.
pub mod methods {
    /// Handshake request sent by the client.
    pub const INITIALIZE: &str = "initialize";
    /// Notification completing the handshake.
    pub const INITIALIZED: &str = "notifications/initialized";
    /// Liveness check, valid in both directions.
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    /// Server-initiated sampling request.
    pub const SAMPLING_CREATE_MESSAGE: &str = "sampling/createMessage";
    /// Server-initiated roots request.
    pub const ROOTS_LIST: &str = "roots/list";
    pub const CANCELLED: &str = "notifications/cancelled";
    pub const PROGRESS: &str = "notifications/progress";
    pub const LOGGING_MESSAGE: &str = "notifications/message";
    pub const ROOTS_LIST_CHANGED: &str = "notifications/roots/list_changed";
    pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
}
