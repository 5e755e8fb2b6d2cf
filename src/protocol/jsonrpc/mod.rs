// Copyright (c) 2025 Kaula MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! JSON-RPC 2.0 layer of the Kaula MCP client.
//!
//! This module implements the [JSON-RPC 2.0 specification](https://www.jsonrpc.org/specification)
//! as used by MCP sessions: the envelope types, a stateless wire codec, the
//! correlation table pairing responses with outstanding requests, and a
//! router for requests initiated by the remote peer.
//!
//! # Features
//!
//! - Tagged envelope type covering requests, responses and notifications
//! - Decode errors that name the offending field
//! - Exact id matching (`1` never matches `"1"`)
//! - Leak-free correlation: abandoned requests release their slot
//! - Asynchronous method handlers registered at runtime
//!
//! # Example
//!
//! ```
//! use kaula_mcp_lib::protocol::jsonrpc::{codec, Message};
//!
//! let frame = br#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#;
//! let message = codec::decode(frame).unwrap();
//! assert!(matches!(message, Message::Response(_)));
//! assert_eq!(codec::decode(&codec::encode(&message)).unwrap(), message);
//! ```

pub mod codec;
pub mod correlation;
pub mod error;
pub mod handler;
pub mod types;
pub mod validation;

// Re-exports
pub use correlation::{CorrelationError, CorrelationTable, PendingResponse};
pub use error::{DecodeError, ErrorCode, JsonRpcError, Result};
pub use handler::{MethodContext, MethodHandler, MethodResult, MethodRouter};
pub use types::{Id, Message, Notification, Request, Response, JSONRPC_VERSION};

#[cfg(test)]
mod tests;
