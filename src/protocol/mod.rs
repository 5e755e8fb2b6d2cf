//! Protocol module for the Kaula MCP client.
//!
//! This module implements the MCP protocol surface: JSON-RPC 2.0 envelopes,
//! the wire codec, request/response correlation, and the typed payloads of
//! the protocol methods.

pub mod jsonrpc;
pub mod model;
