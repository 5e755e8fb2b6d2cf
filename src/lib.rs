//! Kaula MCP Client Library
//!
//! This library contains the client-side engine for the Model Context
//! Protocol: a long-lived session with one server over a pluggable
//! transport, with concurrent in-flight requests, response correlation and
//! handlers for requests the server initiates.
//!
//! # Architecture
//!
//! Leaf-first:
//! - [`transport`]: duplex message channels (byte stream, child process,
//!   SSE, in-memory)
//! - [`protocol::jsonrpc`]: envelopes, wire codec, correlation table and
//!   method router
//! - [`protocol::model`]: typed MCP payloads
//! - [`service`]: handshake, dispatcher and the [`service::Peer`] handle
//! - [`config`] and [`error`]: ambient configuration and error types

pub mod config;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;

// Internal modules that are not part of the public API
#[cfg(test)]
pub(crate) mod tests;

use std::path::Path;
use std::sync::Arc;

/// Version information for the Kaula MCP client.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization function.
///
/// Installs the tracing error reporter, loads the configuration (file at
/// `config_path` if given, plus environment overrides) and makes it the
/// global configuration.
pub fn init(config_path: Option<&Path>) -> error::KaulaResult<Arc<config::KaulaConfig>> {
    error::set_error_reporter(Arc::new(error::TracingErrorReporter));

    let loader = config::ConfigLoader::new(config_path, config::ENV_PREFIX);
    config::init_global_config(loader.load()?);

    config::get_global_config()
        .ok_or_else(|| error::KaulaError::Custom("global configuration unavailable".to_string()))
}
