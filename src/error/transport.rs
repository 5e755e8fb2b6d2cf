//! Transport error module.
//!
//! This module defines error types that may occur in the byte-stream,
//! child-process, SSE and in-memory transports.

use std::io;
use thiserror::Error;

use crate::protocol::jsonrpc::DecodeError;

/// Errors that can occur during transport operations.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Error reading from or writing to the underlying stream.
    #[error("Transport I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error when the child process cannot be started.
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        /// The command that failed to start
        command: String,
        /// The underlying spawn error
        #[source]
        source: io::Error,
    },

    /// Error when a spawned child does not expose a piped stream.
    #[error("Child process has no {0} pipe")]
    MissingPipe(&'static str),

    /// HTTP error talking to an SSE server.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Error in the server-sent events stream itself.
    #[error("SSE stream error: {0}")]
    Sse(String),

    /// The endpoint announced by an SSE server could not be used.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// An inbound frame could not be decoded. Not fatal for the session.
    #[error("Malformed frame: {0}")]
    Decode(#[from] DecodeError),

    /// Error when the transport is closed.
    #[error("Transport closed")]
    Closed,

    /// Error when a timeout occurs during transport operations.
    #[error("Transport timeout after {0} milliseconds")]
    Timeout(u64),
}

impl TransportError {
    /// Returns true if the error ends the connection.
    ///
    /// Decode errors only affect a single frame; every other error means
    /// the transport can no longer be used.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Decode(_))
    }
}
