//! Handshake error module.
//!
//! Errors raised while negotiating a session with `initialize`. Any of them
//! leaves the session closed.

use std::time::Duration;
use thiserror::Error;

use super::transport::TransportError;
use crate::protocol::jsonrpc::{Id, JsonRpcError};

/// Errors that can occur during the initialization handshake.
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// The transport ended before the server answered `initialize`.
    #[error("Connection closed during initialization")]
    ConnectionClosed,

    /// The transport failed while the handshake was in flight.
    #[error("Transport failed during initialization: {0}")]
    Transport(#[from] TransportError),

    /// The server answered with a response carrying another id.
    #[error("Expected response to initialize request {expected}, got id {actual}")]
    IdMismatch {
        /// Id of the initialize request
        expected: Id,
        /// Id the server responded with
        actual: Id,
    },

    /// The server sent a frame other than the initialize response.
    #[error("Expected initialize response, got {0}")]
    UnexpectedMessage(&'static str),

    /// The server rejected the initialize request.
    #[error("Server rejected initialization: {0}")]
    Rejected(JsonRpcError),

    /// The initialize payload could not be converted to or from JSON.
    #[error("Malformed initialize payload: {0}")]
    InvalidResult(#[from] serde_json::Error),

    /// The server did not answer in time.
    #[error("Initialization timed out after {0:?}")]
    Timeout(Duration),

    /// `initialize` was called on a session that is not unconnected.
    #[error("Session cannot be initialized from state {0}")]
    InvalidState(String),
}
