//! Service error module.
//!
//! Errors surfaced by the peer handle to callers issuing requests and
//! notifications.

use std::time::Duration;
use thiserror::Error;

use super::handshake::HandshakeError;
use super::transport::TransportError;
use crate::protocol::jsonrpc::{CorrelationError, ErrorCode, Id, JsonRpcError};

/// Errors returned by peer operations.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The handshake has not completed yet. Raised before any I/O.
    #[error("Session is not initialized")]
    NotInitialized,

    /// The remote peer answered with an error response.
    #[error("Remote error {}: {}", .0.code, .0.message)]
    Remote(JsonRpcError),

    /// A locally registered handler failed, or none is registered.
    #[error("Handler error {}: {}", .0.code, .0.message)]
    Handler(JsonRpcError),

    /// No response arrived within the allotted time.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The request id is already outstanding.
    #[error("Request id {0} is already outstanding")]
    DuplicateId(Id),

    /// No outstanding request has this id.
    #[error("No outstanding request with id {0}")]
    UnknownId(Id),

    /// The peer did not declare the capability the operation requires.
    #[error("Peer does not support capability `{0}`")]
    CapabilityNotSupported(&'static str),

    /// The session ended before the operation could complete.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// The response could not be interpreted as the expected result type.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The transport failed while sending.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The session could not be established.
    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),
}

impl ServiceError {
    /// The JSON-RPC error code carried by a remote or handler error.
    pub fn error_code(&self) -> Option<i32> {
        match self {
            Self::Remote(error) | Self::Handler(error) => Some(error.code),
            _ => None,
        }
    }

    /// Returns true if the remote peer or the local handler registry did
    /// not know the method.
    pub fn is_method_not_found(&self) -> bool {
        self.error_code() == Some(ErrorCode::MethodNotFound.code())
    }

    /// Returns true if the error means the session is gone.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed(_) | Self::Transport(TransportError::Closed)
        )
    }
}

impl From<CorrelationError> for ServiceError {
    fn from(error: CorrelationError) -> Self {
        match error {
            CorrelationError::DuplicateId(id) => Self::DuplicateId(id),
            CorrelationError::UnknownId(id) => Self::UnknownId(id),
            CorrelationError::SessionClosed(reason) => Self::ConnectionClosed(reason),
            CorrelationError::ChannelClosed => {
                Self::ConnectionClosed("response channel closed".to_string())
            }
        }
    }
}

impl From<JsonRpcError> for ServiceError {
    fn from(error: JsonRpcError) -> Self {
        Self::Remote(error)
    }
}
