// Copyright (c) 2025 Kaula MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Error types for the JSON-RPC 2.0 layer.
//!
//! Two kinds of error live here: [`JsonRpcError`], the error object carried on
//! the wire inside a response, and [`DecodeError`], raised locally when an
//! inbound frame is not a well-formed envelope.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Standard JSON-RPC 2.0 error codes plus the MCP-specific ones we emit.
///
/// The error codes from -32768 to -32000 are reserved for pre-defined errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Parse error (-32700)
    /// Invalid JSON was received.
    ParseError = -32700,

    /// Invalid Request (-32600)
    /// The JSON sent is not a valid Request object.
    InvalidRequest = -32600,

    /// Method not found (-32601)
    /// The method does not exist / is not available.
    MethodNotFound = -32601,

    /// Invalid params (-32602)
    /// Invalid method parameter(s).
    InvalidParams = -32602,

    /// Internal error (-32603)
    /// Internal JSON-RPC error.
    InternalError = -32603,

    /// Server error (-32000 to -32099)
    /// Reserved for implementation-defined server errors.
    ServerError = -32000,

    /// Request cancelled (-32800)
    RequestCancelled = -32800,
}

impl ErrorCode {
    /// Returns a string description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::ParseError => "Parse error",
            ErrorCode::InvalidRequest => "Invalid Request",
            ErrorCode::MethodNotFound => "Method not found",
            ErrorCode::InvalidParams => "Invalid params",
            ErrorCode::InternalError => "Internal error",
            ErrorCode::ServerError => "Server error",
            ErrorCode::RequestCancelled => "Request cancelled",
        }
    }

    /// Create an ErrorCode from a raw integer value.
    ///
    /// Returns None if the code is not a known error code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -32700 => Some(ErrorCode::ParseError),
            -32600 => Some(ErrorCode::InvalidRequest),
            -32601 => Some(ErrorCode::MethodNotFound),
            -32602 => Some(ErrorCode::InvalidParams),
            -32603 => Some(ErrorCode::InternalError),
            -32800 => Some(ErrorCode::RequestCancelled),
            c if (-32099..=-32000).contains(&c) => Some(ErrorCode::ServerError),
            _ => None,
        }
    }

    /// Returns the integer error code.
    pub fn code(&self) -> i32 {
        *self as i32
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> i32 {
        code as i32
    }
}

/// JSON-RPC error object as carried in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// The error code
    pub code: i32,

    /// A short description of the error
    pub message: String,

    /// Additional information about the error (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    /// Creates a new JSON-RPC error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code as i32,
            message: message.into(),
            data: None,
        }
    }

    /// Creates a new JSON-RPC error with additional data.
    pub fn with_data(code: ErrorCode, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code: code as i32,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Creates a standard parse error.
    pub fn parse_error() -> Self {
        Self::new(
            ErrorCode::ParseError,
            "Parse error: Invalid JSON was received",
        )
    }

    /// Creates a standard invalid request error.
    pub fn invalid_request() -> Self {
        Self::new(
            ErrorCode::InvalidRequest,
            "Invalid Request: The JSON sent is not a valid Request object",
        )
    }

    /// Creates a standard method not found error.
    pub fn method_not_found<S: Into<String>>(method: S) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!("Method not found: {}", method.into()),
        )
    }

    /// Creates a standard invalid params error.
    pub fn invalid_params<S: Into<String>>(msg: S) -> Self {
        Self::new(
            ErrorCode::InvalidParams,
            format!("Invalid params: {}", msg.into()),
        )
    }

    /// Creates a standard internal error.
    pub fn internal_error<S: Into<String>>(msg: S) -> Self {
        Self::new(
            ErrorCode::InternalError,
            format!("Internal error: {}", msg.into()),
        )
    }

    /// Returns the well-known code for this error, if any.
    pub fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(self.code)
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for JsonRpcError {}

/// Error raised when an inbound frame is not a valid envelope.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame parsed, but is not a JSON object.
    #[error("envelope must be a JSON object")]
    NotAnObject,

    /// A field required to classify or use the envelope is absent.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// A field is present but has the wrong shape.
    #[error("invalid value for field `{field}`: {reason}")]
    InvalidField {
        /// Name of the offending field
        field: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// The `jsonrpc` member is not "2.0".
    #[error("unsupported jsonrpc version: {0}")]
    UnsupportedVersion(String),
}

impl DecodeError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    /// Name of the field that made the frame invalid, when one is to blame.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            DecodeError::MissingField(field) => Some(field),
            DecodeError::InvalidField { field, .. } => Some(field),
            DecodeError::UnsupportedVersion(_) => Some("jsonrpc"),
            DecodeError::Json(_) | DecodeError::NotAnObject => None,
        }
    }

    /// Converts the decode failure into the error object a peer would expect.
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        match self {
            DecodeError::Json(_) => JsonRpcError::parse_error(),
            other => JsonRpcError::new(ErrorCode::InvalidRequest, other.to_string()),
        }
    }
}

/// Specialized Result type for decoding.
pub type Result<T> = std::result::Result<T, DecodeError>;
