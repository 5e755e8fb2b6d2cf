// Copyright (c) 2025 Kaula MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Envelope types for the JSON-RPC 2.0 protocol.
//!
//! Every frame on a session is one [`Message`]: a request, a response, or a
//! notification. Requests and responses are paired by [`Id`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

use super::error::{ErrorCode, JsonRpcError};

/// The protocol version string carried in every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC request identifier.
///
/// `Number(1)` and `String("1")` are distinct identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Id {
    /// Numeric identifier
    Number(i64),

    /// String identifier
    String(String),

    /// Null identifier, only seen on error responses to unparseable requests
    Null,
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::String(s) => write!(f, "{}", s),
            Id::Number(n) => write!(f, "{}", n),
            Id::Null => write!(f, "null"),
        }
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Id::Number(n)
    }
}

impl From<i32> for Id {
    fn from(n: i32) -> Self {
        Id::Number(n.into())
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::String(s)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::String(s.to_string())
    }
}

/// A JSON-RPC 2.0 request: a method invocation that expects a response.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Request {
    /// JSON-RPC protocol version, always "2.0"
    pub jsonrpc: String,

    /// Request identifier, echoed by the matching response
    pub id: Id,

    /// Name of the method to be invoked
    pub method: String,

    /// Method parameters, positional (array) or named (object)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Creates a new JSON-RPC 2.0 request.
    ///
    /// `params` is not checked here. The decoder reads `Some(Value::Null)`
    /// back as `None` and rejects scalar params, so only objects, arrays
    /// and `None` survive a round trip unchanged.
    pub fn new(id: impl Into<Id>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification: fire-and-forget, no id, no response.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Notification {
    /// JSON-RPC protocol version, always "2.0"
    pub jsonrpc: String,

    /// Name of the notification
    pub method: String,

    /// Notification parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    /// Creates a new JSON-RPC 2.0 notification.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response object.
///
/// Exactly one of `result` and `error` is present on a well-formed response.
/// Use [`Response::success`] or [`Response::error`]; a response built with
/// neither field still encodes, but the decoder rejects it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Response {
    /// JSON-RPC protocol version, always "2.0"
    pub jsonrpc: String,

    /// Same identifier as the request this is responding to
    pub id: Id,

    /// The result of the method invocation, if successful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// The error object, if an error occurred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl Response {
    /// Creates a new successful JSON-RPC 2.0 response.
    pub fn success(id: Id, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Creates a new error JSON-RPC 2.0 response.
    pub fn error(id: Id, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Consumes the response, yielding the result or the remote error.
    pub fn into_result(self) -> std::result::Result<Value, JsonRpcError> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Err(JsonRpcError::new(
                ErrorCode::InternalError,
                "response carried neither result nor error",
            )),
        }
    }
}

/// One wire-level unit: a request, a response, or a notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    /// A method call expecting a response
    Request(Request),

    /// The answer to an earlier request
    Response(Response),

    /// A fire-and-forget message
    Notification(Notification),
}

impl Message {
    /// Builds a request envelope.
    pub fn request(id: impl Into<Id>, method: impl Into<String>, params: Option<Value>) -> Self {
        Message::Request(Request::new(id, method, params))
    }

    /// Builds a notification envelope.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Message::Notification(Notification::new(method, params))
    }

    /// Method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(r) => Some(&r.method),
            Message::Notification(n) => Some(&n.method),
            Message::Response(_) => None,
        }
    }

    /// Identifier for requests and responses.
    pub fn id(&self) -> Option<&Id> {
        match self {
            Message::Request(r) => Some(&r.id),
            Message::Response(r) => Some(&r.id),
            Message::Notification(_) => None,
        }
    }

    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request(_) => "request",
            Message::Response(_) => "response",
            Message::Notification(_) => "notification",
        }
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Message::Request(r)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Message::Response(r)
    }
}

impl From<Notification> for Message {
    fn from(n: Notification) -> Self {
        Message::Notification(n)
    }
}

// Classification goes through the validator so that errors name the field at
// fault instead of the generic "did not match any variant" of untagged enums.
impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        super::validation::classify(value).map_err(serde::de::Error::custom)
    }
}
