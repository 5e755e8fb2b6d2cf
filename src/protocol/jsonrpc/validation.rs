// Copyright (c) 2025 Kaula MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Envelope validation and classification.
//!
//! An inbound JSON object is classified by the members it carries:
//! - `method` and `id` make a request,
//! - `method` without `id` makes a notification,
//! - `id` with `result` or `error` makes a response.
//!
//! Every rejection names the member at fault.

use serde_json::{Map, Value};

use super::error::{DecodeError, JsonRpcError, Result};
use super::types::{Id, Message, Notification, Request, Response, JSONRPC_VERSION};

/// Classifies a parsed JSON value as one of the envelope variants.
pub fn classify(value: Value) -> Result<Message> {
    let mut obj = match value {
        Value::Object(map) => map,
        _ => return Err(DecodeError::NotAnObject),
    };

    check_version(&obj)?;
    let jsonrpc = JSONRPC_VERSION.to_string();

    if let Some(method) = obj.remove("method") {
        let method = parse_method(method)?;
        let params = parse_params(obj.remove("params"))?;

        return match obj.remove("id") {
            Some(id) => Ok(Message::Request(Request {
                jsonrpc,
                id: parse_id(id, false)?,
                method,
                params,
            })),
            None => Ok(Message::Notification(Notification {
                jsonrpc,
                method,
                params,
            })),
        };
    }

    let id = match obj.remove("id") {
        Some(id) => parse_id(id, true)?,
        None => return Err(DecodeError::MissingField("method")),
    };

    let result = obj.remove("result");
    let error = obj.remove("error");
    let error = match (result.is_some(), error) {
        (true, Some(_)) => {
            return Err(DecodeError::invalid(
                "error",
                "a response must not carry both result and error",
            ))
        }
        (false, None) => return Err(DecodeError::MissingField("result")),
        (_, Some(error)) => Some(
            serde_json::from_value::<JsonRpcError>(error)
                .map_err(|e| DecodeError::invalid("error", e.to_string()))?,
        ),
        (true, None) => None,
    };

    Ok(Message::Response(Response {
        jsonrpc,
        id,
        result,
        error,
    }))
}

fn check_version(obj: &Map<String, Value>) -> Result<()> {
    match obj.get("jsonrpc") {
        None => Err(DecodeError::MissingField("jsonrpc")),
        Some(Value::String(v)) if v == JSONRPC_VERSION => Ok(()),
        Some(Value::String(v)) => Err(DecodeError::UnsupportedVersion(v.clone())),
        Some(other) => Err(DecodeError::invalid(
            "jsonrpc",
            format!("expected a string, got {}", type_name(other)),
        )),
    }
}

fn parse_method(value: Value) -> Result<String> {
    match value {
        Value::String(s) if s.is_empty() => Err(DecodeError::invalid("method", "must not be empty")),
        Value::String(s) => Ok(s),
        other => Err(DecodeError::invalid(
            "method",
            format!("expected a string, got {}", type_name(&other)),
        )),
    }
}

fn parse_params(value: Option<Value>) -> Result<Option<Value>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v @ Value::Object(_)) | Some(v @ Value::Array(_)) => Ok(Some(v)),
        Some(other) => Err(DecodeError::invalid(
            "params",
            format!("expected an object or array, got {}", type_name(&other)),
        )),
    }
}

// Numbers must be integral; no coercion between strings and numbers.
fn parse_id(value: Value, allow_null: bool) -> Result<Id> {
    match value {
        Value::String(s) => Ok(Id::String(s)),
        Value::Number(n) => n
            .as_i64()
            .map(Id::Number)
            .ok_or_else(|| DecodeError::invalid("id", format!("expected an integer, got {n}"))),
        Value::Null if allow_null => Ok(Id::Null),
        other => Err(DecodeError::invalid(
            "id",
            format!("expected a string or integer, got {}", type_name(&other)),
        )),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
