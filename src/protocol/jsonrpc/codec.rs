// Copyright (c) 2025 Kaula MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Wire codec for envelopes.
//!
//! The codec is stateless: one envelope is one JSON document. Transports
//! that share a byte stream add their own framing on top (see
//! [`encode_line`]).

use serde_json::Value;

use super::error::{DecodeError, Result};
use super::types::Message;
use super::validation::classify;

/// Serializes an envelope to its JSON bytes.
pub fn encode(message: &Message) -> Vec<u8> {
    // Envelopes hold only strings, integers and `Value`s, so serialization
    // cannot fail.
    serde_json::to_vec(message).unwrap_or_default()
}

/// Serializes an envelope followed by a single `\n`, for newline framing.
pub fn encode_line(message: &Message) -> Vec<u8> {
    let mut bytes = encode(message);
    bytes.push(b'\n');
    bytes
}

/// Parses and classifies one envelope.
pub fn decode(bytes: &[u8]) -> Result<Message> {
    let value: Value = serde_json::from_slice(bytes)?;
    classify(value)
}

/// Parses one envelope from text, ignoring surrounding whitespace.
pub fn decode_str(text: &str) -> Result<Message> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(DecodeError::NotAnObject);
    }
    decode(trimmed.as_bytes())
}
