// Copyright (c) 2025 Kaula MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! The `initialize` exchange.
//!
//! Runs before the dispatcher exists, reading the inbound stream directly:
//! send `initialize`, wait for the matching response, then confirm with
//! `notifications/initialized`.

use futures::StreamExt;

use super::ClientOptions;
use crate::error::HandshakeError;
use crate::protocol::jsonrpc::{Id, Message, Notification, Request, Response};
use crate::protocol::model::{methods, InitializeParams, InitializeResult, PeerInfo};
use crate::transport::{InboundStream, Transport};

/// Performs the handshake over `transport`, using `id` for the request.
///
/// No timeout is applied here; the caller bounds the whole exchange.
pub(crate) async fn perform(
    transport: &dyn Transport,
    inbound: &mut InboundStream,
    id: Id,
    options: &ClientOptions,
) -> Result<PeerInfo, HandshakeError> {
    let params = InitializeParams {
        protocol_version: options.protocol_version.clone(),
        capabilities: options.capabilities.clone(),
        client_info: options.client_info.clone(),
    };
    let request = Request::new(id.clone(), methods::INITIALIZE, Some(serde_json::to_value(params)?));

    tracing::debug!(%id, protocol_version = %options.protocol_version, "Sending initialize");
    transport.send(Message::Request(request)).await?;

    let response = await_response(inbound, &id).await?;
    let result: InitializeResult = match response.into_result() {
        Ok(value) => serde_json::from_value(value)?,
        Err(error) => return Err(HandshakeError::Rejected(error)),
    };

    if result.protocol_version != options.protocol_version {
        tracing::warn!(
            requested = %options.protocol_version,
            negotiated = %result.protocol_version,
            "Server answered with a different protocol version"
        );
    }

    transport
        .send(Message::Notification(Notification::new(methods::INITIALIZED, None)))
        .await?;

    tracing::info!(
        server = %result.server_info.name,
        version = %result.server_info.version,
        protocol_version = %result.protocol_version,
        "Session initialized"
    );
    Ok(PeerInfo::from(result))
}

/// Reads frames until the initialize response arrives.
///
/// Notifications and malformed frames are skipped; anything else ends the
/// handshake.
async fn await_response(inbound: &mut InboundStream, id: &Id) -> Result<Response, HandshakeError> {
    loop {
        match inbound.next().await {
            Some(Ok(Message::Response(response))) if &response.id == id => return Ok(response),
            Some(Ok(Message::Response(response))) => {
                return Err(HandshakeError::IdMismatch {
                    expected: id.clone(),
                    actual: response.id,
                })
            }
            Some(Ok(Message::Notification(notification))) => {
                tracing::debug!(method = %notification.method, "Skipping notification before initialize response");
            }
            Some(Ok(message)) => return Err(HandshakeError::UnexpectedMessage(message.kind())),
            Some(Err(e)) if !e.is_fatal() => {
                tracing::warn!(error = %e, "Skipping malformed frame during initialization");
            }
            Some(Err(e)) => return Err(HandshakeError::Transport(e)),
            None => return Err(HandshakeError::ConnectionClosed),
        }
    }
}
