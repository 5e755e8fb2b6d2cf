// Copyright (c) 2025 Kaula MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! The session read loop.
//!
//! A single task drains the inbound stream and routes each envelope by tag:
//! responses to the correlation table, requests to the method router (each
//! on its own task), notifications to the sink. It exits when the stream
//! ends, the transport fails, or the session is closed, and on exit fails
//! every outstanding request.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::task::AbortHandle;
use tracing::Instrument;

use super::sink::SharedSink;
use super::state::StateCell;
use crate::error::{report_error, ErrorContext, KaulaError, TransportError};
use crate::protocol::jsonrpc::{
    CorrelationError, CorrelationTable, ErrorCode, Id, JsonRpcError, Message, MethodRouter,
    Notification, Request, Response,
};
use crate::protocol::model::{methods, CancelledParams, LoggingMessageParams};
use crate::transport::{InboundStream, Transport};

/// Why the read loop stopped.
#[derive(Debug)]
pub enum QuitReason {
    /// The session was closed locally.
    Closed,
    /// The remote end closed the connection.
    StreamEnded,
    /// The transport failed.
    TransportError(TransportError),
}

impl QuitReason {
    fn describe(&self) -> String {
        match self {
            Self::Closed => "session closed".to_string(),
            Self::StreamEnded => "connection closed by peer".to_string(),
            Self::TransportError(e) => format!("transport failed: {e}"),
        }
    }
}

/// Requests from the server still being handled, keyed by their id.
type InFlight = Arc<DashMap<Id, AbortHandle>>;

pub(crate) struct Dispatcher {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) table: CorrelationTable,
    pub(crate) router: MethodRouter,
    pub(crate) sink: SharedSink,
    pub(crate) state: StateCell,
    in_flight: InFlight,
}

impl Dispatcher {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        table: CorrelationTable,
        router: MethodRouter,
        sink: SharedSink,
        state: StateCell,
    ) -> Self {
        Self {
            transport,
            table,
            router,
            sink,
            state,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Runs until the session ends, then tears it down.
    pub(crate) async fn run(self, mut inbound: InboundStream) -> QuitReason {
        let closed = self.state.closed();
        tokio::pin!(closed);

        let reason = loop {
            let item = tokio::select! {
                biased;
                _ = &mut closed => break QuitReason::Closed,
                item = inbound.next() => item,
            };

            match item {
                Some(Ok(message)) => self.dispatch(message),
                Some(Err(e)) if !e.is_fatal() => {
                    tracing::warn!(error = %e, "Skipping malformed frame");
                }
                Some(Err(e)) => break QuitReason::TransportError(e),
                None => break QuitReason::StreamEnded,
            }
        };

        self.shutdown(&reason).await;
        reason
    }

    fn dispatch(&self, message: Message) {
        match message {
            Message::Response(response) => {
                tracing::debug!(id = %response.id, "Received response");
                match self.table.fulfill(response) {
                    Ok(()) => {}
                    Err(CorrelationError::UnknownId(id)) => {
                        tracing::warn!(%id, "Ignoring response to unknown or abandoned request");
                    }
                    Err(e) => tracing::warn!(error = %e, "Could not deliver response"),
                }
            }
            Message::Request(request) => self.spawn_handler(request),
            Message::Notification(notification) => self.on_notification(notification),
        }
    }

    fn spawn_handler(&self, request: Request) {
        let id = request.id.clone();
        let span = tracing::debug_span!("inbound_request", id = %id, method = %request.method);
        let router = self.router.clone();
        let transport = self.transport.clone();
        let in_flight = self.in_flight.clone();
        let task_id = id.clone();

        // Hold the slot while spawning so the task's own removal runs after
        // the insert
        let slot = match self.in_flight.entry(id) {
            Entry::Vacant(slot) => slot,
            Entry::Occupied(slot) => {
                let id = slot.key().clone();
                drop(slot);
                self.reject_duplicate(id);
                return;
            }
        };
        let task = tokio::spawn(
            async move {
                let response = router.handle_request(request).await;
                in_flight.remove(&task_id);
                if let Some(error) = &response.error {
                    tracing::debug!(code = error.code, message = %error.message, "Request failed");
                }
                if let Err(e) = transport.send(Message::Response(response)).await {
                    tracing::warn!(error = %e, "Failed to send response");
                }
            }
            .instrument(span),
        );
        slot.insert(task.abort_handle());
    }

    // The first request with this id keeps running and keeps its slot
    fn reject_duplicate(&self, id: Id) {
        tracing::warn!(id = %id, "Rejecting request with an id already in flight");
        let error = JsonRpcError::new(
            ErrorCode::InvalidRequest,
            format!("request id {id} is already in flight"),
        );
        let transport = self.transport.clone();
        tokio::spawn(async move {
            let response = Response::error(id, error);
            if let Err(e) = transport.send(Message::Response(response)).await {
                tracing::warn!(error = %e, "Failed to send response");
            }
        });
    }

    fn on_notification(&self, notification: Notification) {
        match notification.method.as_str() {
            methods::CANCELLED => self.on_cancelled(&notification),
            methods::LOGGING_MESSAGE => {
                match notification
                    .params
                    .clone()
                    .map(serde_json::from_value::<LoggingMessageParams>)
                {
                    Some(Ok(params)) => tracing::debug!(
                        level = ?params.level,
                        logger = params.logger.as_deref().unwrap_or("-"),
                        data = %params.data,
                        "Server log message"
                    ),
                    _ => tracing::debug!("Server log message with unexpected params"),
                }
            }
            method => tracing::debug!(%method, "Received notification"),
        }
        self.sink.deliver(notification);
    }

    fn on_cancelled(&self, notification: &Notification) {
        let params = notification
            .params
            .clone()
            .and_then(|params| serde_json::from_value::<CancelledParams>(params).ok());
        let Some(params) = params else {
            tracing::warn!("Ignoring cancellation without a request id");
            return;
        };

        tracing::info!(
            id = %params.request_id,
            reason = params.reason.as_deref().unwrap_or("none given"),
            "Server cancelled request"
        );
        if let Some((_, handle)) = self.in_flight.remove(&params.request_id) {
            handle.abort();
        }
    }

    async fn shutdown(&self, reason: &QuitReason) {
        self.state.close();
        let cancelled = self.table.cancel_all(reason.describe());

        for entry in self.in_flight.iter() {
            entry.value().abort();
        }
        self.in_flight.clear();

        match reason {
            QuitReason::Closed => {
                tracing::info!(cancelled, "Session closed");
            }
            QuitReason::StreamEnded => {
                tracing::info!(cancelled, "Connection closed by peer");
                report_error(
                    ErrorContext::new(TransportError::Closed, "dispatcher")
                        .with_details(format!("inbound stream ended, {cancelled} requests cancelled")),
                );
            }
            QuitReason::TransportError(e) => {
                tracing::error!(error = %e, cancelled, "Transport failed");
                report_error(
                    ErrorContext::new(KaulaError::Custom(e.to_string()), "dispatcher")
                        .with_details(format!("{cancelled} requests cancelled"))
                        .with_span_trace(),
                );
            }
        }

        if let Err(e) = self.transport.close().await {
            tracing::debug!(error = %e, "Error closing transport");
        }
    }
}
