// Copyright (c) 2025 Kaula MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! The peer handle.
//!
//! [`Peer`] is the public face of a session: it performs the handshake,
//! issues requests and notifications, exposes what was negotiated, and
//! holds the handlers that answer server-initiated requests. Clones share
//! one session.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use super::dispatcher::{Dispatcher, QuitReason};
use super::handshake;
use super::sink::{NotificationSink, SharedSink};
use super::state::{SessionState, StateCell};
use super::ClientOptions;
use crate::error::{HandshakeError, ServiceError};
use crate::protocol::jsonrpc::{
    CorrelationTable, Id, JsonRpcError, Message, MethodContext, MethodResult, MethodRouter,
    Notification, Request,
};
use crate::protocol::model::{
    methods, CallToolParams, CallToolResult, CancelledParams, Capability, CreateMessageParams,
    CreateMessageResult, JsonObject, ListRootsResult, ListToolsParams, ListToolsResult, PeerInfo,
    Tool,
};
use crate::transport::Transport;

struct PeerInner {
    transport: Arc<dyn Transport>,
    table: CorrelationTable,
    state: StateCell,
    peer_info: OnceCell<PeerInfo>,
    router: MethodRouter,
    sink: SharedSink,
    options: ClientOptions,
    // Serializes id allocation, registration and the write so requests hit
    // the wire in issue order
    send_lock: AsyncMutex<()>,
    dispatcher: Mutex<Option<JoinHandle<QuitReason>>>,
}

impl Drop for PeerInner {
    fn drop(&mut self) {
        // Stops the dispatcher, which closes the transport on its way out
        if self.state.close() {
            self.table.cancel_all("peer dropped");
        }
    }
}

/// Handle to one client session.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("transport", &self.inner.transport.name())
            .field("state", &self.state())
            .field("pending", &self.inner.table.len())
            .finish()
    }
}

impl Peer {
    /// Creates an unconnected session over `transport`.
    ///
    /// Handlers may be registered right away; call
    /// [`initialize`](Self::initialize) before issuing requests.
    pub fn new(transport: Arc<dyn Transport>, options: ClientOptions) -> Self {
        let router = MethodRouter::new();
        router.register_method(methods::PING, |_params, _ctx| async { Ok(json!({})) });

        Self {
            inner: Arc::new(PeerInner {
                transport,
                table: CorrelationTable::new(),
                state: StateCell::new(),
                peer_info: OnceCell::new(),
                router,
                sink: SharedSink::default(),
                options,
                send_lock: AsyncMutex::new(()),
                dispatcher: Mutex::new(None),
            }),
        }
    }

    /// Runs the handshake and starts the dispatcher.
    ///
    /// Any failure closes the session. Calling this a second time fails.
    pub async fn initialize(&self) -> Result<PeerInfo, ServiceError> {
        let inner = &self.inner;
        inner
            .state
            .transition(SessionState::Unconnected, SessionState::AwaitingInit)
            .map_err(|state| HandshakeError::InvalidState(state.to_string()))?;

        let mut inbound = inner.transport.receive();
        let id = inner.table.next_id();
        let timeout = inner.options.handshake_timeout;
        let exchange = handshake::perform(inner.transport.as_ref(), &mut inbound, id, &inner.options);

        let outcome = match tokio::time::timeout(timeout, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => Err(HandshakeError::Timeout(timeout)),
        };
        let info = match outcome {
            Ok(info) => info,
            Err(e) => {
                tracing::error!(error = %e, "Initialization failed");
                self.teardown("initialization failed").await;
                return Err(e.into());
            }
        };

        // Only the first call gets this far, so the cell is empty
        let _ = inner.peer_info.set(info.clone());
        if inner
            .state
            .transition(SessionState::AwaitingInit, SessionState::Ready)
            .is_err()
        {
            self.teardown("closed during initialization").await;
            return Err(ServiceError::ConnectionClosed(
                "closed during initialization".to_string(),
            ));
        }

        let dispatcher = Dispatcher::new(
            inner.transport.clone(),
            inner.table.clone(),
            inner.router.clone(),
            inner.sink.clone(),
            inner.state.clone(),
        );
        *inner.dispatcher.lock() = Some(tokio::spawn(dispatcher.run(inbound)));

        Ok(info)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.state.get()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// What the server declared during the handshake.
    pub fn peer_info(&self) -> Result<PeerInfo, ServiceError> {
        self.inner
            .peer_info
            .get()
            .cloned()
            .ok_or(ServiceError::NotInitialized)
    }

    /// Options this session was created with.
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.table.len()
    }

    fn ensure_ready(&self) -> Result<(), ServiceError> {
        match self.state() {
            SessionState::Ready => Ok(()),
            SessionState::Closed => Err(ServiceError::ConnectionClosed("session closed".to_string())),
            SessionState::Unconnected | SessionState::AwaitingInit => {
                Err(ServiceError::NotInitialized)
            }
        }
    }

    fn require_server(&self, capability: Capability) -> Result<(), ServiceError> {
        let info = self.peer_info()?;
        if info.capabilities.supports(capability) {
            Ok(())
        } else {
            Err(ServiceError::CapabilityNotSupported(capability.as_str()))
        }
    }

    /// Sends a request and waits for its result, applying the default
    /// request timeout.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ServiceError> {
        self.send_request_with_timeout(method, params, self.inner.options.request_timeout)
            .await
    }

    /// Sends a request and waits at most `timeout` for its result.
    ///
    /// On timeout the request is abandoned and the server is told so with a
    /// best-effort `notifications/cancelled`.
    pub async fn send_request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, ServiceError> {
        self.ensure_ready()?;
        let inner = &self.inner;

        let pending = {
            let _guard = inner.send_lock.lock().await;
            let id = inner.table.next_id();
            let pending = inner.table.register(id.clone())?;
            tracing::debug!(%id, %method, "Sending request");
            // On failure `pending` drops and releases its entry
            inner
                .transport
                .send(Message::Request(Request::new(id, method, params)))
                .await?;
            pending
        };
        let id = pending.id().clone();

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, pending).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(%id, %method, ?limit, "Request timed out");
                    self.cancel_remote(id, "request timed out").await;
                    return Err(ServiceError::Timeout(limit));
                }
            },
            None => pending.await,
        };

        outcome?.into_result().map_err(ServiceError::Remote)
    }

    async fn cancel_remote(&self, id: Id, reason: &str) {
        let params = CancelledParams {
            request_id: id,
            reason: Some(reason.to_string()),
        };
        let notification = serde_json::to_value(params)
            .map(|params| Notification::new(methods::CANCELLED, Some(params)));
        if let Ok(notification) = notification {
            let _guard = self.inner.send_lock.lock().await;
            if let Err(e) = self.inner.transport.send(notification.into()).await {
                tracing::debug!(error = %e, "Could not send cancellation");
            }
        }
    }

    async fn request_typed<P, R>(&self, method: &str, params: Option<P>) -> Result<R, ServiceError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = params
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| ServiceError::UnexpectedResponse(format!("invalid params: {e}")))?;
        let value = self.send_request(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| ServiceError::UnexpectedResponse(format!("{method}: {e}")))
    }

    /// Sends a notification.
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), ServiceError> {
        self.ensure_ready()?;
        let _guard = self.inner.send_lock.lock().await;
        tracing::debug!(%method, "Sending notification");
        self.inner
            .transport
            .send(Notification::new(method, params).into())
            .await?;
        Ok(())
    }

    /// Checks the server is alive.
    pub async fn ping(&self) -> Result<(), ServiceError> {
        self.send_request(methods::PING, None).await.map(|_| ())
    }

    /// Fetches one page of tools.
    pub async fn list_tools_page(
        &self,
        cursor: Option<String>,
    ) -> Result<ListToolsResult, ServiceError> {
        self.ensure_ready()?;
        self.require_server(Capability::Tools)?;
        self.request_typed(methods::TOOLS_LIST, Some(ListToolsParams { cursor }))
            .await
    }

    /// Fetches every tool, following `nextCursor` until the last page.
    pub async fn list_tools(&self) -> Result<Vec<Tool>, ServiceError> {
        let mut tools = Vec::new();
        let mut cursor = None;
        loop {
            let page = self.list_tools_page(cursor).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(tools),
            }
        }
    }

    /// Invokes a tool.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<CallToolResult, ServiceError> {
        self.ensure_ready()?;
        self.require_server(Capability::Tools)?;
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        self.request_typed(methods::TOOLS_CALL, Some(params)).await
    }

    /// Tells the server the roots list changed.
    ///
    /// Requires the client to have declared `roots.listChanged`.
    pub async fn notify_roots_list_changed(&self) -> Result<(), ServiceError> {
        if !self
            .inner
            .options
            .capabilities
            .supports(Capability::RootsListChanged)
        {
            return Err(ServiceError::CapabilityNotSupported(
                Capability::RootsListChanged.as_str(),
            ));
        }
        self.send_notification(methods::ROOTS_LIST_CHANGED, None).await
    }

    /// Registers a handler for server-initiated requests to `method`,
    /// replacing any previous one.
    pub fn register_handler<F, Fut>(&self, method: &str, handler: F)
    where
        F: Fn(Option<Value>, MethodContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        self.inner.router.register_method(method, handler);
    }

    /// Answers `sampling/createMessage` with `handler`.
    pub fn on_create_message<F, Fut>(&self, handler: F)
    where
        F: Fn(CreateMessageParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CreateMessageResult, JsonRpcError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register_handler(methods::SAMPLING_CREATE_MESSAGE, move |params, _ctx| {
            let handler = handler.clone();
            async move {
                let params: CreateMessageParams = parse_params(params)?;
                let result = handler(params).await?;
                to_result(result)
            }
        });
    }

    /// Answers `roots/list` with `handler`.
    pub fn on_list_roots<F, Fut>(&self, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ListRootsResult, JsonRpcError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register_handler(methods::ROOTS_LIST, move |_params, _ctx| {
            let handler = handler.clone();
            async move { to_result(handler().await?) }
        });
    }

    /// Runs the local `sampling/createMessage` handler directly.
    pub async fn create_message(
        &self,
        params: CreateMessageParams,
    ) -> Result<CreateMessageResult, ServiceError> {
        let params = serde_json::to_value(params)
            .map_err(|e| ServiceError::Handler(JsonRpcError::invalid_params(e.to_string())))?;
        self.call_local(methods::SAMPLING_CREATE_MESSAGE, Some(params))
            .await
    }

    /// Runs the local `roots/list` handler directly.
    pub async fn list_roots(&self) -> Result<ListRootsResult, ServiceError> {
        self.call_local(methods::ROOTS_LIST, None).await
    }

    async fn call_local<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<R, ServiceError> {
        let context = MethodContext {
            request_id: Id::Null,
            method: method.to_string(),
            metadata: Default::default(),
        };
        let value = self
            .inner
            .router
            .call(method, params, context)
            .await
            .map_err(ServiceError::Handler)?;
        serde_json::from_value(value)
            .map_err(|e| ServiceError::UnexpectedResponse(format!("{method}: {e}")))
    }

    /// Replaces the notification sink.
    pub fn set_notification_sink(&self, sink: Arc<dyn NotificationSink>) {
        self.inner.sink.set(sink);
    }

    /// Closes the session. Outstanding requests fail with a closed error.
    /// Calling it again is a no-op.
    pub async fn close(&self) -> Result<(), ServiceError> {
        if self.inner.state.close() {
            self.inner.table.cancel_all("session closed");
        }
        self.inner.transport.close().await?;

        let dispatcher = self.inner.dispatcher.lock().take();
        if let Some(handle) = dispatcher {
            match handle.await {
                Ok(reason) => tracing::debug!(?reason, "Dispatcher stopped"),
                Err(e) => tracing::warn!(error = %e, "Dispatcher task failed"),
            }
        }
        Ok(())
    }

    /// Waits until the session is closed, by either side.
    pub async fn closed(&self) {
        self.inner.state.closed().await
    }

    async fn teardown(&self, reason: &str) {
        self.inner.state.close();
        self.inner.table.cancel_all(reason);
        if let Err(e) = self.inner.transport.close().await {
            tracing::debug!(error = %e, "Error closing transport");
        }
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, JsonRpcError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| JsonRpcError::invalid_params(e.to_string()))
}

fn to_result<T: Serialize>(result: T) -> MethodResult {
    serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}
