// Copyright (c) 2025 Kaula MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Method routing for inbound requests.
//!
//! The remote peer may send us requests (`sampling/createMessage`,
//! `roots/list`, `ping`). The [`MethodRouter`] maps each method name to an
//! asynchronous handler and turns the handler's outcome into the response
//! envelope, answering unknown methods with `MethodNotFound`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;

use super::error::JsonRpcError;
use super::types::{Id, Request, Response};

/// Context handed to a method handler alongside the request parameters.
#[derive(Debug, Clone)]
pub struct MethodContext {
    /// Id of the request being answered
    pub request_id: Id,

    /// Method name the request was routed by
    pub method: String,

    /// Optional metadata attached by the caller
    pub metadata: HashMap<String, String>,
}

impl MethodContext {
    /// Creates a context for the given request.
    pub fn for_request(request: &Request) -> Self {
        Self {
            request_id: request.id.clone(),
            method: request.method.clone(),
            metadata: HashMap::new(),
        }
    }
}

/// Type alias for method handler response.
pub type MethodResult = std::result::Result<Value, JsonRpcError>;

/// Type alias for method handler's future return type.
pub type MethodHandlerFuture = BoxFuture<'static, MethodResult>;

/// Type alias for shared method handlers.
pub type MethodHandlerFn = Arc<dyn MethodHandler + Send + Sync>;

/// Trait for method handlers to implement.
pub trait MethodHandler {
    /// Handle a method call asynchronously.
    ///
    /// # Parameters
    /// * `params` - The parameters passed to the method.
    /// * `context` - Additional context for the method call.
    fn handle(&self, params: Option<Value>, context: MethodContext) -> MethodHandlerFuture;
}

impl<F, Fut> MethodHandler for F
where
    F: Send + Sync + 'static + Fn(Option<Value>, MethodContext) -> Fut,
    Fut: Future<Output = MethodResult> + Send + 'static,
{
    fn handle(&self, params: Option<Value>, context: MethodContext) -> MethodHandlerFuture {
        Box::pin((self)(params, context))
    }
}

/// Routes inbound requests to registered handlers.
///
/// Registration takes `&self`, so handlers can be added or replaced while the
/// session is live. Clones share the same registry.
#[derive(Clone, Default)]
pub struct MethodRouter {
    methods: Arc<DashMap<String, MethodHandlerFn>>,
}

impl std::fmt::Debug for MethodRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRouter")
            .field("methods", &self.methods())
            .finish()
    }
}

impl MethodRouter {
    /// Creates a router with no methods.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a method handler function, replacing any previous handler
    /// for the same method.
    pub fn register_method<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Send + Sync + 'static + Fn(Option<Value>, MethodContext) -> Fut,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        self.register_handler(method, Arc::new(handler));
    }

    /// Registers an already shared handler.
    pub fn register_handler(&self, method: impl Into<String>, handler: MethodHandlerFn) {
        let method = method.into();
        if self.methods.insert(method.clone(), handler).is_some() {
            tracing::debug!(%method, "Replaced existing method handler");
        }
    }

    /// Names of all registered methods, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Invokes the handler for a method directly.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        context: MethodContext,
    ) -> MethodResult {
        // Clone the handler out so no map guard is held across the await.
        let handler = match self.methods.get(method) {
            Some(entry) => entry.value().clone(),
            None => return Err(JsonRpcError::method_not_found(method)),
        };
        handler.handle(params, context).await
    }

    /// Handles a request and builds the response envelope for it.
    pub async fn handle_request(&self, request: Request) -> Response {
        let context = MethodContext::for_request(&request);
        let id = request.id.clone();
        match self.call(&request.method, request.params, context).await {
            Ok(result) => Response::success(id, result),
            Err(error) => Response::error(id, error),
        }
    }
}
