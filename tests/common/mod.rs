//! Shared fixtures for the session integration tests.
//!
//! [`CounterServer`] is a small MCP server running on the far end of an
//! in-memory transport pair. It exposes one `increment` tool and a few
//! test-only methods, records everything the client sends, and can issue
//! its own requests and notifications.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kaula_mcp_lib::protocol::jsonrpc::{
    Id, JsonRpcError, Message, Notification, Request, Response,
};
use kaula_mcp_lib::service::{ClientOptions, Peer};
use kaula_mcp_lib::transport::{MemoryTransport, Transport};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long a test waits for something before giving up.
pub const WAIT: Duration = Duration::from_secs(5);

/// Behaviour of a [`CounterServer`].
#[derive(Debug, Clone)]
pub struct ServerSetup {
    /// Declared in the `initialize` result
    pub capabilities: Value,

    /// Tool listing, one entry per page
    pub tool_pages: Vec<Vec<Value>>,
}

impl Default for ServerSetup {
    fn default() -> Self {
        Self {
            capabilities: json!({"tools": {}}),
            tool_pages: vec![vec![increment_tool()]],
        }
    }
}

pub fn increment_tool() -> Value {
    json!({
        "name": "increment",
        "description": "Add one to the counter",
        "inputSchema": {"type": "object", "properties": {}}
    })
}

pub fn named_tool(name: &str) -> Value {
    json!({"name": name, "inputSchema": {"type": "object"}})
}

struct Shared {
    transport: Arc<MemoryTransport>,
    setup: ServerSetup,
    counter: AtomicU64,
    received: Mutex<Vec<Message>>,
    responses: mpsc::UnboundedSender<Response>,
}

/// Server end of an in-memory pair.
pub struct CounterServer {
    shared: Arc<Shared>,
    responses: tokio::sync::Mutex<mpsc::UnboundedReceiver<Response>>,
    task: JoinHandle<()>,
}

impl CounterServer {
    /// Starts a server and returns the client end of the pair with it.
    pub fn start(setup: ServerSetup) -> (Arc<MemoryTransport>, Self) {
        let (client, server) = MemoryTransport::pair();
        let server = Arc::new(server);
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            transport: server,
            setup,
            counter: AtomicU64::new(0),
            received: Mutex::new(Vec::new()),
            responses: tx,
        });

        let task = tokio::spawn(serve(shared.clone()));
        (
            Arc::new(client),
            Self {
                shared,
                responses: tokio::sync::Mutex::new(rx),
                task,
            },
        )
    }

    /// Every frame received so far, in arrival order.
    pub fn received(&self) -> Vec<Message> {
        self.shared.received.lock().clone()
    }

    /// Received requests for `method`.
    pub fn requests(&self, method: &str) -> Vec<Request> {
        self.received()
            .into_iter()
            .filter_map(|message| match message {
                Message::Request(request) if request.method == method => Some(request),
                _ => None,
            })
            .collect()
    }

    /// Received notifications for `method`.
    pub fn notifications(&self, method: &str) -> Vec<Notification> {
        self.received()
            .into_iter()
            .filter_map(|message| match message {
                Message::Notification(n) if n.method == method => Some(n),
                _ => None,
            })
            .collect()
    }

    /// Waits until a notification for `method` has arrived.
    pub async fn wait_for_notification(&self, method: &str) -> Notification {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            if let Some(n) = self.notifications(method).pop() {
                return n;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "no {method} notification arrived"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Waits until `count` requests for `method` have arrived.
    pub async fn wait_for_requests(&self, method: &str, count: usize) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while self.requests(method).len() < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {count} {method} requests"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Sends a request to the client and waits for its response.
    pub async fn request(&self, id: impl Into<Id>, method: &str, params: Option<Value>) -> Response {
        self.send(Message::request(id, method, params)).await;
        let mut responses = self.responses.lock().await;
        tokio::time::timeout(WAIT, responses.recv())
            .await
            .expect("client did not answer")
            .expect("server loop stopped")
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) {
        self.send(Message::notification(method, params)).await;
    }

    pub async fn send(&self, message: Message) {
        self.shared
            .transport
            .send(message)
            .await
            .expect("client end is gone");
    }

    /// Sends bytes as one frame without encoding them.
    pub fn send_raw(&self, frame: impl Into<Vec<u8>>) {
        self.shared
            .transport
            .send_raw(frame)
            .expect("client end is gone");
    }

    /// Hangs up, ending the client's inbound stream.
    pub async fn disconnect(&self) {
        self.shared
            .transport
            .close()
            .await
            .expect("close never fails on a memory transport");
    }
}

impl Drop for CounterServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(shared: Arc<Shared>) {
    let mut inbound = shared.transport.receive();
    while let Some(frame) = inbound.next().await {
        let Ok(message) = frame else { continue };
        shared.received.lock().push(message.clone());
        match message {
            Message::Request(request) => answer(&shared, request).await,
            Message::Response(response) => {
                let _ = shared.responses.send(response);
            }
            Message::Notification(_) => {}
        }
    }
}

async fn answer(shared: &Arc<Shared>, request: Request) {
    let params = request.params.clone().unwrap_or(Value::Null);
    let outcome = match request.method.as_str() {
        "initialize" => Ok(json!({
            "protocolVersion": params["protocolVersion"].clone(),
            "capabilities": shared.setup.capabilities.clone(),
            "serverInfo": {"name": "counter", "version": "0.1.0"},
            "instructions": "Call increment to count."
        })),
        "ping" => Ok(json!({})),
        "tools/list" => list_tools(&shared.setup.tool_pages, &params),
        "tools/call" => call_tool(shared, &params),
        "test/fail" => Err(JsonRpcError::internal_error("boom")),
        "test/hang" => return,
        "test/echo" => {
            // Answers after `delayMs`, so replies can overtake each other
            let delay = params["delayMs"].as_u64().unwrap_or(0);
            let shared = shared.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                let response =
                    Response::success(request.id, json!({"value": params["value"].clone()}));
                let _ = shared.transport.send(response.into()).await;
            });
            return;
        }
        other => Err(JsonRpcError::method_not_found(other)),
    };

    let response = match outcome {
        Ok(result) => Response::success(request.id, result),
        Err(error) => Response::error(request.id, error),
    };
    let _ = shared.transport.send(response.into()).await;
}

fn list_tools(pages: &[Vec<Value>], params: &Value) -> Result<Value, JsonRpcError> {
    let page = match params["cursor"].as_str() {
        None => 0,
        Some(cursor) => cursor
            .strip_prefix("page-")
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|n| *n < pages.len())
            .ok_or_else(|| JsonRpcError::invalid_params(format!("bad cursor {cursor}")))?,
    };

    let mut result = json!({"tools": pages.get(page).cloned().unwrap_or_default()});
    if page + 1 < pages.len() {
        result["nextCursor"] = json!(format!("page-{}", page + 1));
    }
    Ok(result)
}

fn call_tool(shared: &Shared, params: &Value) -> Result<Value, JsonRpcError> {
    match params["name"].as_str() {
        Some("increment") => {
            let value = shared.counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(json!({"content": [{"type": "text", "text": value.to_string()}]}))
        }
        Some(name) => Err(JsonRpcError::invalid_params(format!("Unknown tool: {name}"))),
        None => Err(JsonRpcError::invalid_params("missing tool name")),
    }
}

/// Options with a short request timeout so stuck tests fail quickly.
pub fn options() -> ClientOptions {
    ClientOptions::default().with_request_timeout(Some(WAIT))
}

/// Starts a server with `setup` and an initialized peer connected to it.
pub async fn connect(setup: ServerSetup) -> (Peer, CounterServer) {
    connect_with(setup, options()).await
}

pub async fn connect_with(setup: ServerSetup, options: ClientOptions) -> (Peer, CounterServer) {
    let (client, server) = CounterServer::start(setup);
    let peer = Peer::new(client, options);
    peer.initialize().await.expect("handshake failed");
    (peer, server)
}
