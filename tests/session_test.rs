// Copyright (c) 2025 Kaula MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Integration tests for client sessions.
//! Drives a [`Peer`] against an in-process counter server over the public API.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{connect, connect_with, named_tool, options, CounterServer, ServerSetup, WAIT};
use futures::future::join_all;
use kaula_mcp_lib::error::ServiceError;
use kaula_mcp_lib::protocol::jsonrpc::{
    codec, Id, JsonRpcError, Message, MethodContext, Notification, Response,
};
use kaula_mcp_lib::protocol::model::{
    ClientCapabilities, Content, CreateMessageParams, CreateMessageResult, JsonObject,
    ListRootsResult, Role, Root, RootsCapability, SamplingMessage,
};
use kaula_mcp_lib::service::{NotificationSink, Peer, SessionState};
use kaula_mcp_lib::transport::ByteStreamTransport;
use mockall::mock;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

mock! {
    pub Sink {}

    impl NotificationSink for Sink {
        fn on_notification(&self, notification: Notification);
    }
}

fn sampling_params(text: &str) -> CreateMessageParams {
    CreateMessageParams {
        messages: vec![SamplingMessage {
            role: Role::User,
            content: Content::text(text),
        }],
        model_preferences: None,
        system_prompt: None,
        include_context: None,
        temperature: None,
        max_tokens: 32,
        stop_sequences: None,
        metadata: None,
    }
}

fn echo_model(params: CreateMessageParams) -> Result<CreateMessageResult, JsonRpcError> {
    let text = params
        .messages
        .last()
        .and_then(|message| message.content.as_text())
        .ok_or_else(|| JsonRpcError::invalid_params("no text message"))?;
    Ok(CreateMessageResult {
        model: "echo".to_string(),
        stop_reason: Some("endTurn".to_string()),
        role: Role::Assistant,
        content: Content::text(text.to_uppercase()),
    })
}

#[tokio::test]
async fn test_handshake_negotiates_session() {
    let capabilities = ClientCapabilities {
        sampling: Some(JsonObject::new()),
        ..Default::default()
    };
    let (peer, server) =
        connect_with(ServerSetup::default(), options().with_capabilities(capabilities)).await;

    assert_eq!(peer.state(), SessionState::Ready);
    let info = peer.peer_info().unwrap();
    assert_eq!(info.server_info.name, "counter");
    assert_eq!(info.server_info.version, "0.1.0");
    assert_eq!(info.protocol_version, "2025-03-26");
    assert!(info.capabilities.tools.is_some());
    assert_eq!(info.instructions.as_deref(), Some("Call increment to count."));

    // Wait for the initialized notification to land
    server.wait_for_notification("notifications/initialized").await;
    let received = server.received();
    let Message::Request(initialize) = &received[0] else {
        panic!("first frame must be initialize, got {:?}", received[0]);
    };
    assert_eq!(initialize.method, "initialize");
    let params = initialize.params.clone().unwrap();
    assert_eq!(params["protocolVersion"], "2025-03-26");
    assert_eq!(params["capabilities"], json!({"sampling": {}}));
    assert_eq!(params["clientInfo"]["name"], "kaula_mcp");
    assert!(matches!(&received[1], Message::Notification(n) if n.method == "notifications/initialized"));

    peer.close().await.unwrap();
}

#[tokio::test]
async fn test_list_and_call_tools() {
    let (peer, _server) = connect(ServerSetup::default()).await;

    let tools = peer.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "increment");
    assert_eq!(tools[0].description.as_deref(), Some("Add one to the counter"));

    let first = peer.call_tool("increment", Some(JsonObject::new())).await.unwrap();
    assert_eq!(first.content, vec![Content::text("1")]);
    let second = peer.call_tool("increment", None).await.unwrap();
    assert_eq!(second.text(), "2");
    assert_eq!(peer.pending_requests(), 0);

    peer.close().await.unwrap();
}

#[tokio::test]
async fn test_unknown_tool_is_a_remote_error() {
    let (peer, _server) = connect(ServerSetup::default()).await;

    let err = peer.call_tool("decrement", None).await.unwrap_err();
    assert!(matches!(err, ServiceError::Remote(_)));
    assert_eq!(err.error_code(), Some(-32602));
    assert!(peer.is_ready());
}

#[tokio::test]
async fn test_list_tools_follows_next_cursor() {
    let setup = ServerSetup {
        tool_pages: vec![
            vec![named_tool("a"), named_tool("b")],
            vec![named_tool("c")],
            vec![named_tool("d")],
        ],
        ..Default::default()
    };
    let (peer, server) = connect(setup).await;

    let names: Vec<String> = peer
        .list_tools()
        .await
        .unwrap()
        .into_iter()
        .map(|tool| tool.name)
        .collect();
    assert_eq!(names, ["a", "b", "c", "d"]);

    let cursors: Vec<_> = server
        .requests("tools/list")
        .into_iter()
        .map(|request| request.params.unwrap_or_default()["cursor"].clone())
        .collect();
    assert_eq!(cursors, [json!(null), json!("page-1"), json!("page-2")]);

    let page = peer.list_tools_page(Some("page-1".to_string())).await.unwrap();
    assert_eq!(page.tools.len(), 1);
    assert_eq!(page.next_cursor.as_deref(), Some("page-2"));
}

#[tokio::test]
async fn test_tool_calls_require_tools_capability() {
    let setup = ServerSetup {
        capabilities: json!({"logging": {}}),
        ..Default::default()
    };
    let (peer, server) = connect(setup).await;
    server.wait_for_notification("notifications/initialized").await;

    let err = peer.list_tools().await.unwrap_err();
    assert!(matches!(err, ServiceError::CapabilityNotSupported("tools")));
    let err = peer.call_tool("increment", None).await.unwrap_err();
    assert!(matches!(err, ServiceError::CapabilityNotSupported("tools")));

    // Ping needs no capability
    peer.ping().await.unwrap();
    assert!(server.requests("tools/list").is_empty());
    assert!(server.requests("tools/call").is_empty());
}

#[tokio::test]
async fn test_uninitialized_session_sends_nothing() {
    let (client, server) = CounterServer::start(ServerSetup::default());
    let peer = Peer::new(client, options());
    assert_eq!(peer.state(), SessionState::Unconnected);

    assert!(matches!(peer.ping().await, Err(ServiceError::NotInitialized)));
    assert!(matches!(
        peer.send_notification("notifications/roots/list_changed", None).await,
        Err(ServiceError::NotInitialized)
    ));
    assert!(matches!(peer.list_tools().await, Err(ServiceError::NotInitialized)));
    assert!(matches!(peer.peer_info(), Err(ServiceError::NotInitialized)));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(server.received().is_empty());
    assert_eq!(peer.pending_requests(), 0);
}

#[tokio::test]
async fn test_server_ping_is_answered() {
    let (peer, server) = connect(ServerSetup::default()).await;

    let response = server.request(100, "ping", None).await;
    assert_eq!(response.id, Id::from(100));
    assert_eq!(response.result, Some(json!({})));
    assert!(peer.is_ready());
}

#[tokio::test]
async fn test_unhandled_server_request_gets_method_not_found() {
    let (peer, server) = connect(ServerSetup::default()).await;

    let params = serde_json::to_value(sampling_params("hi")).unwrap();
    let response = server
        .request(7, "sampling/createMessage", Some(params))
        .await;
    assert_eq!(response.id, Id::from(7));
    assert_eq!(response.error.map(|e| e.code), Some(-32601));

    // The session survives
    assert!(peer.is_ready());
    peer.ping().await.unwrap();
}

#[tokio::test]
async fn test_sampling_handler_answers_server() {
    let (peer, server) = connect(ServerSetup::default()).await;
    peer.on_create_message(|params| async move { echo_model(params) });

    let params = serde_json::to_value(sampling_params("hello")).unwrap();
    let response = server
        .request("s-1", "sampling/createMessage", Some(params))
        .await;
    assert_eq!(response.id, Id::from("s-1"));
    assert_eq!(
        response.result,
        Some(json!({
            "model": "echo",
            "stopReason": "endTurn",
            "role": "assistant",
            "content": {"type": "text", "text": "HELLO"}
        }))
    );

    // Params that do not parse are rejected without reaching the handler
    let response = server
        .request("s-2", "sampling/createMessage", Some(json!({"messages": 3})))
        .await;
    assert_eq!(response.error.map(|e| e.code), Some(-32602));
}

#[tokio::test]
async fn test_roots_handler_answers_server() {
    let capabilities = ClientCapabilities {
        roots: Some(RootsCapability::default()),
        ..Default::default()
    };
    let (peer, server) =
        connect_with(ServerSetup::default(), options().with_capabilities(capabilities)).await;
    peer.on_list_roots(|| async {
        Ok(ListRootsResult {
            roots: vec![Root {
                uri: "file:///workspace".to_string(),
                name: Some("workspace".to_string()),
            }],
        })
    });

    let response = server.request(3, "roots/list", None).await;
    assert_eq!(
        response.result,
        Some(json!({"roots": [{"uri": "file:///workspace", "name": "workspace"}]}))
    );
}

#[tokio::test]
async fn test_local_handlers_can_be_invoked_directly() {
    let (client, _server) = CounterServer::start(ServerSetup::default());
    let peer = Peer::new(client, options());

    let err = peer.list_roots().await.unwrap_err();
    assert!(matches!(err, ServiceError::Handler(_)));
    assert!(err.is_method_not_found());

    peer.on_list_roots(|| async { Ok(ListRootsResult::default()) });
    peer.on_create_message(|params| async move { echo_model(params) });

    assert!(peer.list_roots().await.unwrap().roots.is_empty());
    let result = peer.create_message(sampling_params("quiet")).await.unwrap();
    assert_eq!(result.content.as_text(), Some("QUIET"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_resolve_out_of_order() {
    let (peer, server) = connect(ServerSetup::default()).await;
    const N: u64 = 20;

    // Later requests answer first
    let calls = (0..N).map(|i| {
        let peer = peer.clone();
        async move {
            let params = json!({"value": i, "delayMs": (N - i) * 5});
            let result = peer.send_request("test/echo", Some(params)).await;
            (i, result)
        }
    });
    for (i, result) in join_all(calls).await {
        assert_eq!(result.unwrap(), json!({"value": i}), "request {i} got a foreign result");
    }

    assert_eq!(peer.pending_requests(), 0);
    let ids: std::collections::HashSet<Id> = server
        .requests("test/echo")
        .into_iter()
        .map(|request| request.id)
        .collect();
    assert_eq!(ids.len(), N as usize);
}

#[tokio::test]
async fn test_remote_error_reaches_only_its_caller() {
    let (peer, _server) = connect(ServerSetup::default()).await;

    let failing = peer.send_request("test/fail", None);
    let echo = peer.send_request("test/echo", Some(json!({"value": "ok", "delayMs": 10})));
    let (failing, echo) = tokio::join!(failing, echo);

    match failing {
        Err(ServiceError::Remote(error)) => {
            assert_eq!(error.code, -32603);
            assert_eq!(error.message, "boom");
        }
        other => panic!("expected remote error, got {other:?}"),
    }
    assert_eq!(echo.unwrap(), json!({"value": "ok"}));
    assert!(peer.is_ready());
}

#[tokio::test]
async fn test_unknown_method_is_remote_method_not_found() {
    let (peer, _server) = connect(ServerSetup::default()).await;

    let err = peer.send_request("resources/list", None).await.unwrap_err();
    assert!(err.is_method_not_found());
    assert_eq!(peer.pending_requests(), 0);
}

#[tokio::test]
async fn test_timeout_releases_entry_and_cancels_remotely() {
    let (peer, server) = connect(ServerSetup::default()).await;

    let limit = Duration::from_millis(50);
    let err = peer
        .send_request_with_timeout("test/hang", None, Some(limit))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Timeout(d) if d == limit));
    assert_eq!(peer.pending_requests(), 0);

    let hung = server.requests("test/hang").remove(0);
    let cancelled = server.wait_for_notification("notifications/cancelled").await;
    let params = cancelled.params.unwrap();
    assert_eq!(params["requestId"], serde_json::to_value(&hung.id).unwrap());
    assert_eq!(params["reason"], "request timed out");

    // A late answer is dropped and the session carries on
    server
        .send(Message::Response(Response::success(hung.id, json!({}))))
        .await;
    peer.ping().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_fails_every_pending_request() {
    let (peer, server) = connect(ServerSetup::default()).await;
    const K: usize = 5;

    let waiting: Vec<_> = (0..K)
        .map(|_| {
            let peer = peer.clone();
            tokio::spawn(async move { peer.send_request("test/hang", None).await })
        })
        .collect();
    server.wait_for_requests("test/hang", K).await;
    assert_eq!(peer.pending_requests(), K);

    server.disconnect().await;

    for handle in waiting {
        let err = tokio::time::timeout(WAIT, handle)
            .await
            .expect("request still pending after disconnect")
            .unwrap()
            .unwrap_err();
        assert!(err.is_closed(), "unexpected error: {err:?}");
    }
    assert_eq!(peer.pending_requests(), 0);

    tokio::time::timeout(WAIT, peer.closed()).await.unwrap();
    assert_eq!(peer.state(), SessionState::Closed);
    assert!(peer.ping().await.unwrap_err().is_closed());
}

#[tokio::test]
async fn test_server_cancellation_aborts_handler() {
    let (peer, server) = connect(ServerSetup::default()).await;
    peer.register_handler("test/slow", |_params, _ctx: MethodContext| async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(json!({"done": true}))
    });

    server
        .send(Message::request(55, "test/slow", None))
        .await;
    server
        .notify(
            "notifications/cancelled",
            Some(json!({"requestId": 55, "reason": "no longer needed"})),
        )
        .await;

    // The next response belongs to the ping; the slow request never answers
    let response = server.request(56, "ping", None).await;
    assert_eq!(response.id, Id::from(56));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(server
        .received()
        .iter()
        .all(|message| !matches!(message, Message::Response(r) if r.id == Id::from(55))));
}

#[tokio::test]
async fn test_notifications_reach_sink_in_order() {
    let (peer, server) = connect(ServerSetup::default()).await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut sink = MockSink::new();
    sink.expect_on_notification()
        .times(2)
        .returning(move |notification| {
            let _ = tx.send(notification.method);
        });
    peer.set_notification_sink(Arc::new(sink));

    server
        .notify("notifications/tools/list_changed", None)
        .await;
    server
        .notify(
            "notifications/message",
            Some(json!({"level": "info", "logger": "counter", "data": "counted"})),
        )
        .await;

    let first = tokio::time::timeout(WAIT, rx.recv()).await.unwrap();
    let second = tokio::time::timeout(WAIT, rx.recv()).await.unwrap();
    assert_eq!(first.as_deref(), Some("notifications/tools/list_changed"));
    assert_eq!(second.as_deref(), Some("notifications/message"));

    // Dropping the last handle verifies the call count
    peer.close().await.unwrap();
    drop(peer);
}

#[tokio::test]
async fn test_roots_list_changed_requires_declared_capability() {
    let (peer, server) = connect(ServerSetup::default()).await;
    let err = peer.notify_roots_list_changed().await.unwrap_err();
    assert!(matches!(err, ServiceError::CapabilityNotSupported("roots.listChanged")));
    peer.close().await.unwrap();
    drop(server);

    let capabilities = ClientCapabilities {
        roots: Some(RootsCapability {
            list_changed: Some(true),
        }),
        ..Default::default()
    };
    let (peer, server) =
        connect_with(ServerSetup::default(), options().with_capabilities(capabilities)).await;
    peer.notify_roots_list_changed().await.unwrap();
    server
        .wait_for_notification("notifications/roots/list_changed")
        .await;
}

#[tokio::test]
async fn test_close_ends_session_for_every_clone() {
    let (peer, _server) = connect(ServerSetup::default()).await;
    let other = peer.clone();

    peer.close().await.unwrap();
    peer.close().await.unwrap();

    assert_eq!(other.state(), SessionState::Closed);
    assert!(other.ping().await.unwrap_err().is_closed());
    assert!(matches!(
        other.initialize().await,
        Err(ServiceError::Handshake(_))
    ));
}

#[tokio::test]
async fn test_malformed_frames_after_handshake_are_skipped() {
    let (peer, server) = connect(ServerSetup::default()).await;

    server.send_raw(&b"{not json"[..]);
    // Missing the jsonrpc member
    server.send_raw(&br#"{"id":41,"method":"ping"}"#[..]);
    server.send_raw(&b"[1,2]"[..]);

    peer.ping().await.unwrap();
    assert_eq!(peer.state(), SessionState::Ready);
    assert!(server
        .received()
        .iter()
        .all(|message| !matches!(message, Message::Response(r) if r.id == Id::from(41))));
}

#[tokio::test]
async fn test_invalid_utf8_over_byte_stream_keeps_session_open() {
    let (client_io, server_io) = tokio::io::duplex(8192);
    let (client_read, client_write) = tokio::io::split(client_io);
    let peer = Peer::new(
        Arc::new(ByteStreamTransport::new(client_read, client_write)),
        options(),
    );
    let (server_read, mut server_write) = tokio::io::split(server_io);
    let mut lines = BufReader::new(server_read).lines();

    let handshake = async {
        let line = lines.next_line().await.unwrap().unwrap();
        let Message::Request(request) = codec::decode(line.as_bytes()).unwrap() else {
            panic!("expected initialize, got {line}");
        };
        assert_eq!(request.method, "initialize");
        let reply = Response::success(
            request.id,
            json!({
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "serverInfo": {"name": "raw", "version": "0.0.1"}
            }),
        );
        server_write
            .write_all(&codec::encode_line(&reply.into()))
            .await
            .unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        assert!(line.contains("notifications/initialized"));
    };
    let (info, ()) = tokio::join!(peer.initialize(), handshake);
    info.unwrap();

    server_write.write_all(&[0xff, 0xfe, b'\n']).await.unwrap();

    let answer = async {
        let line = lines.next_line().await.unwrap().unwrap();
        let Message::Request(request) = codec::decode(line.as_bytes()).unwrap() else {
            panic!("expected ping, got {line}");
        };
        assert_eq!(request.method, "ping");
        let reply = Response::success(request.id, json!({}));
        server_write
            .write_all(&codec::encode_line(&reply.into()))
            .await
            .unwrap();
    };
    let (pong, ()) = tokio::join!(peer.ping(), answer);
    pong.unwrap();
    assert_eq!(peer.state(), SessionState::Ready);
    peer.close().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_in_flight_request_id_is_rejected() {
    let (peer, server) = connect(ServerSetup::default()).await;
    peer.register_handler("test/slow", |_params, _ctx: MethodContext| async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(json!({"done": true}))
    });

    server
        .send(Message::request(70, "test/slow", None))
        .await;
    let response = server.request(70, "test/slow", None).await;
    assert_eq!(response.id, Id::from(70));
    assert_eq!(response.error.map(|e| e.code), Some(-32600));

    // The first request still owns the id and can be cancelled by it
    server
        .notify(
            "notifications/cancelled",
            Some(json!({"requestId": 70, "reason": "done waiting"})),
        )
        .await;
    let response = server.request(71, "ping", None).await;
    assert_eq!(response.id, Id::from(71));
    tokio::time::sleep(Duration::from_millis(20)).await;
    let answers = server
        .received()
        .iter()
        .filter(|message| matches!(message, Message::Response(r) if r.id == Id::from(70)))
        .count();
    assert_eq!(answers, 1);
}
