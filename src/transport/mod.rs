// Copyright (c) 2025 Kaula MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Transports carrying JSON-RPC envelopes between the two peers.
//!
//! A [`Transport`] sends one envelope at a time and hands out a single
//! stream of inbound envelopes. Frames keep their order in each direction.
//! Malformed inbound frames surface as [`TransportError::Decode`] items so
//! the session can log and skip them; any other error item, or the end of
//! the stream, means the connection is gone.
//!
//! Available transports:
//!
//! - [`ByteStreamTransport`]: newline-delimited JSON over any
//!   `AsyncRead`/`AsyncWrite` pair (stdio framing)
//! - [`ChildProcessTransport`]: spawns a server and talks over its stdio
//! - [`SseTransport`]: server-sent events in, HTTP POST out
//! - [`MemoryTransport`]: connected in-process pair

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::watch;

use crate::config::transport::{TransportConfig, TransportKind};
use crate::error::TransportError;
use crate::protocol::jsonrpc::Message;

pub mod byte_stream;
pub mod child_process;
pub mod memory;
pub mod sse;

pub use byte_stream::ByteStreamTransport;
pub use child_process::{ChildProcessTransport, StderrMode};
pub use memory::MemoryTransport;
pub use sse::{SseDecoder, SseEvent, SseTransport};

/// Stream of inbound envelopes handed out by [`Transport::receive`].
pub type InboundStream = BoxStream<'static, Result<Message, TransportError>>;

/// A duplex message channel to the remote peer.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one envelope.
    ///
    /// Fails with [`TransportError::Closed`] once the transport is closed.
    async fn send(&self, message: Message) -> Result<(), TransportError>;

    /// Returns the inbound envelope stream.
    ///
    /// The stream is handed out once; later calls return an empty stream.
    /// It ends when the connection ends or [`close`](Transport::close) runs.
    fn receive(&self) -> InboundStream;

    /// Closes the transport and releases its I/O resources. Idempotent.
    async fn close(&self) -> Result<(), TransportError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str {
        "transport"
    }
}

/// One-shot close flag shared between a transport and its inbound stream.
#[derive(Debug, Clone)]
pub(crate) struct CloseSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CloseSignal {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raises the flag. Returns true only for the first call.
    pub(crate) fn close(&self) -> bool {
        self.tx.send_if_modified(|closed| !std::mem::replace(closed, true))
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the flag is raised.
    pub(crate) fn closed(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            let _ = rx.wait_for(|closed| *closed).await;
        }
    }

    /// Ends `stream` as soon as the flag is raised.
    pub(crate) fn guard(&self, stream: InboundStream) -> InboundStream {
        stream.take_until(self.closed()).boxed()
    }
}

/// Builds the transport described by the configuration.
///
/// Child processes are spawned immediately; SSE transports connect and wait
/// for the server to announce its POST endpoint.
pub async fn connect(config: &TransportConfig) -> Result<Arc<dyn Transport>, TransportError> {
    match config.kind {
        TransportKind::ChildProcess => {
            let transport = ChildProcessTransport::from_config(config)?;
            Ok(Arc::new(transport))
        }
        TransportKind::Sse => {
            let transport = SseTransport::from_config(config).await?;
            Ok(Arc::new(transport))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::time::Duration;

    #[tokio::test]
    async fn test_close_signal_ends_guarded_stream() {
        let signal = CloseSignal::new();
        let mut guarded = signal.guard(stream::pending::<Result<Message, TransportError>>().boxed());

        assert!(signal.close());
        assert!(!signal.close());
        assert!(signal.is_closed());

        let next = tokio::time::timeout(Duration::from_secs(1), guarded.next()).await;
        assert!(matches!(next, Ok(None)));
    }

    #[tokio::test]
    async fn test_closed_after_close_resolves_immediately() {
        let signal = CloseSignal::new();
        signal.close();
        tokio::time::timeout(Duration::from_secs(1), signal.closed())
            .await
            .unwrap();
    }
}
