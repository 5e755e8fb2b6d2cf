// Copyright (c) 2025 Kaula MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Newline-delimited JSON over an async byte stream.
//!
//! Each envelope is one line of JSON terminated by `\n`. Blank lines are
//! ignored. Writes are serialized so frames never interleave.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex as AsyncMutex;

use super::{CloseSignal, InboundStream, Transport};
use crate::error::TransportError;
use crate::protocol::jsonrpc::{codec, Message};

/// Transport over a reader/writer pair, such as a child's stdout/stdin or
/// the process's own stdin/stdout.
pub struct ByteStreamTransport<R, W> {
    reader: Mutex<Option<R>>,
    writer: AsyncMutex<Option<W>>,
    close: CloseSignal,
}

impl<R, W> std::fmt::Debug for ByteStreamTransport<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStreamTransport")
            .field("closed", &self.close.is_closed())
            .finish()
    }
}

impl<R, W> ByteStreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Creates a transport reading frames from `reader` and writing frames
    /// to `writer`.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(Some(reader)),
            writer: AsyncMutex::new(Some(writer)),
            close: CloseSignal::new(),
        }
    }

    /// Returns true once `close` has run.
    pub fn is_closed(&self) -> bool {
        self.close.is_closed()
    }
}

impl ByteStreamTransport<tokio::io::Stdin, tokio::io::Stdout> {
    /// Transport over this process's stdin and stdout.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

/// Turns a buffered reader into a stream of decoded envelopes, one per
/// line. Lines that fail to decode, invalid UTF-8 included, surface as
/// decode errors; the stream ends after the first I/O error.
fn frames<R>(reader: BufReader<R>) -> InboundStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream::unfold(Some((reader, Vec::new())), |state| async move {
        let (mut reader, mut buf) = state?;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => return None,
                Ok(_) => {
                    let frame = trim_frame(&buf);
                    if frame.is_empty() {
                        continue;
                    }
                    tracing::trace!(frame = %String::from_utf8_lossy(frame), "Received frame");
                    let item = codec::decode(frame).map_err(TransportError::from);
                    return Some((item, Some((reader, buf))));
                }
                Err(e) => return Some((Err(TransportError::Io(e)), None)),
            }
        }
    })
    .boxed()
}

/// Strips surrounding ASCII whitespace, including the `\r\n` terminator.
fn trim_frame(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

#[async_trait]
impl<R, W> Transport for ByteStreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, message: Message) -> Result<(), TransportError> {
        let frame = codec::encode_line(&message);
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    fn receive(&self) -> InboundStream {
        match self.reader.lock().take() {
            Some(reader) => self.close.guard(frames(BufReader::new(reader))),
            None => stream::empty().boxed(),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.close.close() {
            return Ok(());
        }
        // Drop an unclaimed reader so its resource is released too
        drop(self.reader.lock().take());
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(error = %e, "Error shutting down writer");
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "byte-stream"
    }
}
