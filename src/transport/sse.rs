// Copyright (c) 2025 Kaula MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Server-sent events transport.
//!
//! The client opens a GET event stream. The server's first `endpoint` event
//! carries the URL (relative to the stream URL) that outbound envelopes are
//! POSTed to; every `message` event carries one inbound envelope.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use url::Url;

use super::{CloseSignal, InboundStream, Transport};
use crate::config::transport::TransportConfig;
use crate::error::TransportError;
use crate::protocol::jsonrpc::{codec, Message};

const EVENT_ENDPOINT: &str = "endpoint";
const EVENT_MESSAGE: &str = "message";

/// One dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type; `message` when the server sent no `event:` field
    pub event: String,
    /// Data lines joined with `\n`
    pub data: String,
    pub id: Option<String>,
}

/// Incremental SSE parser.
///
/// Bytes may be split anywhere, including inside a UTF-8 sequence or a line
/// ending; events are returned once their terminating blank line arrives.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns the events it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.trim_end_matches('\r');
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event: event.unwrap_or_else(|| EVENT_MESSAGE.to_string()),
            data: std::mem::take(&mut self.data).join("\n"),
            id: self.id.clone(),
        })
    }
}

type EventStream = BoxStream<'static, Result<SseEvent, TransportError>>;

/// Parses a byte stream into SSE events.
fn events<S, B>(bytes: S) -> EventStream
where
    S: futures::Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]>,
{
    bytes
        .scan(SseDecoder::new(), |decoder, chunk| {
            let items: Vec<Result<SseEvent, TransportError>> = match chunk {
                Ok(chunk) => decoder.feed(chunk.as_ref()).into_iter().map(Ok).collect(),
                Err(e) => vec![Err(TransportError::Http(e))],
            };
            futures::future::ready(Some(stream::iter(items)))
        })
        .flatten()
        .boxed()
}

/// Transport talking to an SSE server over HTTP.
pub struct SseTransport {
    client: reqwest::Client,
    endpoint: Url,
    inbound: Mutex<Option<EventStream>>,
    close: CloseSignal,
}

impl std::fmt::Debug for SseTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseTransport")
            .field("endpoint", &self.endpoint.as_str())
            .field("closed", &self.close.is_closed())
            .finish()
    }
}

impl SseTransport {
    /// Opens the event stream at `url` and waits for the endpoint event.
    pub async fn connect(url: Url, connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;

        let response = client
            .get(url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?
            .error_for_status()?;

        let mut events = events(response.bytes_stream());
        let endpoint = tokio::time::timeout(connect_timeout, wait_for_endpoint(&mut events, &url))
            .await
            .map_err(|_| TransportError::Timeout(connect_timeout.as_millis() as u64))??;

        tracing::info!(stream = %url, endpoint = %endpoint, "SSE transport connected");

        Ok(Self {
            client,
            endpoint,
            inbound: Mutex::new(Some(events)),
            close: CloseSignal::new(),
        })
    }

    /// Connects to the URL named by a transport configuration.
    pub async fn from_config(config: &TransportConfig) -> Result<Self, TransportError> {
        let raw = config
            .url
            .as_deref()
            .ok_or_else(|| TransportError::InvalidEndpoint("no url configured".to_string()))?;
        let url = Url::parse(raw)
            .map_err(|e| TransportError::InvalidEndpoint(format!("{raw}: {e}")))?;
        Self::connect(url, Duration::from_millis(config.connect_timeout_ms)).await
    }

    /// URL outbound envelopes are POSTed to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

async fn wait_for_endpoint(events: &mut EventStream, base: &Url) -> Result<Url, TransportError> {
    while let Some(event) = events.next().await {
        let event = event?;
        if event.event == EVENT_ENDPOINT {
            return resolve_endpoint(base, &event.data);
        }
        tracing::debug!(event = %event.event, "Skipping event before endpoint");
    }
    Err(TransportError::Sse(
        "stream ended before the endpoint event".to_string(),
    ))
}

/// Resolves the announced endpoint against the stream URL.
pub(crate) fn resolve_endpoint(base: &Url, announced: &str) -> Result<Url, TransportError> {
    base.join(announced.trim())
        .map_err(|e| TransportError::InvalidEndpoint(format!("{announced}: {e}")))
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&self, message: Message) -> Result<(), TransportError> {
        if self.close.is_closed() {
            return Err(TransportError::Closed);
        }
        self.client
            .post(self.endpoint.clone())
            .json(&message)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn receive(&self) -> InboundStream {
        let Some(events) = self.inbound.lock().take() else {
            return stream::empty().boxed();
        };
        let messages = events.filter_map(|event| async move {
            match event {
                Ok(event) if event.event == EVENT_MESSAGE => {
                    Some(codec::decode_str(&event.data).map_err(TransportError::from))
                }
                Ok(event) => {
                    tracing::debug!(event = %event.event, "Ignoring SSE event");
                    None
                }
                Err(e) => Some(Err(e)),
            }
        });
        self.close.guard(messages.boxed())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.close.close() {
            // Dropping the unclaimed stream closes the HTTP connection
            drop(self.inbound.lock().take());
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sse"
    }
}
