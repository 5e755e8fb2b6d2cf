// Copyright (c) 2025 Kaula MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! In-process transport pair.
//!
//! Frames cross as encoded bytes, so the receiving side runs the same codec
//! as every other transport. Closing either end ends the other end's
//! inbound stream.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{CloseSignal, InboundStream, Transport};
use crate::error::TransportError;
use crate::protocol::jsonrpc::{codec, Message};

type Frame = Vec<u8>;

/// One end of a connected in-memory pair.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
    close: CloseSignal,
}

impl MemoryTransport {
    /// Creates two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (Self::new(a_tx, a_rx), Self::new(b_tx, b_rx))
    }

    fn new(tx: mpsc::UnboundedSender<Frame>, rx: mpsc::UnboundedReceiver<Frame>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            close: CloseSignal::new(),
        }
    }

    /// Sends raw bytes as one frame, bypassing the encoder.
    pub fn send_raw(&self, frame: impl Into<Vec<u8>>) -> Result<(), TransportError> {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame.into()).map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, message: Message) -> Result<(), TransportError> {
        self.send_raw(codec::encode(&message))
    }

    fn receive(&self) -> InboundStream {
        let Some(rx) = self.rx.lock().take() else {
            return stream::empty().boxed();
        };
        let frames = stream::unfold(rx, |mut rx| async move {
            let frame = rx.recv().await?;
            let item = codec::decode(&frame).map_err(TransportError::from);
            Some((item, rx))
        });
        self.close.guard(frames.boxed())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.close.close() {
            self.tx.lock().take();
            self.rx.lock().take();
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
