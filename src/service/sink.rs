// Copyright (c) 2025 Kaula MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Destinations for inbound notifications.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::protocol::jsonrpc::Notification;

/// Receives every notification the server sends once the session is ready.
///
/// Called from the dispatcher task, so implementations must not block.
pub trait NotificationSink: Send + Sync {
    fn on_notification(&self, notification: Notification);
}

impl<F> NotificationSink for F
where
    F: Fn(Notification) + Send + Sync,
{
    fn on_notification(&self, notification: Notification) {
        self(notification)
    }
}

/// Default sink: logs each notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn on_notification(&self, notification: Notification) {
        tracing::info!(
            method = %notification.method,
            params = ?notification.params,
            "Notification from server"
        );
    }
}

/// Forwards notifications into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    /// Creates a sink and the receiver its notifications arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn on_notification(&self, notification: Notification) {
        if let Err(e) = self.tx.send(notification) {
            tracing::debug!(method = %e.0.method, "Notification receiver dropped");
        }
    }
}

/// Replaceable sink shared between the peer handle and the dispatcher.
#[derive(Clone)]
pub(crate) struct SharedSink {
    current: Arc<RwLock<Arc<dyn NotificationSink>>>,
}

impl Default for SharedSink {
    fn default() -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(TracingSink))),
        }
    }
}

impl SharedSink {
    pub(crate) fn set(&self, sink: Arc<dyn NotificationSink>) {
        *self.current.write() = sink;
    }

    pub(crate) fn deliver(&self, notification: Notification) {
        // Clone out so a slow sink does not hold the lock
        let sink = self.current.read().clone();
        sink.on_notification(notification);
    }
}
