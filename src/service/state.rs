// Copyright (c) 2025 Kaula MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Session lifecycle state.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// Lifecycle of a session. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, handshake not started
    Unconnected,
    /// `initialize` sent, waiting for the server
    AwaitingInit,
    /// Handshake complete; requests may flow
    Ready,
    /// Session ended
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unconnected => "unconnected",
            Self::AwaitingInit => "awaiting-init",
            Self::Ready => "ready",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Observable session state shared by the peer handle and the dispatcher.
#[derive(Debug, Clone)]
pub(crate) struct StateCell {
    tx: Arc<watch::Sender<SessionState>>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Unconnected);
        Self { tx: Arc::new(tx) }
    }

    pub(crate) fn get(&self) -> SessionState {
        *self.tx.borrow()
    }

    /// Moves from `from` to `to`. On failure returns the actual state.
    pub(crate) fn transition(&self, from: SessionState, to: SessionState) -> Result<(), SessionState> {
        let mut outcome = Ok(());
        self.tx.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                outcome = Err(*state);
                false
            }
        });
        outcome
    }

    /// Moves to `Closed`. Returns true only for the call that closed it.
    pub(crate) fn close(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == SessionState::Closed {
                false
            } else {
                *state = SessionState::Closed;
                true
            }
        })
    }

    /// Resolves once the state is `Closed`.
    pub(crate) fn closed(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            let _ = rx.wait_for(|state| *state == SessionState::Closed).await;
        }
    }
}
