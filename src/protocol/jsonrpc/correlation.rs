// Copyright (c) 2025 Kaula MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! JSON-RPC 2.0 request/response correlation.
//!
//! The [`CorrelationTable`] maps every outstanding request id to a one-shot
//! slot. The dispatcher fulfills slots as responses arrive; callers await the
//! matching [`PendingResponse`]. Dropping a `PendingResponse` before it
//! resolves (timeout, caller gave up) removes its entry, so late responses
//! find nothing to deliver to and cannot leak.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use fnv::FnvHashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::types::{Id, Response};

/// First id handed out by a fresh table.
const FIRST_REQUEST_ID: i64 = 1;

/// Error indicating a correlation issue.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CorrelationError {
    /// The id is already registered and still outstanding.
    #[error("Request id {0} is already outstanding")]
    DuplicateId(Id),

    /// A response arrived for an id nobody is waiting on.
    #[error("No outstanding request with id {0}")]
    UnknownId(Id),

    /// The session ended before a response arrived.
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// The slot was dropped without being fulfilled.
    #[error("Response channel closed")]
    ChannelClosed,
}

type Outcome = Result<Response, CorrelationError>;

#[derive(Debug, Default)]
struct TableState {
    pending: FnvHashMap<Id, oneshot::Sender<Outcome>>,
    closed: Option<String>,
}

/// Tracks outstanding requests for one session.
///
/// Cloning is cheap and every clone shares the same table.
#[derive(Debug, Clone)]
pub struct CorrelationTable {
    state: Arc<Mutex<TableState>>,
    next_id: Arc<AtomicI64>,
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationTable {
    /// Creates an empty table whose id generator starts at 1.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TableState::default())),
            next_id: Arc::new(AtomicI64::new(FIRST_REQUEST_ID)),
        }
    }

    /// Allocates the next request id. Ids increase monotonically and are
    /// never handed out twice by the same table.
    pub fn next_id(&self) -> Id {
        Id::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers an outstanding request and returns the slot its response
    /// will be delivered to.
    pub fn register(&self, id: Id) -> Result<PendingResponse, CorrelationError> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.closed {
            return Err(CorrelationError::SessionClosed(reason.clone()));
        }
        if state.pending.contains_key(&id) {
            return Err(CorrelationError::DuplicateId(id));
        }

        let (tx, rx) = oneshot::channel();
        state.pending.insert(id.clone(), tx);

        Ok(PendingResponse {
            id,
            rx,
            table: Arc::downgrade(&self.state),
            settled: false,
        })
    }

    /// Delivers a response to the request that is waiting for it.
    ///
    /// Returns `UnknownId` when no such request is outstanding, which happens
    /// for late responses to abandoned requests. Callers treat that as
    /// non-fatal.
    pub fn fulfill(&self, response: Response) -> Result<(), CorrelationError> {
        let sender = self.state.lock().pending.remove(&response.id);
        match sender {
            Some(sender) => {
                let id = response.id.clone();
                if sender.send(Ok(response)).is_err() {
                    tracing::debug!(%id, "Caller stopped waiting before the response arrived");
                }
                Ok(())
            }
            None => Err(CorrelationError::UnknownId(response.id)),
        }
    }

    /// Removes an outstanding request without resolving it.
    pub fn remove(&self, id: &Id) -> bool {
        self.state.lock().pending.remove(id).is_some()
    }

    /// Fails every outstanding request with a session-closed error and
    /// refuses new registrations.
    ///
    /// Returns the number of requests that were cancelled.
    pub fn cancel_all(&self, reason: impl Into<String>) -> usize {
        let reason = reason.into();
        let drained: Vec<_> = {
            let mut state = self.state.lock();
            if state.closed.is_none() {
                state.closed = Some(reason.clone());
            }
            state.pending.drain().collect()
        };

        let count = drained.len();
        for (_, sender) in drained {
            let _ = sender.send(Err(CorrelationError::SessionClosed(reason.clone())));
        }
        count
    }

    /// Returns true once `cancel_all` has run.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed.is_some()
    }

    /// Returns true if the id is outstanding.
    pub fn contains(&self, id: &Id) -> bool {
        self.state.lock().pending.contains_key(id)
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Returns true if no request is outstanding.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A one-shot slot awaiting the response to a single request.
#[derive(Debug)]
#[must_use = "dropping a PendingResponse abandons the request"]
pub struct PendingResponse {
    id: Id,
    rx: oneshot::Receiver<Outcome>,
    table: Weak<Mutex<TableState>>,
    settled: bool,
}

impl PendingResponse {
    /// The id of the request this slot belongs to.
    pub fn id(&self) -> &Id {
        &self.id
    }
}

impl Future for PendingResponse {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(outcome) => {
                this.settled = true;
                Poll::Ready(outcome.unwrap_or(Err(CorrelationError::ChannelClosed)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(state) = self.table.upgrade() {
            if state.lock().pending.remove(&self.id).is_some() {
                tracing::debug!(id = %self.id, "Abandoned request removed from correlation table");
            }
        }
    }
}
