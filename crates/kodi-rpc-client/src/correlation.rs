//! Correlation of in-flight calls with their responses
//!
//! Every call gets a fresh numeric id and a oneshot slot. Whoever removes the
//! entry from the table (a response, a timeout, a cancellation or a drain)
//! is the only one allowed to settle it, so a call resolves at most once.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use kodi_json_rpc::{JsonRpcResponse, ResponseOutcome};

use crate::error::{KodiClientError, KodiClientResult, UnmatchedResponse};

type CallResult = KodiClientResult<Value>;

/// Why outstanding calls are being failed en masse
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainReason {
    /// The transport dropped underneath the calls
    ConnectionLost(String),
    /// The client was closed locally
    Closed,
}

impl DrainReason {
    fn to_error(&self) -> KodiClientError {
        match self {
            DrainReason::ConnectionLost(reason) => KodiClientError::ConnectionLost(reason.clone()),
            DrainReason::Closed => KodiClientError::ConnectionClosed,
        }
    }
}

/// Diagnostic view of one outstanding call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutstandingCall {
    pub id: u64,
    pub method: String,
    pub age: Duration,
}

struct PendingEntry {
    method: String,
    created_at: Instant,
    sender: oneshot::Sender<CallResult>,
}

struct TableState {
    next_id: u64,
    accepting: bool,
    pending: HashMap<u64, PendingEntry>,
}

impl TableState {
    fn expire(&mut self, id: u64) -> bool {
        match self.pending.remove(&id) {
            Some(entry) => {
                debug!(id = id, method = %entry.method, "Call timed out");
                let _ = entry.sender.send(Err(KodiClientError::Timeout {
                    method: entry.method,
                    timeout: entry.created_at.elapsed(),
                }));
                true
            }
            None => false,
        }
    }

    fn cancel(&mut self, id: u64) -> bool {
        let removed = self.pending.remove(&id).is_some();
        if removed {
            trace!(id = id, "Call cancelled");
        }
        removed
    }
}

/// Table of calls awaiting a response
#[derive(Clone)]
pub struct CorrelationTable {
    state: Arc<Mutex<TableState>>,
}

impl CorrelationTable {
    /// Create an open table; ids start at 1
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TableState {
                next_id: 1,
                accepting: true,
                pending: HashMap::new(),
            })),
        }
    }

    /// Allocate the next id and register a waiting call under it
    pub fn register(&self, method: impl Into<String>) -> KodiClientResult<PendingCall> {
        let method = method.into();
        let (sender, receiver) = oneshot::channel();

        let mut state = self.state.lock();
        if !state.accepting {
            return Err(KodiClientError::NotConnected);
        }

        let id = state.next_id;
        state.next_id += 1;
        state.pending.insert(
            id,
            PendingEntry {
                method: method.clone(),
                created_at: Instant::now(),
                sender,
            },
        );
        drop(state);

        trace!(id = id, method = %method, "Call registered");

        Ok(PendingCall {
            id,
            method,
            receiver,
            table: Arc::downgrade(&self.state),
            settled: false,
        })
    }

    /// Deliver a response to the call it answers
    pub fn resolve(&self, response: JsonRpcResponse) -> Result<(), UnmatchedResponse> {
        let entry = response
            .id
            .as_number()
            .and_then(|id| self.state.lock().pending.remove(&id));

        let Some(entry) = entry else {
            return Err(UnmatchedResponse { id: response.id });
        };

        let result = match response.outcome {
            ResponseOutcome::Result(value) => Ok(value),
            ResponseOutcome::Error(error) => Err(KodiClientError::remote(error)),
        };

        trace!(id = %response.id, method = %entry.method, "Call resolved");
        // The caller may have stopped listening in the meantime
        let _ = entry.sender.send(result);
        Ok(())
    }

    /// Fail a call with a timeout and forget it
    pub fn expire(&self, id: u64) -> bool {
        self.state.lock().expire(id)
    }

    /// Forget a call without settling it
    pub fn cancel(&self, id: u64) -> bool {
        self.state.lock().cancel(id)
    }

    /// Fail every outstanding call and stop accepting new ones
    pub fn drain_all(&self, reason: DrainReason) -> usize {
        let drained: Vec<(u64, PendingEntry)> = {
            let mut state = self.state.lock();
            state.accepting = false;
            state.pending.drain().collect()
        };

        let count = drained.len();
        for (id, entry) in drained {
            trace!(id = id, method = %entry.method, "Call drained");
            let _ = entry.sender.send(Err(reason.to_error()));
        }

        if count > 0 {
            debug!(count = count, reason = ?reason, "Drained outstanding calls");
        }
        count
    }

    /// Accept registrations again after a drain; ids keep counting up
    pub fn reopen(&self) {
        self.state.lock().accepting = true;
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Outstanding calls ordered by id
    pub fn outstanding(&self) -> Vec<OutstandingCall> {
        let mut calls: Vec<OutstandingCall> = self
            .state
            .lock()
            .pending
            .iter()
            .map(|(id, entry)| OutstandingCall {
                id: *id,
                method: entry.method.clone(),
                age: entry.created_at.elapsed(),
            })
            .collect();
        calls.sort_by_key(|call| call.id);
        calls
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CorrelationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CorrelationTable")
            .field("next_id", &state.next_id)
            .field("accepting", &state.accepting)
            .field("pending", &state.pending.len())
            .finish()
    }
}

/// Handle of a caller waiting on one id.
///
/// Dropping it before it settles removes the id from the table.
#[derive(Debug)]
pub struct PendingCall {
    id: u64,
    method: String,
    receiver: oneshot::Receiver<CallResult>,
    table: Weak<Mutex<TableState>>,
    settled: bool,
}

impl PendingCall {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Wait for the call to settle, however long that takes
    pub async fn wait(mut self) -> KodiClientResult<Value> {
        let result = (&mut self.receiver).await;
        self.settled = true;
        result.unwrap_or(Err(KodiClientError::ConnectionClosed))
    }

    /// Wait until `deadline`, then expire the call
    pub async fn wait_until(mut self, deadline: tokio::time::Instant) -> KodiClientResult<Value> {
        if let Ok(result) = tokio::time::timeout_at(deadline, &mut self.receiver).await {
            self.settled = true;
            return result.unwrap_or(Err(KodiClientError::ConnectionClosed));
        }

        // Expiring races with a response arriving right now; whichever
        // removed the entry has already filled the slot.
        let expired = match self.table.upgrade() {
            Some(state) => state.lock().expire(self.id),
            None => false,
        };
        if !expired {
            debug!(id = self.id, "Call settled at its deadline");
        }

        let result = (&mut self.receiver).await;
        self.settled = true;
        result.unwrap_or(Err(KodiClientError::ConnectionClosed))
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if !self.settled
            && let Some(state) = self.table.upgrade()
        {
            state.lock().cancel(self.id);
        }
    }
}
