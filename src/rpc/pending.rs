//! The table of requests awaiting a response.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::protocol::RequestId;
use crate::{Error, Result};

/// What a waiting caller eventually receives.
pub(crate) type Outcome = Result<Value>;

/// A request that has been written (or is about to be) and not yet settled.
#[derive(Debug)]
struct PendingRequest {
    method: String,
    created_at: Instant,
    waiter: oneshot::Sender<Outcome>,
}

impl PendingRequest {
    /// Deliver the outcome. Consumes the entry, so it can only happen once.
    fn settle(self, outcome: Outcome) {
        // The receiver is gone if the caller was dropped between our removal
        // and this send; nothing is waiting for the value then.
        let _ = self.waiter.send(outcome);
    }
}

#[derive(Debug, Default)]
struct TableState {
    closed: bool,
    entries: HashMap<RequestId, PendingRequest>,
}

/// Identifier → waiter map shared by callers and the reader task.
///
/// Every mutation happens under one mutex that is never held across an
/// `await`. An entry leaves the table exactly once, through
/// [`settle`](Self::settle), [`remove`](Self::remove) or
/// [`close`](Self::close); whichever takes it first is the only one that can
/// reach the waiter.
#[derive(Debug, Default)]
pub(crate) struct PendingTable {
    state: Mutex<TableState>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a waiter for `id`.
    ///
    /// Fails with [`Error::ConnectionClosed`] once the table is closed, so no
    /// entry can be added after teardown.
    pub(crate) fn register(&self, id: RequestId, method: &str) -> Result<oneshot::Receiver<Outcome>> {
        let mut state = self.lock();
        if state.closed {
            return Err(Error::ConnectionClosed);
        }

        let (tx, rx) = oneshot::channel();
        let previous = state.entries.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                created_at: Instant::now(),
                waiter: tx,
            },
        );
        debug_assert!(previous.is_none(), "request id {id} registered twice");
        Ok(rx)
    }

    /// Settle the waiter for `id` with `outcome`.
    ///
    /// Returns `false` if nothing was waiting for `id`.
    pub(crate) fn settle(&self, id: RequestId, outcome: Outcome) -> bool {
        let entry = self.lock().entries.remove(&id);
        match entry {
            Some(request) => {
                tracing::debug!(
                    %id,
                    method = %request.method,
                    elapsed = ?request.created_at.elapsed(),
                    ok = outcome.is_ok(),
                    "request settled"
                );
                request.settle(outcome);
                true
            }
            None => false,
        }
    }

    /// Drop the waiter for `id` without settling it.
    ///
    /// Returns how long the request had been pending, or `None` if it was
    /// already gone.
    pub(crate) fn remove(&self, id: RequestId) -> Option<Duration> {
        self.lock()
            .entries
            .remove(&id)
            .map(|request| request.created_at.elapsed())
    }

    /// Close the table and fail every waiter with [`Error::ConnectionClosed`].
    ///
    /// Returns the number of requests that were failed. Closing twice is a
    /// no-op.
    pub(crate) fn close(&self) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut state = self.lock();
            state.closed = true;
            state.entries.drain().map(|(_, request)| request).collect()
        };

        let count = drained.len();
        for request in drained {
            request.settle(Err(Error::ConnectionClosed));
        }
        count
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Identifiers currently pending, in ascending order.
    pub(crate) fn ids(&self) -> Vec<RequestId> {
        let mut ids: Vec<RequestId> = self.lock().entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
