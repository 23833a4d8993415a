//! Request/response correlation.
//!
//! Every outgoing request gets a fresh id from a monotonic counter. A request
//! may register a continuation, which runs at most once: on the first
//! response carrying its id. Responses for ids with no continuation (already
//! completed, fire-and-forget, or dropped by a reset) are ignored.

use crate::api::PUSH_EVENT_ID;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Callback run with the response, or `None` when the collaborator reported
/// that no response object exists for the request.
pub type Continuation<T> = Box<dyn FnOnce(Option<T>) + Send + 'static>;

pub struct Correlator<T> {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, Continuation<T>>>,
}

impl<T> Default for Correlator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Correlator<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(PUSH_EVENT_ID + 1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u64, Continuation<T>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate the id for a new request and remember its continuation.
    pub fn register(&self, continuation: Option<Continuation<T>>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Some(continuation) = continuation {
            self.pending().insert(id, continuation);
        }
        id
    }

    /// Run and forget the continuation for `request_id`. Returns `false` if
    /// there was nothing to run.
    ///
    /// The continuation runs after the internal lock is released, so it may
    /// register new requests.
    pub fn complete(&self, request_id: u64, response: Option<T>) -> bool {
        if request_id == PUSH_EVENT_ID {
            return false;
        }
        let continuation = self.pending().remove(&request_id);
        match continuation {
            Some(continuation) => {
                continuation(response);
                true
            }
            None => false,
        }
    }

    /// Forget a continuation without running it.
    pub fn cancel(&self, request_id: u64) -> bool {
        self.pending().remove(&request_id).is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    /// Drop every outstanding continuation. Ids keep counting up so that a
    /// late response can never be mistaken for a new request.
    pub fn reset(&self) -> usize {
        let dropped: Vec<_> = self.pending().drain().collect();
        dropped.len()
    }
}
