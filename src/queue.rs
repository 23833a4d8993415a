//! Conversation-keyed work queues.
//!
//! Items are grouped by conversation id. A drain snapshots the conversation
//! keys and then takes one conversation's whole sequence at a time, so the
//! lock is only held for the hand-over and never across item processing.
//! Within a conversation items come out in enqueue order; across
//! conversations there is no ordering.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

pub struct WorkQueue<T> {
    pending: Mutex<HashMap<i64, VecDeque<T>>>,
    notify: Notify,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            notify: Notify::new(),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<i64, VecDeque<T>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, conversation_id: i64, item: T) {
        self.pending()
            .entry(conversation_id)
            .or_default()
            .push_back(item);
        self.notify.notify_one();
    }

    /// Total number of queued items.
    pub fn len(&self) -> usize {
        self.pending().values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending().is_empty()
    }

    /// Drop everything queued. Items already handed out by a drain are not
    /// affected.
    pub fn clear(&self) -> usize {
        let dropped: Vec<_> = self.pending().drain().collect();
        dropped.iter().map(|(_, items)| items.len()).sum()
    }

    /// Wait until something was enqueued or [`WorkQueue::wake`] was called.
    /// A signal sent while nobody waits is kept for the next waiter.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Remove and return one conversation's pending items.
    pub fn take(&self, conversation_id: i64) -> Option<VecDeque<T>> {
        self.pending().remove(&conversation_id)
    }

    /// Batches per conversation, taken lazily from a snapshot of the keys
    /// present now. Conversations that show up during the drain wait for the
    /// next one.
    pub fn drain(&self) -> Drain<'_, T> {
        let mut keys: Vec<i64> = self.pending().keys().copied().collect();
        keys.sort_unstable();
        Drain {
            queue: self,
            keys: keys.into_iter(),
        }
    }
}

pub struct Drain<'a, T> {
    queue: &'a WorkQueue<T>,
    keys: std::vec::IntoIter<i64>,
}

impl<T> Iterator for Drain<'_, T> {
    type Item = (i64, VecDeque<T>);

    fn next(&mut self) -> Option<Self::Item> {
        for key in self.keys.by_ref() {
            if let Some(items) = self.queue.take(key) {
                return Some((key, items));
            }
        }
        None
    }
}
