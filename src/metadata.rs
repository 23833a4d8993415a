//! Metadata cache for users and chats.
//!
//! Lookups go through three tiers: the bounded LRU cache, then the durable
//! store, then a remote fetch. A remote fetch for an id is issued at most
//! once while it is in flight; later misses for the same id see it pending
//! and return without fetching again.

use crate::store::StoreError;
use log::{debug, warn};
use lru::LruCache;
use std::collections::HashSet;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tgcore::records::EntityKind;

/// Where a [`MetadataCache::resolve`] found its answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<V> {
    Cached(V),
    Stored(V),
    /// A remote fetch was started by this call.
    Fetching,
    /// A remote fetch for this id was already running.
    InFlight,
}

impl<V> Resolution<V> {
    pub fn value(self) -> Option<V> {
        match self {
            Resolution::Cached(v) | Resolution::Stored(v) => Some(v),
            Resolution::Fetching | Resolution::InFlight => None,
        }
    }
}

#[derive(Debug)]
pub struct MetadataCache<V> {
    kind: EntityKind,
    entries: Mutex<LruCache<i64, V>>,
    in_flight: Mutex<HashSet<i64>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<V: Clone> MetadataCache<V> {
    pub fn new(kind: EntityKind, capacity: usize) -> Self {
        Self {
            kind,
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Cache lookup; a hit counts as a touch.
    pub fn get(&self, id: i64) -> Option<V> {
        lock(&self.entries).get(&id).cloned()
    }

    pub fn put(&self, id: i64, value: V) {
        // push hands back the replaced entry or the least recently used one
        match lock(&self.entries).push(id, value) {
            Some((evicted, _)) if evicted != id => {
                debug!(target: "Recorder/Metadata", "Evicted {} {evicted} from cache", self.kind.as_str());
            }
            _ => {}
        }
    }

    /// Apply `f` to a cached entry without touching its recency.
    pub fn modify(&self, id: i64, f: impl FnOnce(&mut V)) -> bool {
        match lock(&self.entries).peek_mut(&id) {
            Some(value) => {
                f(value);
                true
            }
            None => false,
        }
    }

    /// Drop a known-stale entry.
    pub fn evict(&self, id: i64) -> Option<V> {
        lock(&self.entries).pop(&id)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Mark a remote fetch as started. Returns `false` if one already is.
    pub fn begin_fetch(&self, id: i64) -> bool {
        lock(&self.in_flight).insert(id)
    }

    pub fn finish_fetch(&self, id: i64) {
        lock(&self.in_flight).remove(&id);
    }

    pub fn is_fetching(&self, id: i64) -> bool {
        lock(&self.in_flight).contains(&id)
    }

    /// Forget all in-flight fetches, e.g. after their continuations were
    /// dropped by a session reset.
    pub fn clear_in_flight(&self) {
        lock(&self.in_flight).clear();
    }

    /// Resolve `id` through cache, store and remote fetch.
    ///
    /// `lookup` reads the durable store; a store error is logged and treated
    /// as a miss. `fetch` starts the remote request and is only called when
    /// no fetch for `id` is in flight. The fetch's completion is expected to
    /// call [`MetadataCache::put`] and [`MetadataCache::finish_fetch`].
    pub async fn resolve<L, F>(&self, id: i64, lookup: L, fetch: F) -> Resolution<V>
    where
        L: Future<Output = Result<Option<V>, StoreError>>,
        F: FnOnce(),
    {
        if let Some(value) = self.get(id) {
            return Resolution::Cached(value);
        }

        match lookup.await {
            Ok(Some(value)) => {
                self.put(id, value.clone());
                return Resolution::Stored(value);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(target: "Recorder/Metadata", "Store lookup for {} {id} failed: {e}", self.kind.as_str());
            }
        }

        if !self.begin_fetch(id) {
            return Resolution::InFlight;
        }
        debug!(target: "Recorder/Metadata", "Fetching {} {id}", self.kind.as_str());
        fetch();
        Resolution::Fetching
    }
}
