//! Forensic Data Store
//!
//! Recorded events indexed by `(kind, stream key)`. Each stream keeps its
//! events ordered by sequence number plus a replay cursor, so consumption
//! order matches recording order no matter when the asynchronous inserts
//! land.
//!
//! ```text
//! recorder ──insert_tagged(epoch, e)──► streams[(kind, key)] ──next()──► call site
//!                                            │
//!                                            └─► backlog[(kind, key)] ──► waiting consumer
//! ```
//!
//! Streams for distinct keys live in separate `DashMap` entries behind their
//! own mutex; inserts for one key never block readers of another.

mod backlog;
mod epoch;

pub use backlog::{Backlog, Continuation};
pub use epoch::{EpochGuard, SessionEpoch};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::event::{Event, EventKind};

/// Index key of a stream
pub type StreamId = (EventKind, String);

#[derive(Debug, Default)]
struct EventStream {
    events: Vec<Arc<Event>>,
    cursor: usize,
}

impl EventStream {
    fn push(&mut self, event: Arc<Event>) {
        // stable among equal sequence numbers; never behind the cursor
        let at = self
            .events
            .partition_point(|e| e.sequence_number <= event.sequence_number)
            .max(self.cursor);
        self.events.insert(at, event);
    }

    fn pop(&mut self) -> Option<Arc<Event>> {
        let event = self.events.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(event)
    }

    fn peek(&self) -> Option<Arc<Event>> {
        self.events.get(self.cursor).cloned()
    }

    fn remaining(&self) -> usize {
        self.events.len() - self.cursor
    }
}

/// Result of [`ForensicDataStore::next_or_wait`]
pub enum Awaited {
    /// The event was already there
    Ready(Arc<Event>),
    /// The continuation will run when the event is inserted
    Pending,
    /// Another consumer is already waiting on this stream; the continuation
    /// was not registered
    Occupied,
}

impl std::fmt::Debug for Awaited {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Awaited::Ready(event) => f.debug_tuple("Ready").field(&event.kind()).finish(),
            Awaited::Pending => f.write_str("Pending"),
            Awaited::Occupied => f.write_str("Occupied"),
        }
    }
}

/// Store counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub epoch: u64,
    pub events: usize,
    pub streams: usize,
    pub waiting: usize,
    pub stale_dropped: u64,
    pub by_kind: BTreeMap<EventKind, usize>,
}

/// Process-wide event index for one session
pub struct ForensicDataStore {
    epoch: Arc<SessionEpoch>,
    streams: DashMap<StreamId, Arc<Mutex<EventStream>>>,
    backlog: Backlog<StreamId, Arc<Event>>,
    stale_dropped: AtomicU64,
}

impl ForensicDataStore {
    pub fn new(epoch: Arc<SessionEpoch>) -> Self {
        Self {
            epoch,
            streams: DashMap::new(),
            backlog: Backlog::new(),
            stale_dropped: AtomicU64::new(0),
        }
    }

    pub fn epoch(&self) -> &Arc<SessionEpoch> {
        &self.epoch
    }

    fn stream(&self, id: &StreamId) -> Arc<Mutex<EventStream>> {
        if let Some(stream) = self.streams.get(id) {
            return stream.clone();
        }
        self.streams.entry(id.clone()).or_default().clone()
    }

    /// Insert under the current epoch
    pub fn insert(&self, event: Event) {
        let resumed = {
            let _guard = self.epoch.hold();
            self.insert_locked(event)
        };
        Self::resume(resumed);
    }

    /// Insert only if `epoch` is still current. Stale inserts are dropped.
    pub fn insert_tagged(&self, epoch: u64, event: Event) -> bool {
        let kind = event.kind();
        match self.epoch.admit(epoch, || self.insert_locked(event)) {
            Some(resumed) => {
                Self::resume(resumed);
                true
            }
            None => {
                self.stale_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(epoch, current = self.epoch.current(), %kind, "dropping insert from stale session");
                false
            }
        }
    }

    fn insert_locked(&self, event: Event) -> Option<(Continuation<Arc<Event>>, Arc<Event>)> {
        let id = (event.kind(), event.stream_key());
        let stream = self.stream(&id);
        let mut stream = stream.lock();
        stream.push(Arc::new(event));
        trace!(kind = %id.0, key = %id.1, "event stored");

        let resume = self.backlog.take(&id)?;
        let event = stream.pop()?;
        debug!(kind = %id.0, key = %id.1, "resuming backlogged consumer");
        Some((resume, event))
    }

    // Continuations run with no store lock or epoch gate held
    fn resume(resumed: Option<(Continuation<Arc<Event>>, Arc<Event>)>) {
        if let Some((resume, event)) = resumed {
            resume(event);
        }
    }

    /// Pop the earliest unconsumed event of `kind` on `stream_key`
    pub fn next(&self, stream_key: &str, kind: EventKind) -> Option<Arc<Event>> {
        let stream = self.streams.get(&(kind, stream_key.to_string()))?.clone();
        let event = stream.lock().pop();
        event
    }

    pub fn peek(&self, stream_key: &str, kind: EventKind) -> Option<Arc<Event>> {
        let stream = self.streams.get(&(kind, stream_key.to_string()))?.clone();
        let event = stream.lock().peek();
        event
    }

    /// Pop the next event, or park `continuation` until it is inserted.
    ///
    /// The continuation runs on the inserting thread, after the store has
    /// released its locks.
    pub fn next_or_wait(
        &self,
        stream_key: &str,
        kind: EventKind,
        continuation: Continuation<Arc<Event>>,
    ) -> Awaited {
        let _guard = self.epoch.hold();
        let id = (kind, stream_key.to_string());
        let stream = self.stream(&id);
        let mut stream = stream.lock();

        if let Some(event) = stream.pop() {
            return Awaited::Ready(event);
        }
        match self.backlog.register(id, continuation) {
            Ok(()) => Awaited::Pending,
            Err(_) => Awaited::Occupied,
        }
    }

    /// Await the next event of `kind` on `stream_key`.
    ///
    /// Resolves to `None` if another consumer already waits on the stream or
    /// the store is reset before the event arrives.
    #[cfg(feature = "async-runtime")]
    pub async fn next_async(&self, stream_key: &str, kind: EventKind) -> Option<Arc<Event>> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let resume: Continuation<Arc<Event>> = Box::new(move |event| {
            let _ = tx.send(event);
        });
        match self.next_or_wait(stream_key, kind, resume) {
            Awaited::Ready(event) => Some(event),
            Awaited::Pending => rx.await.ok(),
            Awaited::Occupied => None,
        }
    }

    pub fn is_waiting(&self, stream_key: &str, kind: EventKind) -> bool {
        self.backlog.is_waiting(&(kind, stream_key.to_string()))
    }

    pub fn remaining(&self, stream_key: &str, kind: EventKind) -> usize {
        self.streams
            .get(&(kind, stream_key.to_string()))
            .map(|stream| {
                let remaining = stream.lock().remaining();
                remaining
            })
            .unwrap_or(0)
    }

    /// Every stored event of `kind`, grouped by stream key in key order
    pub fn events_of_kind(&self, kind: EventKind) -> Vec<Arc<Event>> {
        let mut streams: Vec<(String, Arc<Mutex<EventStream>>)> = self
            .streams
            .iter()
            .filter(|entry| entry.key().0 == kind)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect();
        streams.sort_by(|a, b| a.0.cmp(&b.0));

        streams
            .into_iter()
            .flat_map(|(_, stream)| {
                let events = stream.lock().events.clone();
                events
            })
            .collect()
    }

    /// Every stored event, ordered by kind, then stream key, then sequence
    pub fn all_events(&self) -> Vec<Arc<Event>> {
        EventKind::ALL
            .iter()
            .flat_map(|kind| self.events_of_kind(*kind))
            .collect()
    }

    /// Move every cursor back to the start. Events are kept; waiters are
    /// dropped.
    pub fn rewind(&self) {
        for entry in self.streams.iter() {
            entry.value().lock().cursor = 0;
        }
        let dropped = self.backlog.clear();
        if dropped > 0 {
            debug!(dropped, "dropped waiting consumers on rewind");
        }
    }

    /// Clear every index and start a new epoch. Returns the new epoch.
    pub fn reset(&self) -> u64 {
        let epoch = self.epoch.advance(|| self.clear());
        debug!(epoch, "forensic data store reset");
        epoch
    }

    // Caller holds the epoch write gate
    pub(crate) fn clear(&self) {
        self.streams.clear();
        self.backlog.clear();
    }

    /// Events ever stored on a stream, consumed or not
    pub fn stream_len(&self, stream_key: &str, kind: EventKind) -> usize {
        self.streams
            .get(&(kind, stream_key.to_string()))
            .map(|stream| {
                let len = stream.lock().events.len();
                len
            })
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.streams
            .iter()
            .map(|entry| {
                let len = entry.value().lock().events.len();
                len
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StoreStats {
        let mut by_kind = BTreeMap::new();
        let mut events = 0;
        for entry in self.streams.iter() {
            let count = entry.value().lock().events.len();
            events += count;
            *by_kind.entry(entry.key().0).or_insert(0) += count;
        }
        StoreStats {
            epoch: self.epoch.current(),
            events,
            streams: self.streams.len(),
            waiting: self.backlog.len(),
            stale_dropped: self.stale_dropped.load(Ordering::Relaxed),
            by_kind,
        }
    }
}

impl std::fmt::Debug for ForensicDataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForensicDataStore")
            .field("epoch", &self.epoch.current())
            .field("streams", &self.streams.len())
            .field("waiting", &self.backlog.len())
            .finish()
    }
}
