//! Resource Data Store
//!
//! Recorded network responses keyed by [`RequestFingerprint`]. During replay
//! a loader asks [`ResourceDataStore::replay_fetch`] first; on a hit the
//! captured response is fed back through the consumer's normal callbacks,
//! on a miss the loader goes to the network.
//!
//! The first response recorded for a fingerprint wins. Later duplicates are
//! counted and ignored.
//!
//! When a consumer asks before the matching response has been inserted (the
//! document that owns it was rebuilt before the network log was loaded),
//! [`ResourceDataStore::replay_fetch_or_wait`] parks it in a backlog and the
//! insert resumes it.

mod consumer;
mod response;
mod runner;

pub use consumer::{ConsumerCall, LoadFailure, RecordingConsumer, ResourceConsumer};
pub use response::{RecordedResponse, ReplayedResponse};
#[cfg(feature = "async-runtime")]
pub use runner::TokioTaskRunner;
pub use runner::{InlineTaskRunner, Task, TaskRunner, ThreadTaskRunner};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ResourceConfig;
use crate::event::{Event, RequestFingerprint};
use crate::store::{Backlog, Continuation, SessionEpoch};

/// Result of [`ResourceDataStore::replay_fetch_or_wait`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A recorded response exists and delivery has been posted
    Scheduled,
    /// No response yet; the consumer will be resumed by the matching insert
    Awaiting,
    /// Another consumer already waits on this fingerprint; fetch live
    Live,
}

/// Resource store counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceStats {
    pub responses: usize,
    pub duplicates: u64,
    pub replayed: u64,
    pub misses: u64,
    pub waiting: usize,
    pub stale_dropped: u64,
}

pub struct ResourceDataStore {
    epoch: Arc<SessionEpoch>,
    config: ResourceConfig,
    responses: DashMap<RequestFingerprint, Arc<RecordedResponse>>,
    backlog: Backlog<RequestFingerprint, Arc<RecordedResponse>>,
    duplicates: AtomicU64,
    replayed: AtomicU64,
    misses: AtomicU64,
    stale_dropped: AtomicU64,
}

impl ResourceDataStore {
    pub fn new(epoch: Arc<SessionEpoch>, config: ResourceConfig) -> Self {
        Self {
            epoch,
            config,
            responses: DashMap::new(),
            backlog: Backlog::new(),
            duplicates: AtomicU64::new(0),
            replayed: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale_dropped: AtomicU64::new(0),
        }
    }

    /// Store a captured response under the current epoch.
    ///
    /// Returns false if the fingerprint already had a response.
    pub fn record_fetch(&self, fingerprint: RequestFingerprint, response: RecordedResponse) -> bool {
        let (stored, resumed) = {
            let _guard = self.epoch.hold();
            self.insert_locked(fingerprint, response)
        };
        Self::resume(resumed);
        stored
    }

    /// Store a response only if `epoch` is still current
    pub fn insert_tagged(
        &self,
        epoch: u64,
        fingerprint: RequestFingerprint,
        response: RecordedResponse,
    ) -> bool {
        let digest = fingerprint.digest();
        match self.epoch.admit(epoch, || self.insert_locked(fingerprint, response)) {
            Some((stored, resumed)) => {
                Self::resume(resumed);
                stored
            }
            None => {
                self.stale_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(epoch, fingerprint = %digest, "dropping resource insert from stale session");
                false
            }
        }
    }

    /// Store the response carried by a `ResourceFetch` event
    pub fn insert_event(&self, epoch: u64, event: &Event) -> bool {
        match RecordedResponse::from_event(event) {
            Some((fingerprint, response)) => self.insert_tagged(epoch, fingerprint, response),
            None => false,
        }
    }

    #[allow(clippy::type_complexity)]
    fn insert_locked(
        &self,
        fingerprint: RequestFingerprint,
        response: RecordedResponse,
    ) -> (bool, Option<(Continuation<Arc<RecordedResponse>>, Arc<RecordedResponse>)>) {
        match self.responses.entry(fingerprint) {
            Entry::Occupied(existing) => {
                self.duplicates.fetch_add(1, Ordering::Relaxed);
                warn!(
                    fingerprint = %existing.key().digest(),
                    url = %response.url,
                    "duplicate resource fingerprint, keeping first response"
                );
                (false, None)
            }
            Entry::Vacant(vacant) => {
                let fingerprint = vacant.key().clone();
                let response = Arc::new(response);
                let _stored = vacant.insert(response.clone());
                // shard lock held: a concurrent waiter either saw the
                // response or is already registered
                let resumed = self.backlog.take(&fingerprint).map(|resume| {
                    debug!(fingerprint = %fingerprint.digest(), "resuming backlogged fetch");
                    (resume, response)
                });
                (true, resumed)
            }
        }
    }

    fn resume(resumed: Option<(Continuation<Arc<RecordedResponse>>, Arc<RecordedResponse>)>) {
        if let Some((resume, response)) = resumed {
            resume(response);
        }
    }

    pub fn lookup(&self, fingerprint: &RequestFingerprint) -> Option<Arc<RecordedResponse>> {
        self.responses.get(fingerprint).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, fingerprint: &RequestFingerprint) -> bool {
        self.responses.contains_key(fingerprint)
    }

    /// Deliver the recorded response for `fingerprint` to `consumer`.
    ///
    /// `did_start_load` fires before this returns; the rest of the
    /// callbacks are posted to `runner`. Returns false when nothing was
    /// recorded and the caller should load live.
    pub fn replay_fetch(
        &self,
        fingerprint: &RequestFingerprint,
        consumer: Arc<dyn ResourceConsumer>,
        runner: &dyn TaskRunner,
    ) -> bool {
        match self.lookup(fingerprint) {
            Some(response) => {
                self.replayed.fetch_add(1, Ordering::Relaxed);
                consumer.did_start_load(fingerprint);
                runner.post(delivery_task(response, consumer, self.config.clone()));
                true
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %fingerprint.digest(), "no recorded response, loading live");
                false
            }
        }
    }

    /// Like [`replay_fetch`](Self::replay_fetch), but parks the consumer
    /// when the response has not been inserted yet.
    pub fn replay_fetch_or_wait(
        &self,
        fingerprint: &RequestFingerprint,
        consumer: Arc<dyn ResourceConsumer>,
        runner: Arc<dyn TaskRunner>,
    ) -> FetchOutcome {
        let found = {
            let _guard = self.epoch.hold();
            match self.responses.entry(fingerprint.clone()) {
                Entry::Occupied(found) => Ok(found.get().clone()),
                Entry::Vacant(vacant) => {
                    let config = self.config.clone();
                    let key = fingerprint.clone();
                    let waiting = consumer.clone();
                    let runner = runner.clone();
                    let resume: Continuation<Arc<RecordedResponse>> = Box::new(move |response| {
                        waiting.did_start_load(&key);
                        runner.post(delivery_task(response, waiting, config));
                    });
                    let registered = self.backlog.register(fingerprint.clone(), resume);
                    drop(vacant);
                    Err(registered.is_ok())
                }
            }
        };

        // consumer callbacks run with no gate or shard lock held
        match found {
            Ok(response) => {
                self.replayed.fetch_add(1, Ordering::Relaxed);
                consumer.did_start_load(fingerprint);
                runner.post(delivery_task(response, consumer, self.config.clone()));
                FetchOutcome::Scheduled
            }
            Err(true) => {
                self.replayed.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %fingerprint.digest(), "fetch parked until response arrives");
                FetchOutcome::Awaiting
            }
            Err(false) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                FetchOutcome::Live
            }
        }
    }

    pub fn is_waiting(&self, fingerprint: &RequestFingerprint) -> bool {
        self.backlog.is_waiting(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    /// Drop waiting consumers, keep responses
    pub fn rewind(&self) {
        let dropped = self.backlog.clear();
        if dropped > 0 {
            debug!(dropped, "dropped waiting fetches on rewind");
        }
    }

    /// Drop everything and start a new epoch
    pub fn reset(&self) -> u64 {
        self.epoch.advance(|| self.clear())
    }

    // Caller holds the epoch write gate
    pub(crate) fn clear(&self) {
        self.responses.clear();
        self.backlog.clear();
    }

    pub fn stats(&self) -> ResourceStats {
        ResourceStats {
            responses: self.responses.len(),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            waiting: self.backlog.len(),
            stale_dropped: self.stale_dropped.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for ResourceDataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceDataStore")
            .field("responses", &self.responses.len())
            .field("waiting", &self.backlog.len())
            .finish()
    }
}

/// Build the task feeding `response` to `consumer`
fn delivery_task(
    response: Arc<RecordedResponse>,
    consumer: Arc<dyn ResourceConsumer>,
    config: ResourceConfig,
) -> Task {
    Box::new(move || deliver(&response, consumer.as_ref(), &config))
}

fn deliver(response: &RecordedResponse, consumer: &dyn ResourceConsumer, config: &ResourceConfig) {
    consumer.response_received(&response.replayed());

    let body = response.body.as_bytes();
    if body.is_empty() && response.is_media() && config.fail_empty_media {
        consumer.failed(LoadFailure::Timeout);
        return;
    }

    if response.is_streamed {
        for chunk in body.chunks(config.stream_chunk_size.max(1)) {
            consumer.data_received(chunk);
        }
    } else if !body.is_empty() {
        consumer.data_received(body);
    }
    consumer.finished(body.len());
}
