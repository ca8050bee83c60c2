//! Replay Engine
//!
//! [`Session`] owns every component of one record/replay session and is
//! passed to instrumented call sites explicitly. Only one session can exist
//! per process; a second [`Session::new`] fails with `SessionActive` until
//! the first is dropped.
//!
//! | command        | OFF                | RECORDING              | REPLAYING              |
//! |----------------|--------------------|------------------------|------------------------|
//! | `start_record` | → RECORDING        | `AlreadyRecording`     | `InvalidModeTransition`|
//! | `force_record` | → RECORDING        | ok                     | → OFF → RECORDING      |
//! | `stop_record`  | `InvalidModeTransition` | → OFF             | `InvalidModeTransition`|
//! | `start_replay` | → REPLAYING        | `InvalidModeTransition`| `AlreadyReplaying`     |
//! | `stop_replay`  | `InvalidModeTransition` | `InvalidModeTransition` | → OFF        |
//!
//! # Example
//!
//! ```rust,no_run
//! use forensic_core::engine::Session;
//!
//! let session = Session::new()?;
//! session.enable();
//!
//! session.start_record()?;
//! session.interceptor().set_origin("a");
//! let first = session.interceptor().sample_random();
//! session.stop_record()?;
//!
//! session.start_replay()?;
//! assert_eq!(session.interceptor().sample_random(), first);
//! session.stop_replay()?;
//! # Ok::<(), forensic_core::error::ForensicError>(())
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::{Clock, EntropySource, SystemClock, ThreadEntropy};
use crate::config::ForensicConfig;
use crate::error::{ForensicError, Result};
use crate::event::{storage_stream_key, Event, EventKind, EventPayload, LogRecord, RequestFingerprint};
use crate::interceptor::{NondeterminismInterceptor, ReplayedValues, Sample, SampleKind};
use crate::mode::{ModeController, SessionMode};
use crate::recorder::{EventRecorder, RecorderStats, StoreSink};
use crate::resource::{FetchOutcome, ResourceConsumer, ResourceDataStore, ResourceStats, TaskRunner};
use crate::store::{ForensicDataStore, SessionEpoch, StoreStats};
use crate::transport::LogTransport;

/// Frame that interceptor samples are attributed to when checkpointed
/// outside any script run
pub const SESSION_FRAME: &str = "session";

static SESSION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Holds the process-wide session slot
#[derive(Debug)]
struct ActiveSlot;

impl ActiveSlot {
    fn acquire() -> Result<Self> {
        SESSION_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ActiveSlot)
            .map_err(|_| ForensicError::SessionActive)
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        SESSION_ACTIVE.store(false, Ordering::Release);
    }
}

/// Batched samples of one origin, as dumped by an instrumented engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleBatch {
    pub origin: String,
    #[serde(default)]
    pub clock: Vec<f64>,
    #[serde(default)]
    pub random: Vec<f64>,
}

/// Snapshot of every component's counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub mode: SessionMode,
    pub enabled: bool,
    pub store: StoreStats,
    pub resources: ResourceStats,
    pub recorder: RecorderStats,
}

/// Builder for [`Session`]
pub struct SessionBuilder {
    config: ForensicConfig,
    clock: Arc<dyn Clock>,
    entropy: Arc<dyn EntropySource>,
    transport: Option<Arc<dyn LogTransport>>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            config: ForensicConfig::default(),
            clock: Arc::new(SystemClock),
            entropy: Arc::new(ThreadEntropy),
            transport: None,
        }
    }

    pub fn with_config(mut self, config: ForensicConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_entropy(mut self, entropy: Arc<dyn EntropySource>) -> Self {
        self.entropy = entropy;
        self
    }

    /// Persist every recorded event to `transport` as it is stored
    pub fn with_transport(mut self, transport: Arc<dyn LogTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<Session> {
        self.config.validate()?;
        let slot = ActiveSlot::acquire()?;

        let mode = Arc::new(ModeController::new());
        let epoch = Arc::new(SessionEpoch::new());
        let interceptor = Arc::new(
            NondeterminismInterceptor::new(mode.clone(), self.clock.clone(), self.entropy)
                .with_config(self.config.replay.clone()),
        );
        let store = Arc::new(ForensicDataStore::new(epoch.clone()));
        let resources = Arc::new(ResourceDataStore::new(
            epoch.clone(),
            self.config.resource.clone(),
        ));

        let mut sink = StoreSink::new(store.clone(), resources.clone());
        if let Some(transport) = &self.transport {
            sink = sink.with_transport(transport.clone());
        }
        let recorder = EventRecorder::new(
            mode.clone(),
            self.clock,
            epoch.clone(),
            interceptor.clone(),
            &self.config.recorder,
            sink,
        )?;

        debug!(config = ?self.config, "forensic session created");
        Ok(Session {
            config: self.config,
            mode,
            enabled: AtomicBool::new(false),
            epoch,
            interceptor,
            store,
            resources,
            recorder,
            transport: self.transport,
            _slot: slot,
        })
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Defines one `insert_<kind>_event` command per event kind
macro_rules! typed_inserts {
    ($($name:ident => $kind:ident),* $(,)?) => {
        $(
            #[doc = concat!("Insert a serialized `", stringify!($kind), "` event")]
            pub fn $name(&self, serialized: &str) -> Result<()> {
                self.insert_event_of(EventKind::$kind, serialized)
            }
        )*
    };
}

/// One record/replay session
pub struct Session {
    config: ForensicConfig,
    mode: Arc<ModeController>,
    enabled: AtomicBool,
    epoch: Arc<SessionEpoch>,
    interceptor: Arc<NondeterminismInterceptor>,
    store: Arc<ForensicDataStore>,
    resources: Arc<ResourceDataStore>,
    recorder: EventRecorder,
    transport: Option<Arc<dyn LogTransport>>,
    // released after the recorder has shut down
    _slot: ActiveSlot,
}

impl Session {
    /// Session with live clock and entropy and default config
    pub fn new() -> Result<Self> {
        SessionBuilder::new().build()
    }

    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    // ------------------------------------------------------------------
    // Accessors for instrumented call sites
    // ------------------------------------------------------------------

    pub fn mode(&self) -> SessionMode {
        self.mode.mode()
    }

    pub fn config(&self) -> &ForensicConfig {
        &self.config
    }

    pub fn interceptor(&self) -> &NondeterminismInterceptor {
        &self.interceptor
    }

    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    pub fn store(&self) -> &ForensicDataStore {
        &self.store
    }

    pub fn resources(&self) -> &ResourceDataStore {
        &self.resources
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(ForensicError::NotEnabled)
        }
    }

    // ------------------------------------------------------------------
    // Control surface
    // ------------------------------------------------------------------

    pub fn enable(&self) {
        if !self.enabled.swap(true, Ordering::AcqRel) {
            info!("forensics enabled");
        }
    }

    /// Stop whatever is running and refuse further commands until
    /// [`enable`](Self::enable)
    pub fn disable(&self) -> Result<()> {
        match self.mode.mode() {
            SessionMode::Recording => self.stop_record()?,
            SessionMode::Replaying => self.stop_replay()?,
            SessionMode::Off => {}
        }
        if self.enabled.swap(false, Ordering::AcqRel) {
            info!("forensics disabled");
        }
        Ok(())
    }

    /// Begin a fresh recording. Both stores are cleared and a new epoch
    /// starts, so late inserts from an earlier session are dropped.
    pub fn start_record(&self) -> Result<()> {
        self.ensure_enabled()?;
        self.mode.transition_with(SessionMode::Recording, |_| {
            self.reset_stores();
            self.recorder.reset_sequences();
            self.interceptor.clear();
            self.interceptor.start_recording();
            Ok(())
        })?;
        Ok(())
    }

    /// Start recording regardless of the current mode
    pub fn force_record(&self) -> Result<()> {
        self.ensure_enabled()?;
        match self.mode.mode() {
            SessionMode::Recording => Ok(()),
            SessionMode::Replaying => {
                self.stop_replay()?;
                self.start_record()
            }
            SessionMode::Off => self.start_record(),
        }
    }

    /// Stop recording, checkpoint outstanding samples and wait for the log
    /// thread to store everything posted so far
    pub fn stop_record(&self) -> Result<()> {
        self.ensure_enabled()?;
        self.mode.transition_with(SessionMode::Off, |from| {
            if from != SessionMode::Recording {
                return Err(ForensicError::InvalidModeTransition {
                    from,
                    to: SessionMode::Off,
                });
            }
            let samples = self.recorder.checkpoint_samples(SESSION_FRAME);
            debug!(samples, "checkpointed samples at stop");
            Ok(())
        })?;
        self.recorder.sync()?;
        info!(events = self.store.len(), resources = self.resources.len(), "recording stored");
        Ok(())
    }

    /// Replay what the stores hold. Interceptor streams are rebuilt from
    /// the stored samples and every cursor starts from the beginning.
    pub fn start_replay(&self) -> Result<()> {
        self.ensure_enabled()?;
        self.mode.transition_with(SessionMode::Replaying, |_| {
            self.interceptor.clear();
            let loaded = self.interceptor.load_samples(self.stored_samples());
            self.interceptor.start_replay();
            self.store.rewind();
            self.resources.rewind();
            debug!(samples = loaded, events = self.store.len(), "replay prepared");
            Ok(())
        })?;
        Ok(())
    }

    /// Stop replaying. Stored events are kept and cursors rewound, so the
    /// same capture can be replayed again.
    pub fn stop_replay(&self) -> Result<()> {
        self.ensure_enabled()?;
        self.mode.transition_with(SessionMode::Off, |from| {
            if from != SessionMode::Replaying {
                return Err(ForensicError::InvalidModeTransition {
                    from,
                    to: SessionMode::Off,
                });
            }
            self.store.rewind();
            self.resources.rewind();
            self.interceptor.rewind();
            Ok(())
        })?;
        Ok(())
    }

    /// Drop every stored event and start a new epoch
    pub fn reset(&self) -> u64 {
        self.reset_stores()
    }

    fn reset_stores(&self) -> u64 {
        let epoch = self.epoch.advance(|| {
            self.store.clear();
            self.resources.clear();
        });
        debug!(epoch, "session stores reset");
        epoch
    }

    fn stored_samples(&self) -> Vec<Sample> {
        [EventKind::ClockSample, EventKind::RandomSample]
            .iter()
            .flat_map(|kind| self.store.events_of_kind(*kind))
            .filter_map(|event| Sample::from_event(&event))
            .collect()
    }

    // ------------------------------------------------------------------
    // Feeding a replay
    // ------------------------------------------------------------------

    fn ingest(&self, event: Event) -> bool {
        let epoch = self.epoch.current();
        if event.kind().is_resource() {
            self.resources.insert_event(epoch, &event);
        }
        self.store.insert_tagged(epoch, event)
    }

    /// Insert one serialized event (an envelope or a bare event object)
    pub fn insert_event(&self, serialized: &str) -> Result<()> {
        self.ensure_enabled()?;
        let record = LogRecord::from_json(serialized)?;
        self.ingest(record.event);
        Ok(())
    }

    fn insert_event_of(&self, kind: EventKind, serialized: &str) -> Result<()> {
        self.ensure_enabled()?;
        let record = LogRecord::from_json(serialized)?;
        if record.event.kind() != kind {
            return Err(ForensicError::InvalidEvent {
                reason: format!("expected a {} event, got {}", kind, record.event.kind()),
            });
        }
        self.ingest(record.event);
        Ok(())
    }

    typed_inserts! {
        insert_clock_sample_event => ClockSample,
        insert_random_sample_event => RandomSample,
        insert_crypto_random_event => CryptoRandom,
        insert_script_compile_event => ScriptCompile,
        insert_script_run_event => ScriptRun,
        insert_function_call_event => FunctionCall,
        insert_callback_invocation_event => CallbackInvocation,
        insert_attribute_access_event => AttributeAccess,
        insert_dom_event_dispatch_event => DomEventDispatch,
        insert_dom_attribute_event => DomAttribute,
        insert_navigation_event => Navigation,
        insert_timer_lifecycle_event => TimerLifecycle,
        insert_idle_callback_event => IdleCallback,
        insert_animation_frame_event => AnimationFrame,
        insert_storage_op_event => StorageOp,
        insert_resource_fetch_event => ResourceFetch,
    }

    /// Insert a batch of samples for one origin, appended after the samples
    /// already stored for it. Returns how many samples were inserted.
    pub fn insert_sample_batch(&self, serialized: &str) -> Result<usize> {
        self.ensure_enabled()?;
        let batch: SampleBatch = serde_json::from_str(serialized)?;
        if batch.origin.is_empty() {
            return Err(ForensicError::InvalidEvent {
                reason: "sample batch without origin".to_string(),
            });
        }

        let mut inserted = 0;
        for (kind, values) in [
            (SampleKind::Clock, batch.clock),
            (SampleKind::Random, batch.random),
        ] {
            let event_kind = match kind {
                SampleKind::Clock => EventKind::ClockSample,
                SampleKind::Random => EventKind::RandomSample,
            };
            let start = self.store.stream_len(&batch.origin, event_kind) as i64;
            for (offset, value) in values.into_iter().enumerate() {
                let event = Sample {
                    origin: batch.origin.clone(),
                    kind,
                    sequence: start + offset as i64,
                    value,
                }
                .into_event(SESSION_FRAME, 0.0);
                event.validate()?;
                if self.ingest(event) {
                    inserted += 1;
                }
            }
        }
        Ok(inserted)
    }

    /// Insert every record of a persisted log. Returns how many were stored.
    pub fn load_log(&self, transport: &dyn LogTransport) -> Result<usize> {
        self.ensure_enabled()?;
        let records = transport.records()?;
        let total = records.len();
        let stored = records
            .into_iter()
            .map(|record| self.ingest(record.event))
            .filter(|stored| *stored)
            .count();
        info!(transport = transport.name(), total, stored, "log loaded");
        Ok(stored)
    }

    /// Write every stored event to `transport`. Returns how many were written.
    pub fn export_log(&self, transport: &dyn LogTransport) -> Result<usize> {
        let records: Vec<LogRecord> = self
            .store
            .all_events()
            .iter()
            .map(|event| LogRecord::new((**event).clone()))
            .collect();
        transport.append_batch(&records)?;
        transport.flush()?;
        Ok(records.len())
    }

    /// The transport recorded events are persisted to, if any
    pub fn transport(&self) -> Option<&Arc<dyn LogTransport>> {
        self.transport.as_ref()
    }

    // ------------------------------------------------------------------
    // Replay-side lookups
    // ------------------------------------------------------------------

    /// Next recorded event of `kind` on `stream_key`; `None` unless
    /// REPLAYING or when the stream is exhausted
    pub fn next_event(&self, stream_key: &str, kind: EventKind) -> Option<Arc<Event>> {
        if !self.mode.is_replaying() {
            return None;
        }
        self.store.next(stream_key, kind)
    }

    /// Serve a fetch from the recording. False means load live.
    ///
    /// This never waits: a response inserted after the call is not
    /// delivered to `consumer`. Use
    /// [`replay_fetch_or_wait`](Self::replay_fetch_or_wait) when the
    /// response may still be on its way.
    pub fn replay_fetch(
        &self,
        fingerprint: &RequestFingerprint,
        consumer: Arc<dyn ResourceConsumer>,
        runner: &dyn TaskRunner,
    ) -> bool {
        if !self.mode.is_replaying() {
            return false;
        }
        self.resources.replay_fetch(fingerprint, consumer, runner)
    }

    /// Serve a fetch from the recording, waiting for the response if it
    /// has not been inserted yet
    pub fn replay_fetch_or_wait(
        &self,
        fingerprint: &RequestFingerprint,
        consumer: Arc<dyn ResourceConsumer>,
        runner: Arc<dyn TaskRunner>,
    ) -> FetchOutcome {
        if !self.mode.is_replaying() {
            return FetchOutcome::Live;
        }
        self.resources.replay_fetch_or_wait(fingerprint, consumer, runner)
    }

    pub fn storage_replayer<'a>(&'a self, frame_id: &'a str) -> StorageReplayer<'a> {
        StorageReplayer {
            session: self,
            frame_id,
        }
    }

    /// Values handed out by the interceptor during the current replay
    pub fn replayed_values(&self) -> BTreeMap<String, ReplayedValues> {
        self.interceptor.replayed_dump()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            mode: self.mode.mode(),
            enabled: self.is_enabled(),
            store: self.store.stats(),
            resources: self.resources.stats(),
            recorder: self.recorder.stats(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("mode", &self.mode.mode())
            .field("enabled", &self.is_enabled())
            .field("epoch", &self.epoch.current())
            .finish()
    }
}

/// Replays `localStorage` / `sessionStorage` reads for one frame
///
/// Calls consume the frame's recorded operations in program order. The key
/// passed in is not used for matching.
pub struct StorageReplayer<'a> {
    session: &'a Session,
    frame_id: &'a str,
}

impl StorageReplayer<'_> {
    /// `None`: nothing recorded, read live. `Some(None)`: recorded a
    /// missing key.
    pub fn replay_get_item(&self, key: &str) -> Option<Option<String>> {
        let event = self.next("getItem")?;
        match &event.payload {
            EventPayload::StorageOp {
                key: recorded_key,
                new_value,
                is_null,
                ..
            } => {
                if recorded_key.as_deref() != Some(key) {
                    debug!(frame = self.frame_id, key, recorded = ?recorded_key, "getItem key differs from recording");
                }
                if *is_null {
                    Some(None)
                } else {
                    Some(Some(new_value.clone().unwrap_or_default()))
                }
            }
            _ => None,
        }
    }

    /// `None`: nothing recorded, read live. `Some(None)`: index was past
    /// the end when recorded.
    pub fn replay_key(&self, index: i64) -> Option<Option<String>> {
        let event = self.next("key")?;
        match &event.payload {
            EventPayload::StorageOp {
                key,
                index: recorded_index,
                is_null,
                ..
            } => {
                if *recorded_index != Some(index) {
                    debug!(frame = self.frame_id, index, recorded = ?recorded_index, "key() index differs from recording");
                }
                if *is_null {
                    Some(None)
                } else {
                    Some(key.clone())
                }
            }
            _ => None,
        }
    }

    fn next(&self, api_name: &str) -> Option<Arc<Event>> {
        let event = self
            .session
            .next_event(&storage_stream_key(self.frame_id, api_name), EventKind::StorageOp);
        if event.is_none() {
            debug!(frame = self.frame_id, api_name, "no recorded storage event, reading live");
        }
        event
    }
}
