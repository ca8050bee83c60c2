//! Event Recorder
//!
//! Instrumented call sites report here. Each call captures its context
//! synchronously (frame, thread, per-frame sequence number, logical
//! timestamp) and posts the event to a dedicated log thread, which batches
//! events into a [`LogSink`].
//!
//! ```text
//! call site ──► record_*() ──► channel ──► log thread ──► LogSink
//!    │                                        │
//!    │                                        ├─► StoreSink (stores + transport)
//!    │                                        └─► MemorySink (testing)
//!    │
//!    └─ never blocks; a no-op unless RECORDING
//! ```
//!
//! A single channel with a single consumer keeps events from one calling
//! thread in post order. Replay correctness relies on the captured sequence
//! numbers, not on when the log thread gets to an event.

mod sink;

pub use sink::{LogSink, MemorySink, StoreSink, TaggedEvent};

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::RecorderConfig;
use crate::error::{ForensicError, Result};
use crate::event::{
    content_hash, AccessDirection, AttributeOp, Event, EventPayload, Phase, RequestDescriptor,
    StorageKind,
};
use crate::interceptor::NondeterminismInterceptor;
use crate::mode::ModeController;
use crate::resource::RecordedResponse;
use crate::store::SessionEpoch;

/// Commands sent to the log thread
enum LogCommand {
    Record(TaggedEvent),
    Sync(Sender<()>),
    Shutdown,
}

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// Small stable id of the calling thread
pub fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

/// Recorder counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecorderStats {
    pub posted: u64,
    pub dropped: u64,
    pub frames: usize,
}

pub struct EventRecorder {
    mode: Arc<ModeController>,
    clock: Arc<dyn Clock>,
    epoch: Arc<SessionEpoch>,
    interceptor: Arc<NondeterminismInterceptor>,
    sender: Sender<LogCommand>,
    sequences: DashMap<String, AtomicI64>,
    posted: AtomicU64,
    dropped: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventRecorder {
    /// Spawn the log thread and return the recorder feeding it
    pub fn new<S: LogSink>(
        mode: Arc<ModeController>,
        clock: Arc<dyn Clock>,
        epoch: Arc<SessionEpoch>,
        interceptor: Arc<NondeterminismInterceptor>,
        config: &RecorderConfig,
        mut sink: S,
    ) -> Result<Self> {
        let (sender, receiver) = if config.channel_capacity == 0 {
            channel::unbounded::<LogCommand>()
        } else {
            channel::bounded::<LogCommand>(config.channel_capacity)
        };

        let batch_size = config.batch_size.max(1);
        let interval = Duration::from_millis(config.flush_interval_ms.max(1));
        let worker = thread::Builder::new()
            .name("forensic-log".to_string())
            .spawn(move || Self::log_loop(receiver, &mut sink, batch_size, interval))?;

        Ok(Self {
            mode,
            clock,
            epoch,
            interceptor,
            sender,
            sequences: DashMap::new(),
            posted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Background drain loop
    fn log_loop<S: LogSink>(
        receiver: Receiver<LogCommand>,
        sink: &mut S,
        batch_size: usize,
        interval: Duration,
    ) {
        let mut buffer: Vec<TaggedEvent> = Vec::with_capacity(batch_size);

        let write = |sink: &mut S, buffer: &mut Vec<TaggedEvent>| {
            if buffer.is_empty() {
                return;
            }
            if let Err(e) = sink.write(buffer) {
                warn!(error = %e, events = buffer.len(), "log sink write failed");
            }
            buffer.clear();
        };

        loop {
            match receiver.recv_timeout(interval) {
                Ok(LogCommand::Record(tagged)) => {
                    buffer.push(tagged);
                    if buffer.len() >= batch_size {
                        write(sink, &mut buffer);
                    }
                }
                Ok(LogCommand::Sync(ack)) => {
                    write(sink, &mut buffer);
                    if let Err(e) = sink.flush() {
                        warn!(error = %e, "log sink flush failed");
                    }
                    let _ = ack.send(());
                }
                Ok(LogCommand::Shutdown) => {
                    write(sink, &mut buffer);
                    let _ = sink.flush();
                    break;
                }
                Err(RecvTimeoutError::Timeout) => write(sink, &mut buffer),
                Err(RecvTimeoutError::Disconnected) => {
                    write(sink, &mut buffer);
                    let _ = sink.flush();
                    break;
                }
            }
        }
        debug!("log thread stopped");
    }

    /// True while RECORDING; every `record_*` call checks this first
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.mode.is_recording()
    }

    /// Claim the next sequence number of `frame_id`
    pub fn next_sequence(&self, frame_id: &str) -> i64 {
        if let Some(counter) = self.sequences.get(frame_id) {
            return counter.fetch_add(1, Ordering::Relaxed);
        }
        self.sequences
            .entry(frame_id.to_string())
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(1, Ordering::Relaxed)
    }

    /// Forget every frame's sequence counter
    pub fn reset_sequences(&self) {
        self.sequences.clear();
    }

    /// Stamp and post an event built by the caller.
    ///
    /// Returns false without side effects unless RECORDING.
    pub fn record(&self, frame_id: &str, payload: EventPayload) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let event = Event::new(
            frame_id,
            self.next_sequence(frame_id),
            self.clock.now_ms(),
            payload,
        )
        .with_thread(current_thread_id());
        self.post(event)
    }

    fn tag(&self, event: Event) -> LogCommand {
        LogCommand::Record(TaggedEvent {
            epoch: self.epoch.current(),
            event,
        })
    }

    fn post(&self, event: Event) -> bool {
        match self.sender.try_send(self.tag(event)) {
            Ok(()) => {
                self.posted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("log channel full, dropping event");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("log thread gone, dropping event");
                false
            }
        }
    }

    // Samples are numbered when dumped, so a dropped one would shift every
    // later value of its stream. Wait for room instead.
    fn post_sample(&self, event: Event) -> bool {
        match self.sender.send(self.tag(event)) {
            Ok(()) => {
                self.posted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("log thread gone, dropping sample");
                false
            }
        }
    }

    /// Turn pending interceptor samples into events attributed to
    /// `frame_id`. Returns how many were posted.
    ///
    /// Unlike other call sites this blocks while a bounded log channel is
    /// full.
    pub fn checkpoint_samples(&self, frame_id: &str) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        let now = self.clock.now_ms();
        let thread_id = current_thread_id();
        self.interceptor
            .dump_and_clear()
            .into_iter()
            .map(|sample| self.post_sample(sample.into_event(frame_id, now).with_thread(thread_id)))
            .filter(|posted| *posted)
            .count()
    }

    /// Block until everything posted so far has reached the sink
    pub fn sync(&self) -> Result<()> {
        let (ack, done) = channel::bounded(1);
        self.sender
            .send(LogCommand::Sync(ack))
            .map_err(|_| ForensicError::RecorderClosed)?;
        done.recv().map_err(|_| ForensicError::RecorderClosed)
    }

    /// Drain and stop the log thread. Later calls are no-ops.
    pub fn shutdown(&self) {
        if let Some(worker) = self.worker.lock().take() {
            let _ = self.sender.send(LogCommand::Shutdown);
            let _ = worker.join();
        }
    }

    pub fn stats(&self) -> RecorderStats {
        RecorderStats {
            posted: self.posted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            frames: self.sequences.len(),
        }
    }

    // ------------------------------------------------------------------
    // Call sites
    // ------------------------------------------------------------------

    pub fn did_compile_script(
        &self,
        frame_id: &str,
        script_id: i64,
        line: u32,
        column: u32,
        url: &str,
        source: &str,
    ) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.record(
            frame_id,
            EventPayload::ScriptCompile {
                script_id,
                line,
                column,
                url: url.to_string(),
                content_hash: content_hash(source),
                size: source.len(),
            },
        )
    }

    pub fn did_run_script_begin(&self, frame_id: &str, script_id: i64) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.record(
            frame_id,
            EventPayload::ScriptRun {
                script_id,
                result_repr: String::new(),
                phase: Phase::Begin,
            },
        )
    }

    /// Also checkpoints the samples drawn while the script ran
    pub fn did_run_script_end(&self, frame_id: &str, script_id: i64, result_repr: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let posted = self.record(
            frame_id,
            EventPayload::ScriptRun {
                script_id,
                result_repr: result_repr.to_string(),
                phase: Phase::End,
            },
        );
        self.checkpoint_samples(frame_id);
        posted
    }

    pub fn did_call_function(
        &self,
        frame_id: &str,
        script_id: i64,
        line: u32,
        column: u32,
        args: &[&str],
        phase: Phase,
    ) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.record(
            frame_id,
            EventPayload::FunctionCall {
                script_id,
                line,
                column,
                args_repr: args.iter().map(|a| a.to_string()).collect(),
                phase,
            },
        )
    }

    pub fn did_call_callback(&self, frame_id: &str, interface: &str, attribute: &str, phase: Phase) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.record(
            frame_id,
            EventPayload::CallbackInvocation {
                interface: interface.to_string(),
                attribute: attribute.to_string(),
                phase,
            },
        )
    }

    pub fn did_access_attribute(
        &self,
        frame_id: &str,
        interface: &str,
        attribute: &str,
        value_repr: &str,
        direction: AccessDirection,
    ) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.record(
            frame_id,
            EventPayload::AttributeAccess {
                interface: interface.to_string(),
                attribute: attribute.to_string(),
                value_repr: value_repr.to_string(),
                direction,
            },
        )
    }

    pub fn did_dispatch_event(
        &self,
        frame_id: &str,
        event_type: &str,
        interface: &str,
        target_interface: &str,
        phase: Phase,
    ) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.record(
            frame_id,
            EventPayload::DomEventDispatch {
                event_type: event_type.to_string(),
                interface: interface.to_string(),
                target_interface: target_interface.to_string(),
                phase,
            },
        )
    }

    pub fn timer_event(&self, frame_id: &str, timer_id: i64, phase: Phase) -> bool {
        self.record(frame_id, EventPayload::TimerLifecycle { timer_id, phase })
    }

    pub fn idle_callback_event(
        &self,
        frame_id: &str,
        callback_id: i64,
        callback_type: i32,
        allotted_time: f64,
        phase: Phase,
    ) -> bool {
        self.record(
            frame_id,
            EventPayload::IdleCallback {
                callback_id,
                callback_type,
                allotted_time,
                phase,
            },
        )
    }

    pub fn animation_frame_event(
        &self,
        frame_id: &str,
        callback_id: i64,
        high_res_time: f64,
        is_legacy: bool,
        phase: Phase,
    ) -> bool {
        self.record(
            frame_id,
            EventPayload::AnimationFrame {
                callback_id,
                high_res_time,
                is_legacy,
                phase,
            },
        )
    }

    /// `getItem(key)` returned `value` (`None` for a missing key)
    pub fn storage_get_item(
        &self,
        frame_id: &str,
        key: &str,
        value: Option<&str>,
        storage_kind: StorageKind,
    ) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.record(
            frame_id,
            EventPayload::StorageOp {
                api_name: "getItem".to_string(),
                key: Some(key.to_string()),
                old_value: None,
                new_value: value.map(str::to_string),
                is_null: value.is_none(),
                index: None,
                storage_kind,
            },
        )
    }

    /// `key(index)` returned `key` (`None` past the end)
    pub fn storage_key(
        &self,
        frame_id: &str,
        index: i64,
        key: Option<&str>,
        storage_kind: StorageKind,
    ) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.record(
            frame_id,
            EventPayload::StorageOp {
                api_name: "key".to_string(),
                key: key.map(str::to_string),
                old_value: None,
                new_value: None,
                is_null: key.is_none(),
                index: Some(index),
                storage_kind,
            },
        )
    }

    pub fn storage_set_item(
        &self,
        frame_id: &str,
        key: &str,
        old_value: Option<&str>,
        new_value: &str,
        storage_kind: StorageKind,
    ) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.record(
            frame_id,
            EventPayload::StorageOp {
                api_name: "setItem".to_string(),
                key: Some(key.to_string()),
                old_value: old_value.map(str::to_string),
                new_value: Some(new_value.to_string()),
                is_null: false,
                index: None,
                storage_kind,
            },
        )
    }

    /// A fetch finished loading
    pub fn resource_loaded(
        &self,
        frame_id: &str,
        request: &RequestDescriptor,
        response: RecordedResponse,
    ) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let response = response
            .with_url(request.url.clone())
            .with_method(request.method.clone())
            .with_resource_type(request.resource_type.clone())
            .streamed(request.use_stream);
        let event = response.into_event(
            request.fingerprint(),
            frame_id,
            self.next_sequence(frame_id),
            self.clock.now_ms(),
        );
        self.post(event.with_thread(current_thread_id()))
    }

    pub fn navigation(&self, frame_id: &str, url: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.record(frame_id, EventPayload::Navigation { url: url.to_string() })
    }

    pub fn crypto_random(&self, frame_id: &str, values: &[u8]) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.record(
            frame_id,
            EventPayload::CryptoRandom {
                values: hex::encode(values),
            },
        )
    }

    pub fn dom_attribute(
        &self,
        frame_id: &str,
        node_id: i64,
        attr_name: &str,
        old_value: Option<&str>,
        new_value: Option<&str>,
        op: AttributeOp,
    ) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.record(
            frame_id,
            EventPayload::DomAttribute {
                node_id,
                attr_name: attr_name.to_string(),
                old_value: old_value.map(str::to_string),
                new_value: new_value.map(str::to_string),
                op,
            },
        )
    }
}

impl std::fmt::Debug for EventRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRecorder")
            .field("enabled", &self.is_enabled())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Drop for EventRecorder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SequenceEntropy};
    use crate::event::EventKind;
    use crate::mode::SessionMode;

    struct Fixture {
        mode: Arc<ModeController>,
        clock: Arc<ManualClock>,
        interceptor: Arc<NondeterminismInterceptor>,
        sink: MemorySink,
        recorder: EventRecorder,
    }

    fn fixture(config: RecorderConfig) -> Fixture {
        let mode = Arc::new(ModeController::new());
        let clock = Arc::new(ManualClock::new(100.0));
        let interceptor = Arc::new(NondeterminismInterceptor::new(
            mode.clone(),
            clock.clone(),
            Arc::new(SequenceEntropy::new([0.25, 0.5])),
        ));
        let sink = MemorySink::new();
        let recorder = EventRecorder::new(
            mode.clone(),
            clock.clone(),
            Arc::new(SessionEpoch::new()),
            interceptor.clone(),
            &config,
            sink.clone(),
        )
        .unwrap();
        Fixture {
            mode,
            clock,
            interceptor,
            sink,
            recorder,
        }
    }

    #[test]
    fn test_off_is_a_no_op() {
        let f = fixture(RecorderConfig::default());
        assert!(!f.recorder.timer_event("F1", 1, Phase::Begin));
        assert!(!f.recorder.navigation("F1", "https://x/"));
        f.recorder.sync().unwrap();
        assert_eq!(f.sink.event_count(), 0);
        assert_eq!(f.recorder.stats().frames, 0);
    }

    #[test]
    fn test_sequence_and_timestamp_captured_at_call() {
        let f = fixture(RecorderConfig::default());
        f.mode.transition(SessionMode::Recording).unwrap();

        f.recorder.timer_event("F1", 1, Phase::Begin);
        f.clock.advance(5.0);
        f.recorder.timer_event("F1", 1, Phase::End);
        f.recorder.timer_event("F2", 9, Phase::Begin);
        f.recorder.sync().unwrap();

        let events = f.sink.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].sequence_number, 0);
        assert_eq!(events[1].sequence_number, 1);
        assert_eq!(events[1].logical_timestamp, 105.0);
        assert_eq!(events[2].sequence_number, 0);
        assert_eq!(events[0].thread_id, current_thread_id());
    }

    #[test]
    fn test_script_end_checkpoints_samples() {
        let f = fixture(RecorderConfig::default());
        f.mode.transition(SessionMode::Recording).unwrap();
        f.interceptor.set_origin("a");

        f.recorder.did_run_script_begin("F1", 4);
        f.interceptor.sample_random();
        f.interceptor.sample_random();
        f.recorder.did_run_script_end("F1", 4, "undefined");
        f.recorder.sync().unwrap();

        let kinds: Vec<EventKind> = f.sink.events().iter().map(Event::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::ScriptRun,
                EventKind::ScriptRun,
                EventKind::RandomSample,
                EventKind::RandomSample
            ]
        );
        assert_eq!(f.interceptor.pending_count(), 0);
    }

    #[test]
    fn test_compile_hashes_source() {
        let f = fixture(RecorderConfig::default());
        f.mode.transition(SessionMode::Recording).unwrap();
        f.recorder.did_compile_script("F1", 1, 0, 0, "https://x/a.js", "let a = 1;");
        f.recorder.sync().unwrap();

        match &f.sink.events()[0].payload {
            EventPayload::ScriptCompile { content_hash: hash, size, .. } => {
                assert_eq!(hash, &content_hash("let a = 1;"));
                assert_eq!(*size, 10);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_events_tagged_with_current_epoch() {
        let f = fixture(RecorderConfig::default());
        f.mode.transition(SessionMode::Recording).unwrap();
        f.recorder.navigation("F1", "https://x/");
        f.recorder.sync().unwrap();
        assert_eq!(f.sink.tagged()[0].epoch, 1);
    }

    #[test]
    fn test_small_batches_drain_on_shutdown() {
        let f = fixture(RecorderConfig {
            channel_capacity: 0,
            batch_size: 1000,
            flush_interval_ms: 60_000,
        });
        f.mode.transition(SessionMode::Recording).unwrap();
        for i in 0..10 {
            f.recorder.timer_event("F1", i, Phase::Begin);
        }
        f.recorder.shutdown();
        assert_eq!(f.sink.event_count(), 10);
        assert_eq!(f.recorder.stats().posted, 10);
    }

    #[test]
    fn test_storage_null_get_item() {
        let f = fixture(RecorderConfig::default());
        f.mode.transition(SessionMode::Recording).unwrap();
        f.recorder.storage_get_item("F1", "missing", None, StorageKind::Local);
        f.recorder.sync().unwrap();
        let events = f.sink.events();
        assert_eq!(events[0].stream_key(), "F1/getItem");
        assert!(matches!(events[0].payload, EventPayload::StorageOp { is_null: true, .. }));
    }

    #[test]
    fn test_checkpoint_never_drops_on_full_channel() {
        let f = fixture(RecorderConfig {
            channel_capacity: 2,
            batch_size: 1,
            flush_interval_ms: 100,
        });
        f.mode.transition(SessionMode::Recording).unwrap();
        for _ in 0..500 {
            f.interceptor.sample_random();
        }
        assert_eq!(f.recorder.checkpoint_samples("F1"), 500);
        f.recorder.sync().unwrap();

        let sequences: Vec<i64> = f.sink.events().iter().map(|e| e.sequence_number).collect();
        assert_eq!(sequences, (0..500).collect::<Vec<_>>());
        assert_eq!(f.recorder.stats().dropped, 0);
    }
}
