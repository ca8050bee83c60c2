//! Nondeterminism Interceptor
//!
//! Clock reads and RNG draws made by script are routed through
//! [`NondeterminismInterceptor`]. Each origin token owns an independent
//! stream:
//!
//! - RECORDING: the live value is returned and appended to the origin's
//!   pending buffer. Buffers are drained with [`dump_and_clear`] and turned
//!   into sample events by the recorder.
//! - REPLAYING: the next loaded value for the origin is returned. An
//!   exhausted clock stream extrapolates from the replay start; an exhausted
//!   RNG stream returns [`RANDOM_EXHAUSTED`] and the call site draws live.
//! - OFF: live value, nothing kept.
//!
//! [`dump_and_clear`]: NondeterminismInterceptor::dump_and_clear

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::clock::{Clock, EntropySource};
use crate::config::ReplayConfig;
use crate::event::{Event, EventPayload};
use crate::mode::{ModeController, SessionMode};

/// Returned by [`NondeterminismInterceptor::sample_random`] once the
/// recorded stream is used up
pub const RANDOM_EXHAUSTED: f64 = -1.0;

/// Origin used until a call site sets one
pub const DEFAULT_ORIGIN: &str = "default";

/// Which stream a sample belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    Clock,
    Random,
}

/// One recorded draw, numbered within its origin and kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub origin: String,
    pub kind: SampleKind,
    pub sequence: i64,
    pub value: f64,
}

impl Sample {
    /// Wrap as an event attributed to `frame_id`
    pub fn into_event(self, frame_id: &str, logical_timestamp: f64) -> Event {
        let payload = match self.kind {
            SampleKind::Clock => EventPayload::ClockSample {
                origin: self.origin,
                value: self.value,
            },
            SampleKind::Random => EventPayload::RandomSample {
                origin: self.origin,
                value: self.value,
            },
        };
        Event::new(frame_id, self.sequence, logical_timestamp, payload)
    }

    /// Recover a sample from a clock / random event
    pub fn from_event(event: &Event) -> Option<Self> {
        let (origin, kind, value) = match &event.payload {
            EventPayload::ClockSample { origin, value } => (origin, SampleKind::Clock, *value),
            EventPayload::RandomSample { origin, value } => (origin, SampleKind::Random, *value),
            _ => return None,
        };
        Some(Self {
            origin: origin.clone(),
            kind,
            sequence: event.sequence_number,
            value,
        })
    }
}

/// Values handed out during replay, per origin
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayedValues {
    pub clock: Vec<f64>,
    pub random: Vec<f64>,
}

#[derive(Debug, Default)]
struct Lane {
    // recording
    pending: Vec<f64>,
    drawn: i64,
    // replaying
    loaded: Vec<f64>,
    cursor: usize,
    replayed: Vec<f64>,
}

impl Lane {
    fn next_loaded(&mut self) -> Option<f64> {
        let value = self.loaded.get(self.cursor).copied()?;
        self.cursor += 1;
        Some(value)
    }

    fn rewind(&mut self) {
        self.cursor = 0;
    }
}

#[derive(Debug, Default)]
struct OriginStreams {
    clock: Lane,
    random: Lane,
}

impl OriginStreams {
    fn lane(&mut self, kind: SampleKind) -> &mut Lane {
        match kind {
            SampleKind::Clock => &mut self.clock,
            SampleKind::Random => &mut self.random,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Timeline {
    record_start: Option<f64>,
    replay_start: Option<f64>,
}

/// Per-origin clock and RNG capture / playback
pub struct NondeterminismInterceptor {
    mode: Arc<ModeController>,
    clock: Arc<dyn Clock>,
    entropy: Arc<dyn EntropySource>,
    config: ReplayConfig,
    origin: RwLock<String>,
    streams: Mutex<HashMap<String, OriginStreams>>,
    timeline: Mutex<Timeline>,
}

impl NondeterminismInterceptor {
    pub fn new(
        mode: Arc<ModeController>,
        clock: Arc<dyn Clock>,
        entropy: Arc<dyn EntropySource>,
    ) -> Self {
        Self {
            mode,
            clock,
            entropy,
            config: ReplayConfig::default(),
            origin: RwLock::new(DEFAULT_ORIGIN.to_string()),
            streams: Mutex::new(HashMap::new()),
            timeline: Mutex::new(Timeline::default()),
        }
    }

    pub fn with_config(mut self, config: ReplayConfig) -> Self {
        self.config = config;
        self
    }

    /// Switch the stream consulted by [`sample_clock`](Self::sample_clock)
    /// and [`sample_random`](Self::sample_random). Stream contents are kept.
    pub fn set_origin(&self, origin: impl Into<String>) {
        *self.origin.write() = origin.into();
    }

    pub fn origin(&self) -> String {
        self.origin.read().clone()
    }

    /// Live wall-clock read, bypassing every stream
    pub fn live_now(&self) -> f64 {
        self.clock.now_ms()
    }

    pub fn sample_clock(&self) -> f64 {
        let origin = self.origin.read();
        self.sample_clock_for(&origin)
    }

    pub fn sample_random(&self) -> f64 {
        let origin = self.origin.read();
        self.sample_random_for(&origin)
    }

    /// [`sample_random`](Self::sample_random), drawing live when the
    /// recorded stream is exhausted
    pub fn sample_random_or_live(&self) -> f64 {
        match self.sample_random() {
            v if v == RANDOM_EXHAUSTED => self.entropy.next_f64(),
            v => v,
        }
    }

    pub fn sample_clock_for(&self, origin: &str) -> f64 {
        match self.mode.mode() {
            SessionMode::Off => self.clock.now_ms(),
            SessionMode::Recording => {
                let live = self.clock.now_ms();
                self.capture(origin, SampleKind::Clock, live);
                live
            }
            SessionMode::Replaying => {
                let mut streams = self.streams.lock();
                let lane = streams.entry(origin.to_string()).or_default().lane(SampleKind::Clock);
                let value = match lane.next_loaded() {
                    Some(value) => value,
                    None => self.extrapolate(origin, lane),
                };
                if self.config.record_replayed_values {
                    lane.replayed.push(value);
                }
                value
            }
        }
    }

    pub fn sample_random_for(&self, origin: &str) -> f64 {
        match self.mode.mode() {
            SessionMode::Off => self.entropy.next_f64(),
            SessionMode::Recording => {
                let live = self.entropy.next_f64();
                self.capture(origin, SampleKind::Random, live);
                live
            }
            SessionMode::Replaying => {
                let mut streams = self.streams.lock();
                let lane = streams.entry(origin.to_string()).or_default().lane(SampleKind::Random);
                match lane.next_loaded() {
                    Some(value) => {
                        if self.config.record_replayed_values {
                            lane.replayed.push(value);
                        }
                        value
                    }
                    None => {
                        debug!(origin, recorded = lane.loaded.len(), "random stream exhausted, falling back to live");
                        RANDOM_EXHAUSTED
                    }
                }
            }
        }
    }

    fn capture(&self, origin: &str, kind: SampleKind, value: f64) {
        let mut streams = self.streams.lock();
        let lane = streams.entry(origin.to_string()).or_default().lane(kind);
        lane.pending.push(value);
        trace!(origin, ?kind, value, "sample captured");
    }

    fn extrapolate(&self, origin: &str, lane: &Lane) -> f64 {
        let live = self.clock.now_ms();
        if !self.config.clock_extrapolation {
            debug!(origin, "clock stream exhausted, returning live time");
            return live;
        }
        let timeline = *self.timeline.lock();
        let record_start = lane.loaded.first().copied().or(timeline.record_start);
        let value = match (record_start, timeline.replay_start) {
            (Some(record_start), Some(replay_start)) => (live - replay_start) + record_start,
            _ => live,
        };
        // never step backwards past what the stream already handed out
        let floor = lane.replayed.last().copied().unwrap_or(f64::MIN);
        let value = value.max(floor);
        debug!(origin, value, "clock stream exhausted, extrapolating");
        value
    }

    /// Reset recording buffers and note the record start time
    pub fn start_recording(&self) {
        let now = self.clock.now_ms();
        let mut streams = self.streams.lock();
        for stream in streams.values_mut() {
            for kind in [SampleKind::Clock, SampleKind::Random] {
                let lane = stream.lane(kind);
                lane.pending.clear();
                lane.drawn = 0;
            }
        }
        self.timeline.lock().record_start = Some(now);
    }

    /// Rewind every stream to its first value, clear the replayed-value
    /// audit and note the replay start time
    pub fn start_replay(&self) {
        {
            let mut streams = self.streams.lock();
            for stream in streams.values_mut() {
                for kind in [SampleKind::Clock, SampleKind::Random] {
                    let lane = stream.lane(kind);
                    lane.rewind();
                    lane.replayed.clear();
                }
            }
        }
        self.timeline.lock().replay_start = Some(self.clock.now_ms());
    }

    /// Drain every pending sample, numbering each within its origin and kind.
    ///
    /// Numbering continues across dumps so checkpointed batches from one
    /// recording concatenate in draw order.
    pub fn dump_and_clear(&self) -> Vec<Sample> {
        let mut streams = self.streams.lock();
        let mut origins: Vec<String> = streams.keys().cloned().collect();
        origins.sort();

        let mut samples = Vec::new();
        for origin in origins {
            let Some(stream) = streams.get_mut(&origin) else {
                continue;
            };
            for kind in [SampleKind::Clock, SampleKind::Random] {
                let lane = stream.lane(kind);
                for value in lane.pending.drain(..) {
                    samples.push(Sample {
                        origin: origin.clone(),
                        kind,
                        sequence: lane.drawn,
                        value,
                    });
                    lane.drawn += 1;
                }
            }
        }
        samples
    }

    /// Samples waiting for the next dump
    pub fn pending_count(&self) -> usize {
        self.streams
            .lock()
            .values()
            .map(|s| s.clock.pending.len() + s.random.pending.len())
            .sum()
    }

    /// Replace the replay stream of one origin and kind
    pub fn load(&self, origin: &str, kind: SampleKind, values: Vec<f64>) {
        let mut streams = self.streams.lock();
        let lane = streams.entry(origin.to_string()).or_default().lane(kind);
        lane.loaded = values;
        lane.rewind();
    }

    /// Load replay streams from sample events.
    ///
    /// Samples are grouped per origin and kind and ordered by sequence
    /// number, regardless of the order they are passed in.
    pub fn load_samples<I>(&self, samples: I) -> usize
    where
        I: IntoIterator<Item = Sample>,
    {
        let mut grouped: BTreeMap<(String, SampleKind), Vec<(i64, f64)>> = BTreeMap::new();
        for sample in samples {
            grouped
                .entry((sample.origin, sample.kind))
                .or_default()
                .push((sample.sequence, sample.value));
        }

        let mut loaded = 0;
        for ((origin, kind), mut values) in grouped {
            values.sort_by_key(|(sequence, _)| *sequence);
            loaded += values.len();
            self.load(&origin, kind, values.into_iter().map(|(_, v)| v).collect());
        }
        loaded
    }

    /// Move every replay cursor back to the start. Loaded values and the
    /// replayed-value audit are kept.
    pub fn rewind(&self) {
        let mut streams = self.streams.lock();
        for stream in streams.values_mut() {
            stream.clock.rewind();
            stream.random.rewind();
        }
    }

    /// Drop all streams, pending and loaded. The record start time is
    /// kept for extrapolation.
    pub fn clear(&self) {
        self.streams.lock().clear();
    }

    /// Loaded values not yet consumed for `origin`
    pub fn remaining(&self, origin: &str, kind: SampleKind) -> usize {
        let mut streams = self.streams.lock();
        match streams.get_mut(origin) {
            Some(stream) => {
                let lane = stream.lane(kind);
                lane.loaded.len().saturating_sub(lane.cursor)
            }
            None => 0,
        }
    }

    /// Values handed out during the current replay
    pub fn replayed_dump(&self) -> BTreeMap<String, ReplayedValues> {
        self.streams
            .lock()
            .iter()
            .filter(|(_, s)| !s.clock.replayed.is_empty() || !s.random.replayed.is_empty())
            .map(|(origin, s)| {
                (
                    origin.clone(),
                    ReplayedValues {
                        clock: s.clock.replayed.clone(),
                        random: s.random.replayed.clone(),
                    },
                )
            })
            .collect()
    }
}

impl std::fmt::Debug for NondeterminismInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NondeterminismInterceptor")
            .field("mode", &self.mode.mode())
            .field("origin", &*self.origin.read())
            .field("config", &self.config)
            .finish()
    }
}
