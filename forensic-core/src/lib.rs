//! # Forensic Core - deterministic record and replay
//!
//! Captures the nondeterministic inputs of a script execution environment
//! while it runs, then feeds them back so a later run reproduces the same
//! execution:
//!
//! - **Interceptor**: per-origin clock and RNG streams, recorded live and
//!   handed back in order during replay
//! - **Recorder**: instrumented call sites post typed events to a log thread
//! - **Stores**: recorded events indexed by stream key and kind, plus
//!   recorded network responses keyed by request fingerprint
//! - **Session**: the `OFF / RECORDING / REPLAYING` control surface tying
//!   them together
//!
//! ## Core Principle
//!
//! > A replayed call site that finds nothing recorded behaves live.
//!
//! Lookup misses are never errors; only the control surface fails.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use forensic_core::{EventKind, Phase, SequenceEntropy, Session};
//!
//! let session = Session::builder()
//!     .with_entropy(Arc::new(SequenceEntropy::new([0.12, 0.87])))
//!     .build()?;
//! session.enable();
//!
//! session.start_record()?;
//! session.interceptor().set_origin("https://a.example");
//! let draws = [session.interceptor().sample_random(), session.interceptor().sample_random()];
//! session.recorder().timer_event("F1", 5, Phase::Begin);
//! session.stop_record()?;
//!
//! session.start_replay()?;
//! assert_eq!(session.interceptor().sample_random(), draws[0]);
//! assert_eq!(session.interceptor().sample_random(), draws[1]);
//! assert_eq!(session.interceptor().sample_random(), -1.0);
//! assert!(session.next_event("F1", EventKind::TimerLifecycle).is_some());
//! session.stop_replay()?;
//! # Ok::<(), forensic_core::ForensicError>(())
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod interceptor;
pub mod mode;
pub mod recorder;
pub mod resource;
pub mod store;
pub mod transport;

// Re-export main types
pub use clock::{Clock, EntropySource, ManualClock, SequenceEntropy, SystemClock, ThreadEntropy};
pub use config::{ForensicConfig, RecorderConfig, ReplayConfig, ResourceConfig};
pub use engine::{SampleBatch, Session, SessionBuilder, SessionStats, StorageReplayer};
pub use error::{ErrorCategory, ErrorDetail, ErrorResponse, ForensicError, Result};
pub use event::{
    CredentialsMode, Event, EventKind, EventPayload, LogRecord, Phase, RequestDescriptor,
    RequestFingerprint, StorageKind,
};
pub use interceptor::{NondeterminismInterceptor, ReplayedValues, Sample, SampleKind};
pub use mode::{ModeController, SessionMode};
pub use recorder::{EventRecorder, LogSink, MemorySink, StoreSink};
pub use resource::{
    FetchOutcome, RecordedResponse, ResourceConsumer, ResourceDataStore, TaskRunner,
};
pub use store::{Awaited, ForensicDataStore, SessionEpoch};
pub use transport::{JsonlFileTransport, LogTransport, MemoryTransport, NullTransport};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
