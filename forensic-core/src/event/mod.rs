//! Event Model
//!
//! Every recordable occurrence is an [`Event`]: a small fixed header
//! (frame, thread, per-frame sequence number, logical timestamp captured at
//! the call site) plus an [`EventPayload`] tagged union with one variant per
//! [`EventKind`].
//!
//! Events are immutable once built. The recorder moves them to the log
//! thread, the data stores keep them behind `Arc`, and replay consumers only
//! ever borrow them.
//!
//! On disk an event travels inside a [`LogRecord`] envelope, one JSON object
//! per line:
//!
//! ```json
//! {"version":"1.0","record_id":"...","recorded_at":"...",
//!  "event":{"frame_id":"F1","thread_id":1,"sequence_number":4,
//!           "logical_timestamp":1712.5,"kind":"timer_lifecycle",
//!           "timer_id":3,"phase":"begin"}}
//! ```

mod fingerprint;
mod kind;
mod payload;

pub use fingerprint::{CredentialsMode, RequestDescriptor, RequestFingerprint};
pub use kind::EventKind;
pub use payload::{AccessDirection, AttributeOp, EventPayload, Phase, StorageKind};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{ForensicError, Result};

/// Envelope format version
pub const LOG_FORMAT_VERSION: &str = "1.0";

/// A single recorded occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub frame_id: String,

    #[serde(default)]
    pub thread_id: u64,

    /// Monotonic per frame (per origin for samples)
    pub sequence_number: i64,

    /// Milliseconds, captured when the call site fired
    pub logical_timestamp: f64,

    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn new(
        frame_id: impl Into<String>,
        sequence_number: i64,
        logical_timestamp: f64,
        payload: EventPayload,
    ) -> Self {
        Self {
            frame_id: frame_id.into(),
            thread_id: 0,
            sequence_number,
            logical_timestamp,
            payload,
        }
    }

    pub fn with_thread(mut self, thread_id: u64) -> Self {
        self.thread_id = thread_id;
        self
    }

    #[inline]
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Correlation key within the event's kind.
    ///
    /// Samples correlate by origin token, fetches by request fingerprint,
    /// storage operations by frame and API name, everything else by frame.
    pub fn stream_key(&self) -> String {
        match &self.payload {
            EventPayload::ClockSample { origin, .. } | EventPayload::RandomSample { origin, .. } => {
                origin.clone()
            }
            EventPayload::ResourceFetch {
                request_fingerprint,
                ..
            } => request_fingerprint.to_string(),
            EventPayload::StorageOp { api_name, .. } => storage_stream_key(&self.frame_id, api_name),
            _ => self.frame_id.clone(),
        }
    }

    /// Reject events no call site could have produced
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(ForensicError::InvalidEvent {
                reason: reason.to_string(),
            })
        };

        if self.sequence_number < 0 {
            return invalid("sequence_number must not be negative");
        }
        if !self.logical_timestamp.is_finite() {
            return invalid("logical_timestamp must be finite");
        }

        match &self.payload {
            EventPayload::ClockSample { origin, value } => {
                if origin.is_empty() {
                    return invalid("clock sample without origin");
                }
                if !value.is_finite() {
                    return invalid("clock sample must be finite");
                }
            }
            EventPayload::RandomSample { origin, value } => {
                if origin.is_empty() {
                    return invalid("random sample without origin");
                }
                if !(0.0..1.0).contains(value) {
                    return invalid("random sample outside [0, 1)");
                }
            }
            EventPayload::ResourceFetch {
                request_fingerprint,
                ..
            } => {
                if request_fingerprint.is_empty() {
                    return invalid("resource fetch without fingerprint");
                }
            }
            EventPayload::StorageOp { api_name, .. } => {
                if api_name.is_empty() {
                    return invalid("storage op without api_name");
                }
            }
            _ => {
                if self.frame_id.is_empty() {
                    return invalid("frame_id must not be empty");
                }
            }
        }
        Ok(())
    }
}

/// Stream key for storage operations of one API on one frame
pub fn storage_stream_key(frame_id: &str, api_name: &str) -> String {
    format!("{frame_id}/{api_name}")
}

/// Hex SHA-256 of script source, as stored in `ScriptCompile::content_hash`
pub fn content_hash(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}

/// Persisted form of an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub version: String,
    pub record_id: String,
    pub recorded_at: DateTime<Utc>,
    pub event: Event,
}

impl LogRecord {
    pub fn new(event: Event) -> Self {
        Self {
            version: LOG_FORMAT_VERSION.to_string(),
            record_id: Uuid::new_v4().to_string(),
            recorded_at: Utc::now(),
            event,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an envelope, or a bare event object
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        if value.get("event").is_some() {
            let record: LogRecord = serde_json::from_value(value)?;
            record.event.validate()?;
            Ok(record)
        } else {
            let event: Event = serde_json::from_value(value)?;
            event.validate()?;
            Ok(LogRecord::new(event))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer(seq: i64) -> Event {
        Event::new(
            "F1",
            seq,
            10.0,
            EventPayload::TimerLifecycle {
                timer_id: 7,
                phase: Phase::Begin,
            },
        )
    }

    #[test]
    fn test_flattened_payload_shape() {
        let json = serde_json::to_value(timer(2)).unwrap();
        assert_eq!(json["kind"], "timer_lifecycle");
        assert_eq!(json["timer_id"], 7);
        assert_eq!(json["phase"], "begin");
        assert_eq!(json["frame_id"], "F1");
    }

    #[test]
    fn test_stream_keys() {
        let sample = Event::new(
            "F1",
            0,
            0.0,
            EventPayload::RandomSample {
                origin: "a".into(),
                value: 0.5,
            },
        );
        assert_eq!(sample.stream_key(), "a");
        assert_eq!(timer(0).stream_key(), "F1");

        let storage = Event::new(
            "F1",
            0,
            0.0,
            EventPayload::StorageOp {
                api_name: "getItem".into(),
                key: Some("k".into()),
                old_value: None,
                new_value: Some("v".into()),
                is_null: false,
                index: None,
                storage_kind: StorageKind::Local,
            },
        );
        assert_eq!(storage.stream_key(), "F1/getItem");
    }

    #[test]
    fn test_validate_rejects_out_of_range_random() {
        let bad = Event::new(
            "F1",
            0,
            0.0,
            EventPayload::RandomSample {
                origin: "a".into(),
                value: 1.0,
            },
        );
        assert!(matches!(bad.validate(), Err(ForensicError::InvalidEvent { .. })));
        assert!(timer(0).validate().is_ok());
        assert!(timer(-1).validate().is_err());
    }

    #[test]
    fn test_envelope_accepts_bare_event() {
        let raw = r#"{"frame_id":"F2","sequence_number":1,"logical_timestamp":3.5,
                      "kind":"navigation","url":"https://x/"}"#;
        let record = LogRecord::from_json(raw).unwrap();
        assert_eq!(record.version, LOG_FORMAT_VERSION);
        assert_eq!(record.event.kind(), EventKind::Navigation);
        assert_eq!(record.event.thread_id, 0);
    }

    #[test]
    fn test_envelope_rejects_unknown_kind() {
        let raw = r#"{"frame_id":"F2","sequence_number":1,"logical_timestamp":3.5,"kind":"gc"}"#;
        assert!(LogRecord::from_json(raw).is_err());
    }

    #[test]
    fn test_content_hash() {
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
