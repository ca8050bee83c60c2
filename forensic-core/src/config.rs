//! Session configuration
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! yields a working configuration:
//!
//! ```json
//! {
//!   "recorder": { "channel_capacity": 0, "batch_size": 64, "flush_interval_ms": 100 },
//!   "resource": { "stream_chunk_size": 65536, "fail_empty_media": true },
//!   "replay":   { "clock_extrapolation": true, "record_replayed_values": true }
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ForensicError, Result};

/// Top-level configuration for a [`Session`](crate::engine::Session)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForensicConfig {
    pub recorder: RecorderConfig,
    pub resource: ResourceConfig,
    pub replay: ReplayConfig,
}

/// Event recorder and log thread settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Bounded channel size between call sites and the log thread.
    /// 0 (the default) means unbounded. When bounded, call-site events are
    /// dropped while the channel is full; interceptor samples wait.
    pub channel_capacity: usize,
    /// Events collected before the log thread writes to its sink
    pub batch_size: usize,
    /// Idle interval after which a partial batch is written
    pub flush_interval_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 0,
            batch_size: 64,
            flush_interval_ms: 100,
        }
    }
}

/// Resource replay settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Bytes per synthetic chunk when replaying a streamed body
    pub stream_chunk_size: usize,
    /// Finish an empty media body as a timeout failure instead of success
    pub fail_empty_media: bool,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            stream_chunk_size: 65536,
            fail_empty_media: true,
        }
    }
}

/// Interceptor behaviour while replaying
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Extrapolate clock reads once the recorded stream is exhausted
    pub clock_extrapolation: bool,
    /// Keep every value handed out during replay for later inspection
    pub record_replayed_values: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            clock_extrapolation: true,
            record_replayed_values: true,
        }
    }
}

impl ForensicConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.recorder.channel_capacity = capacity;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.recorder.batch_size = batch_size;
        self
    }

    pub fn with_flush_interval_ms(mut self, interval: u64) -> Self {
        self.recorder.flush_interval_ms = interval;
        self
    }

    pub fn with_stream_chunk_size(mut self, chunk_size: usize) -> Self {
        self.resource.stream_chunk_size = chunk_size;
        self
    }

    pub fn with_fail_empty_media(mut self, fail: bool) -> Self {
        self.resource.fail_empty_media = fail;
        self
    }

    pub fn with_clock_extrapolation(mut self, enabled: bool) -> Self {
        self.replay.clock_extrapolation = enabled;
        self
    }

    pub fn with_replayed_values(mut self, enabled: bool) -> Self {
        self.replay.record_replayed_values = enabled;
        self
    }

    /// Load and validate a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: ForensicConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.recorder.batch_size == 0 {
            return Err(ForensicError::Config {
                reason: "recorder.batch_size must be at least 1".to_string(),
            });
        }
        if self.recorder.flush_interval_ms == 0 {
            return Err(ForensicError::Config {
                reason: "recorder.flush_interval_ms must be at least 1".to_string(),
            });
        }
        if self.resource.stream_chunk_size == 0 {
            return Err(ForensicError::Config {
                reason: "resource.stream_chunk_size must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
