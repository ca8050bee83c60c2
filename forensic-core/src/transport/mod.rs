//! Persisted log transport
//!
//! The recorder appends [`LogRecord`]s; a later replay session iterates
//! them back in. Backends:
//!
//! - [`JsonlFileTransport`]: one JSON envelope per line
//! - [`MemoryTransport`]: in-process, for tests and round trips
//! - [`NullTransport`]: discards everything
//!
//! [`raw`] reads the line format emitted by instrumented browser builds.

mod jsonl;
mod memory;
pub mod raw;

pub use jsonl::JsonlFileTransport;
pub use memory::{MemoryTransport, NullTransport};

use crate::error::Result;
use crate::event::LogRecord;

/// Append-only sink of serialized events
///
/// All methods take `&self`; implementations use interior mutability so a
/// transport can be shared between the log thread and a loader.
pub trait LogTransport: Send + Sync {
    /// Append one record
    fn append(&self, record: &LogRecord) -> Result<()>;

    /// Append records in order
    fn append_batch(&self, records: &[LogRecord]) -> Result<()> {
        for record in records {
            self.append(record)?;
        }
        Ok(())
    }

    /// Every record, in append order
    fn records(&self) -> Result<Vec<LogRecord>>;

    fn count(&self) -> Result<usize> {
        Ok(self.records()?.len())
    }

    /// Flush buffered writes
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Backend name for logging
    fn name(&self) -> &'static str;
}
