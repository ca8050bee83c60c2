//! In-memory and null transports

use parking_lot::RwLock;

use super::LogTransport;
use crate::error::Result;
use crate::event::LogRecord;

/// Keeps records in a vector. Records are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    records: RwLock<Vec<LogRecord>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<LogRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn clear(&self) {
        self.records.write().clear();
    }
}

impl LogTransport for MemoryTransport {
    fn append(&self, record: &LogRecord) -> Result<()> {
        self.records.write().push(record.clone());
        Ok(())
    }

    fn append_batch(&self, records: &[LogRecord]) -> Result<()> {
        self.records.write().extend_from_slice(records);
        Ok(())
    }

    fn records(&self) -> Result<Vec<LogRecord>> {
        Ok(self.records.read().clone())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.len())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl LogTransport for NullTransport {
    fn append(&self, _record: &LogRecord) -> Result<()> {
        Ok(())
    }

    fn records(&self) -> Result<Vec<LogRecord>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str {
        "null"
    }
}
