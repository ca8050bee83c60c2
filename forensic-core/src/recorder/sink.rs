//! Log sinks
//!
//! The log thread hands each batch of drained events to a [`LogSink`].

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::Result;
use crate::event::{Event, LogRecord};
use crate::resource::ResourceDataStore;
use crate::store::ForensicDataStore;
use crate::transport::LogTransport;

/// An event together with the session epoch it was recorded under
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEvent {
    pub epoch: u64,
    pub event: Event,
}

/// Destination of the log thread
pub trait LogSink: Send + 'static {
    /// Write a batch of events, in drain order
    fn write(&mut self, batch: &[TaggedEvent]) -> Result<()>;

    /// Flush any pending writes
    fn flush(&mut self) -> Result<()>;
}

/// Collects events in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<TaggedEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().iter().map(|t| t.event.clone()).collect()
    }

    pub fn tagged(&self) -> Vec<TaggedEvent> {
        self.events.lock().clone()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl LogSink for MemorySink {
    fn write(&mut self, batch: &[TaggedEvent]) -> Result<()> {
        self.events.lock().extend_from_slice(batch);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Inserts into the session stores and, optionally, persists to a transport.
///
/// Resource fetches go to both stores. Only events admitted under their
/// epoch are persisted.
pub struct StoreSink {
    store: Arc<ForensicDataStore>,
    resources: Arc<ResourceDataStore>,
    transport: Option<Arc<dyn LogTransport>>,
}

impl StoreSink {
    pub fn new(store: Arc<ForensicDataStore>, resources: Arc<ResourceDataStore>) -> Self {
        Self {
            store,
            resources,
            transport: None,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn LogTransport>) -> Self {
        self.transport = Some(transport);
        self
    }
}

impl LogSink for StoreSink {
    fn write(&mut self, batch: &[TaggedEvent]) -> Result<()> {
        let mut persisted = Vec::with_capacity(batch.len());
        for tagged in batch {
            if tagged.event.kind().is_resource() {
                self.resources.insert_event(tagged.epoch, &tagged.event);
            }
            if self.store.insert_tagged(tagged.epoch, tagged.event.clone()) && self.transport.is_some() {
                persisted.push(LogRecord::new(tagged.event.clone()));
            }
        }
        trace!(batch = batch.len(), persisted = persisted.len(), "log batch written");

        match &self.transport {
            Some(transport) if !persisted.is_empty() => transport.append_batch(&persisted),
            _ => Ok(()),
        }
    }

    fn flush(&mut self) -> Result<()> {
        match &self.transport {
            Some(transport) => transport.flush(),
            None => Ok(()),
        }
    }
}
