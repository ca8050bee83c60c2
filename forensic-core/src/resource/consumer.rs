//! Resource consumers
//!
//! A consumer is the loader-side object waiting on a fetch. Replayed
//! responses reach it through the same callbacks, in the same order, as a
//! live load:
//!
//! ```text
//! did_start_load ──► response_received ──► data_received* ──► finished
//!                                      └─────────────────────► failed
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::response::ReplayedResponse;
use crate::event::RequestFingerprint;

/// Why a replayed load did not finish normally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadFailure {
    /// Empty media body; a live load would never have completed
    Timeout,
}

pub trait ResourceConsumer: Send + Sync {
    fn did_start_load(&self, fingerprint: &RequestFingerprint);

    fn response_received(&self, response: &ReplayedResponse);

    fn data_received(&self, chunk: &[u8]);

    fn finished(&self, total_bytes: usize);

    fn failed(&self, failure: LoadFailure);
}

/// One callback observed by a [`RecordingConsumer`]
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumerCall {
    StartLoad(RequestFingerprint),
    Response(ReplayedResponse),
    Data(Vec<u8>),
    Finished(usize),
    Failed(LoadFailure),
}

/// Consumer that remembers every callback, for tests and the CLI
#[derive(Debug, Default)]
pub struct RecordingConsumer {
    calls: Mutex<Vec<ConsumerCall>>,
}

impl RecordingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ConsumerCall> {
        self.calls.lock().clone()
    }

    /// Concatenated body chunks
    pub fn body(&self) -> Vec<u8> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                ConsumerCall::Data(chunk) => Some(chunk.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    pub fn chunk_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, ConsumerCall::Data(_)))
            .count()
    }

    pub fn finish_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, ConsumerCall::Finished(_) | ConsumerCall::Failed(_)))
            .count()
    }

    pub fn is_finished(&self) -> bool {
        self.calls
            .lock()
            .iter()
            .any(|call| matches!(call, ConsumerCall::Finished(_)))
    }
}

impl ResourceConsumer for RecordingConsumer {
    fn did_start_load(&self, fingerprint: &RequestFingerprint) {
        self.calls.lock().push(ConsumerCall::StartLoad(fingerprint.clone()));
    }

    fn response_received(&self, response: &ReplayedResponse) {
        self.calls.lock().push(ConsumerCall::Response(response.clone()));
    }

    fn data_received(&self, chunk: &[u8]) {
        self.calls.lock().push(ConsumerCall::Data(chunk.to_vec()));
    }

    fn finished(&self, total_bytes: usize) {
        self.calls.lock().push(ConsumerCall::Finished(total_bytes));
    }

    fn failed(&self, failure: LoadFailure) {
        self.calls.lock().push(ConsumerCall::Failed(failure));
    }
}
