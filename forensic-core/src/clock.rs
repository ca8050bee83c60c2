//! Live sources of nondeterminism
//!
//! The interceptor never reads the wall clock or an RNG directly. It goes
//! through [`Clock`] and [`EntropySource`] so tests can substitute
//! deterministic doubles:
//!
//! - [`SystemClock`] / [`ThreadEntropy`]: live behaviour
//! - [`ManualClock`] / [`SequenceEntropy`]: scripted values for tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;

/// Wall-clock source, milliseconds since the Unix epoch
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> f64;
}

/// Uniform `[0, 1)` source
pub trait EntropySource: Send + Sync {
    fn next_f64(&self) -> f64;
}

/// Reads `chrono::Utc::now()`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        Utc::now().timestamp_micros() as f64 / 1000.0
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: f64) -> Self {
        Self {
            bits: AtomicU64::new(start_ms.to_bits()),
        }
    }

    pub fn set(&self, now_ms: f64) {
        self.bits.store(now_ms.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: f64) {
        let _ = self
            .bits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                Some((f64::from_bits(bits) + delta_ms).to_bits())
            });
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// `rand::thread_rng()` draws
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadEntropy;

impl EntropySource for ThreadEntropy {
    fn next_f64(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Hands out a fixed list of values, cycling when it runs out
#[derive(Debug)]
pub struct SequenceEntropy {
    values: Mutex<VecDeque<f64>>,
}

impl SequenceEntropy {
    pub fn new(values: impl IntoIterator<Item = f64>) -> Self {
        Self {
            values: Mutex::new(values.into_iter().collect()),
        }
    }
}

impl EntropySource for SequenceEntropy {
    fn next_f64(&self) -> f64 {
        let mut values = self.values.lock();
        match values.pop_front() {
            Some(value) => {
                values.push_back(value);
                value
            }
            None => 0.0,
        }
    }
}
