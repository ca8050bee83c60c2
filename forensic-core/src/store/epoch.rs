//! Session epochs
//!
//! Asynchronous inserts are tagged with the epoch current when they were
//! posted. Resetting a store advances the epoch under an exclusive gate, so
//! an insert either lands entirely before the reset or is rejected.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard};

/// Monotonic session counter shared by the recorder and the stores
#[derive(Debug)]
pub struct SessionEpoch {
    current: AtomicU64,
    gate: RwLock<()>,
}

/// Held while a store mutation runs; blocks [`SessionEpoch::advance`]
pub struct EpochGuard<'a> {
    epoch: u64,
    _gate: RwLockReadGuard<'a, ()>,
}

impl EpochGuard<'_> {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl SessionEpoch {
    pub fn new() -> Self {
        Self {
            current: AtomicU64::new(1),
            gate: RwLock::new(()),
        }
    }

    #[inline]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// Pin the current epoch for the lifetime of the guard
    pub fn hold(&self) -> EpochGuard<'_> {
        let gate = self.gate.read();
        EpochGuard {
            epoch: self.current(),
            _gate: gate,
        }
    }

    /// Run `f` only if `tag` is still the current epoch
    pub fn admit<R>(&self, tag: u64, f: impl FnOnce() -> R) -> Option<R> {
        let guard = self.hold();
        if guard.epoch() != tag {
            return None;
        }
        Some(f())
    }

    /// Bump the epoch and run `f` while no tagged mutation can interleave.
    /// Returns the new epoch.
    pub fn advance(&self, f: impl FnOnce()) -> u64 {
        let _gate = self.gate.write();
        f();
        self.current.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl Default for SessionEpoch {
    fn default() -> Self {
        Self::new()
    }
}
