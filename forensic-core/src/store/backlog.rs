//! Pending-consumer registry
//!
//! A replay consumer that asks for data before it has been inserted leaves a
//! continuation here. The matching insert takes it out and runs it, so each
//! continuation fires at most once. A key holds one waiter at a time.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;

/// Resumes a waiting consumer with the value it asked for
pub type Continuation<T> = Box<dyn FnOnce(T) + Send + 'static>;

pub struct Backlog<K, T> {
    pending: Mutex<HashMap<K, Continuation<T>>>,
}

impl<K: Eq + Hash, T> Backlog<K, T> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Park `continuation` under `key`.
    ///
    /// If a consumer is already waiting on `key` the continuation is handed
    /// back unchanged.
    pub fn register(&self, key: K, continuation: Continuation<T>) -> Result<(), Continuation<T>> {
        let mut pending = self.pending.lock();
        if pending.contains_key(&key) {
            return Err(continuation);
        }
        pending.insert(key, continuation);
        Ok(())
    }

    /// Remove the waiter for `key`, if any. The caller runs it.
    pub fn take(&self, key: &K) -> Option<Continuation<T>> {
        self.pending.lock().remove(key)
    }

    pub fn is_waiting(&self, key: &K) -> bool {
        self.pending.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Drop every waiter without running it; returns how many were dropped
    pub fn clear(&self) -> usize {
        let mut pending = self.pending.lock();
        let dropped = pending.len();
        pending.clear();
        dropped
    }
}

impl<K: Eq + Hash, T> Default for Backlog<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> std::fmt::Debug for Backlog<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backlog")
            .field("waiting", &self.pending.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_single_waiter_per_key() {
        let backlog: Backlog<&str, u32> = Backlog::new();
        assert!(backlog.register("k", Box::new(|_| {})).is_ok());
        assert!(backlog.register("k", Box::new(|_| {})).is_err());
        assert!(backlog.register("other", Box::new(|_| {})).is_ok());
        assert_eq!(backlog.len(), 2);
    }

    #[test]
    fn test_take_runs_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let backlog: Backlog<&str, usize> = Backlog::new();
        let counter = hits.clone();
        backlog
            .register("k", Box::new(move |n| {
                counter.fetch_add(n, Ordering::SeqCst);
            }))
            .ok()
            .unwrap();

        if let Some(resume) = backlog.take(&"k") {
            resume(3);
        }
        assert!(backlog.take(&"k").is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(backlog.is_empty());
    }

    #[test]
    fn test_clear_drops_waiters() {
        let backlog: Backlog<u8, ()> = Backlog::new();
        backlog.register(1, Box::new(|_| panic!("must not run"))).ok().unwrap();
        assert_eq!(backlog.clear(), 1);
        assert!(!backlog.is_waiting(&1));
    }
}
