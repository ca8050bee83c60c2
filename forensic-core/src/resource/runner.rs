//! Task runners
//!
//! Replayed deliveries are posted to a [`TaskRunner`] instead of running on
//! the caller's stack, matching the asynchronous completion path of a live
//! load.

use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};
use tracing::warn;

/// A unit of deferred work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait TaskRunner: Send + Sync {
    fn post(&self, task: Task);
}

/// Runs each task immediately on the posting thread
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineTaskRunner;

impl TaskRunner for InlineTaskRunner {
    fn post(&self, task: Task) {
        task();
    }
}

enum RunnerCommand {
    Run(Task),
    Shutdown,
}

/// Single worker thread draining tasks in post order
pub struct ThreadTaskRunner {
    sender: Sender<RunnerCommand>,
    worker: Option<JoinHandle<()>>,
}

impl ThreadTaskRunner {
    pub fn new(name: &str) -> std::io::Result<Self> {
        let (sender, receiver) = channel::unbounded::<RunnerCommand>();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(command) = receiver.recv() {
                    match command {
                        RunnerCommand::Run(task) => task(),
                        RunnerCommand::Shutdown => break,
                    }
                }
            })?;
        Ok(Self {
            sender,
            worker: Some(worker),
        })
    }
}

impl TaskRunner for ThreadTaskRunner {
    fn post(&self, task: Task) {
        if self.sender.send(RunnerCommand::Run(task)).is_err() {
            warn!("task runner stopped, dropping task");
        }
    }
}

impl Drop for ThreadTaskRunner {
    fn drop(&mut self) {
        let _ = self.sender.send(RunnerCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Posts tasks onto a tokio runtime
#[cfg(feature = "async-runtime")]
#[derive(Debug, Clone)]
pub struct TokioTaskRunner {
    handle: tokio::runtime::Handle,
}

#[cfg(feature = "async-runtime")]
impl TokioTaskRunner {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Runner for the runtime the caller is on
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }
}

#[cfg(feature = "async-runtime")]
impl TaskRunner for TokioTaskRunner {
    fn post(&self, task: Task) {
        self.handle.spawn(async move { task() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_inline_runs_immediately() {
        let hit = Arc::new(Mutex::new(false));
        let flag = hit.clone();
        InlineTaskRunner.post(Box::new(move || *flag.lock() = true));
        assert!(*hit.lock());
    }

    #[test]
    fn test_thread_runner_keeps_post_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let runner = ThreadTaskRunner::new("test-runner").unwrap();
            for i in 0..50 {
                let seen = seen.clone();
                runner.post(Box::new(move || seen.lock().push(i)));
            }
            // drop joins after draining
        }
        assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
    }

    #[cfg(feature = "async-runtime")]
    #[tokio::test]
    async fn test_tokio_runner_spawns_on_current_runtime() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        TokioTaskRunner::current().post(Box::new(move || {
            let _ = tx.send(7);
        }));
        assert_eq!(rx.await.unwrap(), 7);
    }
}
