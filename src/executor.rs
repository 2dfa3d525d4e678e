//! Bounded background executor shared by every cache of a manager.
//!
//! Runs asynchronous listener delivery and `load_all`. Concurrency is capped
//! by a semaphore; tasks are tracked in a `JoinSet` so shutdown can wait for
//! them and abort whatever is still running after the grace period.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{CacheError, Result};

/// Capacity of the failure broadcast channel.
const FAILURE_CHANNEL_CAPACITY: usize = 64;

/// A background task that returned an error.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub task: String,
    pub message: String,
}

/// Semaphore-bounded task runner.
pub struct BackgroundExecutor {
    handle: Handle,
    workers: usize,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
    failures: broadcast::Sender<TaskFailure>,
    closed: AtomicBool,
}

impl BackgroundExecutor {
    /// Create an executor running at most `workers` tasks at once on the
    /// current tokio runtime.
    ///
    /// # Errors
    /// Returns a configuration error when `workers` is zero or no runtime is
    /// active.
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(CacheError::config("executor needs at least one worker"));
        }
        let handle = Handle::try_current()
            .map_err(|_| CacheError::config("background executor requires a tokio runtime"))?;
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);

        Ok(Self {
            handle,
            workers,
            permits: Arc::new(Semaphore::new(workers)),
            tasks: Mutex::new(JoinSet::new()),
            failures,
            closed: AtomicBool::new(false),
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Receive failures of tasks spawned after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskFailure> {
        self.failures.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of tracked tasks that have not been reaped yet.
    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Queue `task`. It starts once a worker slot is free.
    ///
    /// An error returned by the task is logged and published to subscribers.
    pub fn execute<F>(&self, name: &str, task: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        if self.is_closed() {
            return Err(CacheError::closed("background executor"));
        }

        let permits = Arc::clone(&self.permits);
        let failures = self.failures.clone();
        let name = name.to_string();

        let mut tasks = self.tasks.lock();
        // `shutdown` flips the flag before taking the set under this lock.
        if self.is_closed() {
            return Err(CacheError::closed("background executor"));
        }
        // Reap finished tasks so the set does not grow without bound.
        while tasks.try_join_next().is_some() {}

        tasks.spawn_on(
            async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                if let Err(e) = task.await {
                    warn!("Background task {} failed: {}", name, e);
                    // No subscribers is fine.
                    let _ = failures.send(TaskFailure {
                        task: name,
                        message: e.to_string(),
                    });
                }
            },
            &self.handle,
        );
        Ok(())
    }

    /// Stop accepting tasks, wait up to `grace` for queued ones, then abort
    /// the rest. Calling it again is a no-op.
    pub async fn shutdown(&self, grace: Duration) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        if tasks.is_empty() {
            debug!("Background executor stopped with no pending tasks");
            return;
        }

        match timeout(grace, drain(&mut tasks)).await {
            Ok(()) => info!("Background executor drained"),
            Err(_) => {
                warn!(
                    "Background executor did not drain within {:?}; aborting {} tasks",
                    grace,
                    tasks.len()
                );
                tasks.abort_all();
            }
        }
    }
}

async fn drain(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result
            && e.is_panic()
        {
            warn!("Background task panicked: {}", e);
        }
    }
}

impl std::fmt::Debug for BackgroundExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundExecutor")
            .field("workers", &self.workers)
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}
