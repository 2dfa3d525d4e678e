//! Completion callbacks for background `load_all`.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::CacheError;

/// Notified when a background load finishes.
///
/// On failure `on_exception` runs first; `on_completion` always runs last.
pub trait CompletionListener: Send + Sync {
    fn on_completion(&self);

    fn on_exception(&self, error: &CacheError);
}

/// Listener that ignores both callbacks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCompletion;

impl CompletionListener for NoopCompletion {
    fn on_completion(&self) {}

    fn on_exception(&self, _error: &CacheError) {}
}

/// Listener that can be awaited.
#[derive(Debug, Default)]
pub struct CompletionWaiter {
    done: AtomicBool,
    error: Mutex<Option<String>>,
    notify: Notify,
}

impl CompletionWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Message of the failure reported before completion, if any.
    pub fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }

    /// Wait until `on_completion` has been called.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_done() {
                return;
            }
            notified.await;
        }
    }
}

impl CompletionListener for CompletionWaiter {
    fn on_completion(&self) {
        self.done.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    fn on_exception(&self, error: &CacheError) {
        *self.error.lock() = Some(error.to_string());
    }
}
