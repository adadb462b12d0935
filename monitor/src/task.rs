//! Cancellable one-shot timers.
//!
//! Every delayed action in the registry (debounce, reconnection) is held
//! as a `ScheduledTask` in the owning subscription record, so cancelling
//! an address cancels exactly its timers and nothing else.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A delayed action that dies with its handle.
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Run `action` after `delay`, unless cancelled or dropped first.
    pub fn once<F>(delay: Duration, action: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        });
        Self { handle }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
