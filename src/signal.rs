//! One-shot shutdown signal.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Transitions once from "running" to "signaled" and never back.
///
/// Observing is a plain atomic load, so the replenisher can check it between
/// steps without blocking; [`triggered`](ShutdownSignal::triggered) lets it
/// cut its poll sleep short.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    signaled: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal shutdown. Returns `true` only for the call that made the transition.
    pub fn trigger(&self) -> bool {
        let first = !self.signaled.swap(true, Ordering::AcqRel);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    /// Resolves once the signal has fired (immediately if it already has).
    pub async fn triggered(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent trigger is not missed.
        notified.as_mut().enable();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }
}
