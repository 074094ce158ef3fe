//! Tab shutdown signal shared by background tasks.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// One-shot broadcast signal; once triggered it stays triggered.
#[derive(Debug, Default)]
pub struct Shutdown {
    notify: Notify,
    triggered: AtomicBool,
}

impl Shutdown {
    /// Create an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger the signal and wake every waiter.
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether the signal was triggered.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Resolve once the signal is triggered.
    pub async fn wait(&self) {
        loop {
            // registered before the flag check so a concurrent trigger is not lost
            let notified = self.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}
