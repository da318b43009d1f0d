//! Abort Signals
//!
//! A cloneable cancellation flag for in-flight requests. Every clone observes
//! the same flag, and aborting before anyone waits is not lost: a later
//! `aborted().await` completes immediately.

use std::sync::Arc;

use tokio::sync::watch;

/// Cancellation flag shared between a request and whoever may cancel it
#[derive(Clone, Debug)]
pub struct AbortSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortSignal {
    /// Create a new, not yet aborted, signal
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Abort every holder of this signal
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    /// Whether `abort` has been called
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal is aborted
    pub async fn aborted(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this only returns once aborted
        let _ = rx.wait_for(|aborted| *aborted).await;
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}
