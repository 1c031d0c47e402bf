use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Cooperative cancellation flag shared between a handler and whoever
/// started it.
///
/// Raising the flag never interrupts anything by itself; handlers poll
/// [`CancelToken::is_cancelled`] at each retry and chunk, or await
/// [`CancelToken::cancelled`] alongside blocking I/O.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag and wake every task waiting in [`cancelled`](Self::cancelled).
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can be reused for another run.
    pub fn reset(&self) {
        self.inner.flag.store(false, Ordering::SeqCst);
    }

    /// Resolves once the flag is raised. Returns immediately if it already is.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent cancel() is not lost.
            notified.as_mut().enable();

            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
