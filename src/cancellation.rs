//! A minimal cooperative cancellation signal.
//!
//! The teacher crate has no direct analogue (its `NodeContext` carries no
//! cancellation handle), so this is built from first principles using the
//! `tokio::sync` primitives already in the dependency stack rather than
//! pulling in `tokio-util` for a single type.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A cloneable, shareable handle that can be signaled once and observed
/// from many places. Cloning shares the same underlying signal.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<Inner>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Idempotent; wakes every waiter.
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    /// Whether [`Self::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve immediately if already cancelled, otherwise wait.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.0.notify.notified().await;
    }
}
