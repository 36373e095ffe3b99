//! Cooperative cancellation.
//!
//! A [`CancelContext`] is owned by whoever started a long-running chain
//! (a backfill loop, a live query). Everything derived from that chain holds
//! a [`CancelToken`], which can only observe the flag. Cancellation is never
//! preemptive: a chain checks its token after each suspension point and
//! before any side effect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Owning side of a cancellation flag.
#[derive(Debug, Default)]
pub struct CancelContext {
    inner: Arc<Inner>,
}

impl CancelContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only handle for derived async chains.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Set the flag and wake every task waiting in [`CancelToken::cancelled`].
    /// Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }
}

/// Observer side of a cancellation flag.
#[derive(Clone, Debug)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        Self {
            inner: Arc::new(Inner::default()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the owner has cancelled.
    pub fn ensure_active(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when the owner cancels. Returns immediately if it already has.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Marker returned when a chain stops because its context was cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn token_observes_cancel() {
        let ctx = CancelContext::new();
        let token = ctx.token();
        assert!(token.ensure_active().is_ok());

        ctx.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.ensure_active(), Err(Cancelled));

        ctx.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn never_token_stays_active() {
        assert!(!CancelToken::never().is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_wakes_waiters() {
        let ctx = CancelContext::new();
        let token = ctx.token();
        let waiter = tokio::spawn(async move { token.cancelled().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        ctx.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_returns_when_already_set() {
        let ctx = CancelContext::new();
        ctx.cancel();
        tokio::time::timeout(Duration::from_millis(100), ctx.token().cancelled())
            .await
            .expect("should not block");
    }
}
