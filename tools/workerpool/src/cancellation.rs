//! A single-writer, many-readers abort signal (§5: "the one mutable map is
//! the compilator's per-package done broadcast table ... only *closed*,
//! never assigned, thereafter" — this is the analogous primitive for the
//! pool-wide abort channel).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct Cancellation(Arc<Inner>);

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent. The first caller's error is what the pool ultimately
    /// returns; later callers just confirm the pool is already unwinding.
    pub fn cancel(&self) {
        if !self.0.cancelled.swap(true, Ordering::SeqCst) {
            self.0.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`Cancellation::cancel`] has been called. Resolves
    /// immediately if it already has.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.0.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_wakes_pending_waiters() {
        let cancel = Cancellation::new();
        let waiter = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
            })
        };
        tokio::task::yield_now().await;
        cancel.cancel();
        waiter.await.unwrap();
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_if_already_cancelled() {
        let cancel = Cancellation::new();
        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_millis(100), cancel.cancelled())
            .await
            .expect("should not time out");
    }
}
