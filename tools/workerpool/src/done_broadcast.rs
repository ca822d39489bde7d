//! Per-key "done" broadcasts. A compile job waits on its dependencies'
//! broadcasts before starting (§4.4 step 2); a heartbeat logs "waiting"
//! every 5s so a stuck dependency chain is visible in the logs rather than
//! silent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

use crate::Cancellation;

const HEARTBEAT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    Failed,
    Cancelled,
}

struct Entry {
    outcome: Option<Outcome>,
    notify: Arc<Notify>,
}

/// Keyed by package/job fingerprint (or any other stable identity); one
/// entry is created lazily per key the first time it's waited on or closed.
#[derive(Clone)]
pub struct DoneBroadcasts<K> {
    entries: Arc<Mutex<HashMap<K, Entry>>>,
}

impl<K> Default for DoneBroadcasts<K>
where
    K: std::hash::Hash + Eq,
{
    fn default() -> Self {
        Self { entries: Arc::new(Mutex::new(HashMap::new())) }
    }
}

impl<K> DoneBroadcasts<K>
where
    K: std::hash::Hash + Eq + Clone + std::fmt::Display,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn notify_for(&self, key: &K) -> Arc<Notify> {
        let mut entries = self.entries.lock().expect("done-broadcast lock poisoned");
        entries.entry(key.clone()).or_insert_with(|| Entry { outcome: None, notify: Arc::new(Notify::new()) }).notify.clone()
    }

    fn close(&self, key: &K, outcome: Outcome) {
        let notify = {
            let mut entries = self.entries.lock().expect("done-broadcast lock poisoned");
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry { outcome: None, notify: Arc::new(Notify::new()) });
            entry.outcome = Some(outcome);
            entry.notify.clone()
        };
        notify.notify_waiters();
    }

    pub fn close_success(&self, key: &K) {
        self.close(key, Outcome::Success);
    }

    pub fn close_failure(&self, key: &K) {
        self.close(key, Outcome::Failure);
    }

    fn outcome(&self, key: &K) -> Option<Outcome> {
        self.entries.lock().expect("done-broadcast lock poisoned").get(key).and_then(|e| e.outcome)
    }

    /// Waits until `key`'s broadcast closes, cancellation fires, or a
    /// heartbeat interval elapses (in which case it logs and keeps waiting).
    pub async fn wait(&self, key: &K, cancel: &Cancellation) -> WaitOutcome {
        loop {
            if let Some(outcome) = self.outcome(key) {
                return match outcome {
                    Outcome::Success => WaitOutcome::Ready,
                    Outcome::Failure => WaitOutcome::Failed,
                };
            }
            if cancel.is_cancelled() {
                return WaitOutcome::Cancelled;
            }

            let notify = self.notify_for(key);
            let notified = notify.notified();
            tokio::select! {
                _ = notified => {}
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(HEARTBEAT) => {
                    debug!(%key, "waiting on dependency");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn waiter_unblocks_on_close_success() {
        let table: DoneBroadcasts<String> = DoneBroadcasts::new();
        let cancel = Cancellation::new();
        let key = "go-1.4".to_string();

        let waiter = {
            let table = table.clone();
            let cancel = cancel.clone();
            let key = key.clone();
            tokio::spawn(async move { table.wait(&key, &cancel).await })
        };
        tokio::task::yield_now().await;
        table.close_success(&key);
        assert_eq!(waiter.await.unwrap(), WaitOutcome::Ready);
    }

    #[tokio::test]
    async fn waiter_unblocks_on_cancellation() {
        let table: DoneBroadcasts<String> = DoneBroadcasts::new();
        let cancel = Cancellation::new();
        let key = "consul".to_string();

        let waiter = {
            let table = table.clone();
            let cancel = cancel.clone();
            let key = key.clone();
            tokio::spawn(async move { table.wait(&key, &cancel).await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();
        assert_eq!(waiter.await.unwrap(), WaitOutcome::Cancelled);
    }

    #[tokio::test]
    async fn late_join_sees_already_closed_outcome() {
        let table: DoneBroadcasts<String> = DoneBroadcasts::new();
        let cancel = Cancellation::new();
        let key = "ruby-2.5".to_string();

        table.close_failure(&key);
        assert_eq!(table.wait(&key, &cancel).await, WaitOutcome::Failed);
    }
}
