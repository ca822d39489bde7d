//! A bounded worker pool: `W` cooperating workers drawn from one process's
//! async runtime threads (§5). Jobs are handed to the pool already in
//! schedule order; the pool's only job is to bound how many run at once and
//! to stop launching new ones once cancellation fires.

use crate::Cancellation;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

pub struct Pool {
    concurrency: usize,
}

impl Pool {
    pub fn new(concurrency: usize) -> Self {
        assert!(concurrency > 0, "worker pool concurrency must be at least 1");
        Self { concurrency }
    }

    /// Runs `jobs` in the order given, launching up to `concurrency` at a
    /// time. Once `cancel` fires, no further jobs are launched; jobs already
    /// running are drained to completion (best effort -- up to one extra job
    /// per worker may still complete after cancellation, per §5).
    pub async fn run<T, E, F, Fut>(&self, jobs: Vec<F>, cancel: &Cancellation) -> Vec<Result<T, E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut set: JoinSet<Result<T, E>> = JoinSet::new();
        let mut results = Vec::with_capacity(jobs.len());

        for job in jobs {
            if cancel.is_cancelled() {
                break;
            }
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("worker pool semaphore is never closed");
            set.spawn(async move {
                let _permit = permit;
                job().await
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(join_error) => {
                    warn!(%join_error, "worker task panicked");
                }
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn respects_concurrency_bound() {
        let pool = Pool::new(2);
        let cancel = Cancellation::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let jobs: Vec<_> = (0..6)
            .map(|_| {
                let in_flight = in_flight.clone();
                let max_seen = max_seen.clone();
                move || async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ()>(())
                }
            })
            .collect();

        let results = pool.run(jobs, &cancel).await;
        assert_eq!(results.len(), 6);
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn stops_launching_after_cancellation() {
        let pool = Pool::new(1);
        let cancel = Cancellation::new();
        cancel.cancel();
        let launched = Arc::new(AtomicUsize::new(0));

        let jobs: Vec<_> = (0..3)
            .map(|_| {
                let launched = launched.clone();
                move || async move {
                    launched.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(())
                }
            })
            .collect();

        let results = pool.run(jobs, &cancel).await;
        assert_eq!(results.len(), 0);
        assert_eq!(launched.load(Ordering::SeqCst), 0);
    }
}
