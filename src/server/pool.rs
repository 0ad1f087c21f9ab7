//! Fixed-size worker pool
//!
//! `size` worker tasks pull jobs from one unbounded queue, so work beyond
//! capacity waits for a free worker instead of being dropped. Shutdown stops
//! intake, lets workers drain what is queued, and cancels whatever is still
//! running once the grace period runs out. Cancellation takes effect at the
//! job's next await point.

use crate::common::{Error, Result};
use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

pub type Job = BoxFuture<'static, ()>;

/// How a pool shutdown ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every queued and in-flight job finished within the grace period
    Drained,
    /// The grace period elapsed; `cancelled` workers were still busy
    Forced { cancelled: usize },
}

pub struct WorkerPool {
    tx: mpsc::UnboundedSender<Job>,
    workers: Vec<JoinHandle<()>>,
    pending: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let pending = Arc::new(AtomicUsize::new(0));

        tracing::debug!("Spawning {} request workers", size);
        let workers = (0..size)
            .map(|worker_id| {
                let rx = Arc::clone(&rx);
                let pending = Arc::clone(&pending);
                tokio::spawn(async move {
                    loop {
                        let job = { rx.lock().await.recv().await };
                        let Some(job) = job else {
                            break;
                        };
                        // a panicking job must not take its worker down with it
                        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                            tracing::error!("Worker {} recovered from a panicking job", worker_id);
                        }
                        pending.fetch_sub(1, Ordering::AcqRel);
                    }
                    tracing::debug!("Worker {} exiting", worker_id);
                })
            })
            .collect();

        Self {
            tx,
            workers,
            pending,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Jobs submitted and not yet finished (queued or running)
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Queue a job for the next free worker
    pub fn submit(&self, job: Job) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.send(job).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            Error::Internal("worker pool is shut down".into())
        })
    }

    /// Stop intake, drain within `grace`, then cancel what is left
    pub async fn shutdown(self, grace: Duration) -> ShutdownOutcome {
        let Self {
            tx, mut workers, ..
        } = self;
        drop(tx);

        let drained = tokio::time::timeout(grace, join_all(workers.iter_mut())).await;
        if drained.is_ok() {
            tracing::debug!("Worker pool drained");
            return ShutdownOutcome::Drained;
        }

        let cancelled = workers.iter().filter(|w| !w.is_finished()).count();
        tracing::warn!(
            "Grace period of {:?} elapsed, forcing shutdown of {} workers",
            grace,
            cancelled
        );
        for worker in &workers {
            worker.abort();
        }
        ShutdownOutcome::Forced { cancelled }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[tokio::test]
    async fn test_jobs_beyond_capacity_queue() {
        let pool = WorkerPool::new(2);
        let done = Arc::new(AtomicU64::new(0));

        for _ in 0..10 {
            let done = Arc::clone(&done);
            pool.submit(Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                done.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        let outcome = pool.shutdown(Duration::from_secs(5)).await;
        assert_eq!(outcome, ShutdownOutcome::Drained);
        assert_eq!(done.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_blocked_job_is_cancelled_after_grace() {
        let pool = WorkerPool::new(1);
        pool.submit(Box::pin(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }))
        .unwrap();
        // let the worker pick the job up
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.pending(), 1);

        let started = std::time::Instant::now();
        let outcome = pool.shutdown(Duration::from_millis(100)).await;
        assert_eq!(outcome, ShutdownOutcome::Forced { cancelled: 1 });
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_worker_survives_panicking_job() {
        let pool = WorkerPool::new(1);
        let done = Arc::new(AtomicU64::new(0));

        pool.submit(Box::pin(async {
            panic!("job failure");
        }))
        .unwrap();
        let after = Arc::clone(&done);
        pool.submit(Box::pin(async move {
            after.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        let outcome = pool.shutdown(Duration::from_secs(5)).await;
        assert_eq!(outcome, ShutdownOutcome::Drained);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_size_is_at_least_one() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.shutdown(Duration::from_secs(1)).await, ShutdownOutcome::Drained);
    }
}
