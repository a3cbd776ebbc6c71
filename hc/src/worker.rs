//! Bounded worker pool for message handling
//!
//! Receive callbacks must not block the broker's delivery path. Work is queued
//! into a bounded channel and drained by a fixed number of worker tasks, so
//! the amount of in-flight handling stays bounded. CPU-heavy jobs should wrap
//! their computation in `tokio::task::spawn_blocking`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::PoolError;

type Job = BoxFuture<'static, ()>;

/// Fixed set of tasks draining a bounded job queue
pub struct WorkerPool {
    name: String,
    tx: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, workers: usize, queue_depth: usize) -> Self {
        let name = name.into();
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel::<Job>(queue_depth.max(1));
        let rx = Arc::new(Mutex::new(rx));
        debug!(%name, workers, queue_depth, "WorkerPool::new: called");

        let handles = (0..workers)
            .map(|index| {
                let rx = rx.clone();
                let name = name.clone();
                tokio::spawn(async move {
                    loop {
                        let job = rx.lock().await.recv().await;
                        let Some(job) = job else {
                            break;
                        };
                        // A panicking job must not take its worker down with it
                        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                            error!(pool = %name, index, "Job panicked");
                        }
                    }
                    debug!(pool = %name, index, "WorkerPool: worker exiting");
                })
            })
            .collect();

        Self {
            name,
            tx: Some(tx),
            workers: handles,
        }
    }

    pub fn from_config(name: impl Into<String>, config: &WorkerConfig) -> Self {
        Self::new(name, config.count, config.queue_depth)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a job, waiting for room when the queue is full
    pub async fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let tx = self.tx.as_ref().ok_or_else(|| PoolError::Closed(self.name.clone()))?;
        tx.send(Box::pin(job))
            .await
            .map_err(|_| PoolError::Closed(self.name.clone()))
    }

    /// Queue a job without waiting
    pub fn try_submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let tx = self.tx.as_ref().ok_or_else(|| PoolError::Closed(self.name.clone()))?;
        tx.try_send(Box::pin(job)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                warn!(pool = %self.name, "Worker pool is full, rejecting job");
                PoolError::Full(self.name.clone())
            }
            mpsc::error::TrySendError::Closed(_) => PoolError::Closed(self.name.clone()),
        })
    }

    /// Stop accepting jobs and wait for queued ones to finish
    pub async fn shutdown(mut self) {
        info!(pool = %self.name, "Shutting down worker pool");
        self.tx.take();
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                warn!(pool = %self.name, error = %e, "Worker task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_runs_every_submitted_job() {
        let pool = WorkerPool::new("test", 3, 8);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let counter = counter.clone();
            pool.submit(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }

        pool.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn test_concurrency_bounded_by_worker_count() {
        let pool = WorkerPool::new("bounded", 2, 16);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            pool.submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }

        pool.shutdown().await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panicking_job_keeps_worker_alive() {
        let pool = WorkerPool::new("single", 1, 4);
        let ran = Arc::new(AtomicUsize::new(0));

        pool.submit(async {
            if true {
                panic!("job failed");
            }
        })
        .await
        .unwrap();

        for _ in 0..3 {
            let ran = ran.clone();
            pool.submit(async move {
                ran.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }

        pool.shutdown().await;
        assert_eq!(ran.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_try_submit_reports_full_queue() {
        let pool = WorkerPool::new("tiny", 1, 1);
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();

        pool.submit(async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
        })
        .await
        .unwrap();
        started_rx.await.unwrap();

        // The worker is busy; one job fits in the queue, the next does not
        pool.try_submit(async {}).unwrap();
        assert_eq!(pool.try_submit(async {}), Err(PoolError::Full("tiny".to_string())));

        release_tx.send(()).unwrap();
        pool.shutdown().await;
    }
}
