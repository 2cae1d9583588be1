//! Shared worker pools.
//!
//! Two bounded pools exist per process. The IO pool runs decoder work
//! (opening sources, loading frame bytes) and may block on disk; the
//! processing pool runs CPU-bound synthesis (preprocess, pack, DNG write)
//! and never touches source IO. Both execute on `spawn_blocking` threads
//! behind a semaphore, so the async runtime itself never blocks and the
//! number of simultaneous jobs per pool is capped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::debug;

/// Default number of IO pool workers.
pub const IO_POOL_WORKERS: usize = 4;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker panicked: {0}")]
    Panicked(String),

    #[error("pool is shutting down")]
    ShuttingDown,
}

/// A bounded pool of blocking workers.
#[derive(Debug)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    permits: usize,
    in_flight: Arc<AtomicUsize>,
    label: &'static str,
}

impl WorkerPool {
    pub fn new(permits: usize, label: &'static str) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(permits.max(1))),
            permits: permits.max(1),
            in_flight: Arc::new(AtomicUsize::new(0)),
            label,
        }
    }

    /// Run `work` on a blocking thread, waiting for a pool slot first.
    pub async fn run<T, F>(&self, work: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::ShuttingDown)?;

        let in_flight = Arc::clone(&self.in_flight);
        let active = in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(pool = self.label, active, "Pool job starting");

        let label = self.label;
        let result = tokio::task::spawn_blocking(move || {
            let result = work();
            drop(permit);
            result
        })
        .await;

        let remaining = in_flight.fetch_sub(1, Ordering::Relaxed) - 1;
        debug!(pool = label, active = remaining, "Pool job finished");

        result.map_err(|e| PoolError::Panicked(e.to_string()))
    }

    /// Number of jobs currently executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.permits
    }
}

/// The process-wide pool pair, shared by every mounted source.
#[derive(Debug)]
pub struct Pools {
    pub io: WorkerPool,
    pub processing: WorkerPool,
}

impl Pools {
    /// IO pool with the default worker count, processing pool sized to the
    /// hardware parallelism.
    pub fn new() -> Self {
        let cpu_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            io: WorkerPool::new(IO_POOL_WORKERS, "io"),
            processing: WorkerPool::new(cpu_workers, "processing"),
        }
    }

    pub fn with_workers(io_workers: usize, processing_workers: usize) -> Self {
        Self {
            io: WorkerPool::new(io_workers, "io"),
            processing: WorkerPool::new(processing_workers, "processing"),
        }
    }
}

impl Default for Pools {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_returns_value() {
        let pool = WorkerPool::new(2, "test");
        let value = pool.run(|| 40 + 2).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = Arc::new(WorkerPool::new(2, "bounded"));
        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            let peak = Arc::clone(&peak);
            let current = Arc::clone(&current);
            handles.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    current.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panic_is_reported_not_propagated() {
        let pool = WorkerPool::new(1, "panicky");
        let result = pool.run(|| panic!("boom")).await;
        assert!(matches!(result, Err(PoolError::Panicked(_))));

        // The pool still works afterwards.
        let value = pool.run(|| 7).await.unwrap();
        assert_eq!(value, 7);
    }
}
