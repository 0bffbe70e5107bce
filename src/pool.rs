//! Bounded worker pool for blocking remote calls.
//!
//! Remote store methods block.  [`WorkerPool::run`] moves each call onto
//! Tokio's blocking thread pool behind a semaphore, so at most
//! `workers` calls are in flight and the async caller only awaits a
//! completion signal.
//!
//! Cancellation: dropping the future returned by `run` does not stop the
//! blocking call.  The task keeps its permit, runs to completion, and its
//! result is discarded.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use tokio::sync::Semaphore;

use crate::errors::StorageError;
use crate::metrics::{
    STORAGE_OPERATIONS_TOTAL, STORAGE_OPERATION_DURATION_SECONDS, WORKER_POOL_IN_FLIGHT,
};

/// Fixed-size pool of blocking workers.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Create a pool allowing `workers` concurrent blocking calls.
    pub fn new(workers: usize) -> Self {
        let size = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of free worker slots right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `job` on a worker thread and wait for its result.
    ///
    /// `operation` names the job in logs and metrics.
    pub async fn run<T, F>(&self, operation: &'static str, job: F) -> Result<T, StorageError>
    where
        F: FnOnce() -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| StorageError::unavailable(operation, "worker pool closed"))?;

        let handle = tokio::task::spawn_blocking(move || {
            // The permit travels with the job so an abandoned caller
            // cannot free a slot that is still busy.
            let _permit = permit;
            let _in_flight = InFlight::enter();
            let start = Instant::now();
            let result = job();
            let elapsed = start.elapsed();

            let status = match &result {
                Ok(_) => "ok",
                Err(e) => e.code(),
            };
            counter!(STORAGE_OPERATIONS_TOTAL, "operation" => operation, "status" => status)
                .increment(1);
            histogram!(STORAGE_OPERATION_DURATION_SECONDS, "operation" => operation)
                .record(elapsed.as_secs_f64());
            tracing::debug!(
                operation,
                status,
                elapsed_ms = elapsed.as_millis() as u64,
                "storage operation finished"
            );
            result
        });

        match handle.await {
            Ok(result) => result,
            Err(e) => Err(StorageError::unavailable(
                operation,
                format!("worker task failed: {e}"),
            )),
        }
    }
}

/// Holds one unit of the in-flight gauge; released on drop, including
/// when the job panics.
struct InFlight;

impl InFlight {
    fn enter() -> Self {
        gauge!(WORKER_POOL_IN_FLIGHT).increment(1.0);
        InFlight
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        gauge!(WORKER_POOL_IN_FLIGHT).decrement(1.0);
    }
}
