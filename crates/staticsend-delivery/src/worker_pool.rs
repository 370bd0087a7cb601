//! Worker pool management with structured concurrency.
//!
//! Provides lifecycle management and graceful shutdown for supervised
//! delivery worker tasks.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    error::{DeliveryError, Result},
    worker::{DeliveryWorker, WorkerContext},
};

/// Supervised set of delivery workers.
///
/// Workers exit on their own once the queue is closed and drained. The
/// cancellation token is the hard stop used when a graceful shutdown times
/// out or the pool is dropped without one.
pub(crate) struct WorkerPool {
    worker_count: usize,
    context: WorkerContext,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<Result<()>>>,
}

impl WorkerPool {
    pub(crate) fn new(worker_count: usize, context: WorkerContext) -> Self {
        Self {
            worker_count,
            context,
            cancellation_token: CancellationToken::new(),
            worker_handles: Vec::new(),
        }
    }

    /// Spawn all configured workers. Returns immediately after spawning.
    pub(crate) async fn spawn_workers(&mut self) {
        info!(worker_count = self.worker_count, "spawning delivery workers");

        {
            let mut stats = self.context.stats.write().await;
            stats.active_workers = self.worker_count;
        }

        for worker_id in 0..self.worker_count {
            let worker =
                DeliveryWorker::new(worker_id, self.context.clone(), self.cancellation_token.clone());

            let handle = tokio::spawn(async move {
                info!(worker_id, "delivery worker starting");

                let result = worker.run().await;

                if let Err(ref error) = result {
                    error!(
                        worker_id,
                        error = %error,
                        "delivery worker terminated with error"
                    );
                } else {
                    info!(worker_id, "delivery worker stopped gracefully");
                }

                result
            });

            self.worker_handles.push(handle);
        }

        info!(spawned_workers = self.worker_handles.len(), "all delivery workers spawned");
    }

    /// Waits for every worker to finish draining the closed queue.
    ///
    /// The queue must already be closed, otherwise workers keep waiting for
    /// jobs until the timeout fires.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` after aborting the workers if they do not
    /// finish within `timeout`, or `WorkerPanic` for the first worker that
    /// panicked.
    pub(crate) async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_ms = timeout.as_millis(),
            "waiting for delivery workers to drain"
        );

        let handles = std::mem::take(&mut self.worker_handles);
        let abort_handles: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();

        let shutdown_future = async {
            let mut results = Vec::new();

            for (worker_id, handle) in handles.into_iter().enumerate() {
                match handle.await {
                    Ok(worker_result) => {
                        if let Err(error) = worker_result {
                            warn!(
                                worker_id,
                                error = %error,
                                "worker completed with error during shutdown"
                            );
                        }
                        results.push(Ok(()));
                    },
                    Err(join_error) => {
                        error!(
                            worker_id,
                            error = %join_error,
                            "worker task panicked during shutdown"
                        );
                        results.push(Err(DeliveryError::WorkerPanic {
                            worker_id,
                            error: format!("{join_error}"),
                        }));
                    },
                }
            }

            results
        };

        let outcome = tokio::time::timeout(timeout, shutdown_future).await;

        {
            let mut stats = self.context.stats.write().await;
            stats.active_workers = 0;
        }

        match outcome {
            Ok(results) => {
                let total_workers = results.len();
                let mut failures = results.into_iter().filter_map(std::result::Result::err);
                if let Some(first) = failures.next() {
                    warn!(
                        error_count = failures.count() + 1,
                        total_workers,
                        "some workers panicked during shutdown"
                    );
                    return Err(first);
                }
                info!("worker pool shutdown completed");
                Ok(())
            },
            Err(_timeout) => {
                error!(
                    timeout_ms = timeout.as_millis(),
                    "worker shutdown timed out, aborting remaining workers"
                );
                self.cancellation_token.cancel();
                for handle in abort_handles {
                    handle.abort();
                }
                self.fail_stranded_jobs().await;
                Err(DeliveryError::ShutdownTimeout { timeout })
            },
        }
    }

    /// Reports every job an aborted worker was still sending.
    async fn fail_stranded_jobs(&self) {
        let stranded = self.context.take_in_flight();
        if stranded.is_empty() {
            return;
        }

        {
            let mut stats = self.context.stats.write().await;
            stats.in_flight_deliveries =
                stats.in_flight_deliveries.saturating_sub(stranded.len() as u64);
        }

        for job in stranded {
            let attempts = job.attempt() + 1;
            error!(job_id = %job.id(), attempts, "in-flight delivery aborted by shutdown timeout");
            self.context.report_failure(job, attempts, "aborted by shutdown timeout").await;
        }
    }

    /// Check if any workers are still running.
    pub(crate) fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|h| !h.is_finished())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.has_active_workers() && !self.cancellation_token.is_cancelled() {
            let active_count = self.worker_handles.iter().filter(|h| !h.is_finished()).count();
            error!(
                active_workers = active_count,
                "worker pool dropped with active workers, forcing cancellation"
            );

            self.cancellation_token.cancel();

            warn!("dispatcher was not shut down gracefully; call shutdown() before dropping");
        }
    }
}
