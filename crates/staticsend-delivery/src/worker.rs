//! Delivery worker and retry scheduling.
//!
//! A worker pops jobs until the queue is closed and empty, so a graceful
//! shutdown drains everything already buffered. Failed attempts that may be
//! retried are parked in a tracked task that sleeps out the backoff and
//! re-enqueues the job at the tail. Shutdown cancels those tasks and any
//! job still parked is reported as failed.
//!
//! Each worker registers the job it is sending in the shared in-flight map.
//! Removing a job from that map claims its outcome report, so a job whose
//! worker is aborted by a shutdown timeout is reported once by the pool and
//! never again by the worker.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use staticsend_core::{Clock, DeliveryJob, JobStatus, OutcomeReport};
use tokio::sync::RwLock;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    dispatcher::DispatcherStats,
    error::{ErrorCategory, Result, TransportError},
    queue::JobQueue,
    retry::{RetryContext, RetryDecision, RetryPolicy},
    sink::PersistenceSink,
    transport::Transport,
};

/// Everything a worker and its retry tasks share with the dispatcher.
#[derive(Debug, Clone)]
pub(crate) struct WorkerContext {
    pub(crate) queue: Arc<JobQueue>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) sink: Arc<dyn PersistenceSink>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) attempt_timeout: Duration,
    pub(crate) stats: Arc<RwLock<DispatcherStats>>,
    /// Cancelled when shutdown begins; stops retry scheduling.
    pub(crate) retry_cancel: CancellationToken,
    pub(crate) retry_tasks: TaskTracker,
    /// Job each worker is currently sending, keyed by worker id.
    pub(crate) in_flight: Arc<Mutex<BTreeMap<usize, DeliveryJob>>>,
}

impl WorkerContext {
    /// Reports a job as permanently failed.
    pub(crate) async fn report_failure(&self, mut job: DeliveryJob, attempts: u32, reason: &str) {
        advance(&mut job, JobStatus::PermanentlyFailed);
        {
            let mut stats = self.stats.write().await;
            stats.permanent_failures += 1;
        }
        let report = OutcomeReport::failed(&job, attempts, reason, self.clock.now_system().into());
        self.sink.record_outcome(report).await;
    }

    fn track_in_flight(&self, worker_id: usize, job: &DeliveryJob) {
        self.lock_in_flight().insert(worker_id, job.clone());
    }

    /// Claims the outcome of the worker's current attempt. False when the
    /// job was already taken by [`take_in_flight`](Self::take_in_flight).
    fn release_in_flight(&self, worker_id: usize) -> bool {
        self.lock_in_flight().remove(&worker_id).is_some()
    }

    /// Removes and returns every job still being sent, in worker order.
    pub(crate) fn take_in_flight(&self) -> Vec<DeliveryJob> {
        std::mem::take(&mut *self.lock_in_flight()).into_values().collect()
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, BTreeMap<usize, DeliveryJob>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Moves `job` to `next`. An edge the state machine lacks is logged and
/// ignored.
pub(crate) fn advance(job: &mut DeliveryJob, next: JobStatus) {
    if let Err(error) = job.transition(next) {
        error!(job_id = %job.id(), error = %error, "job status out of sync");
    }
}

/// Individual worker that processes queued jobs.
pub(crate) struct DeliveryWorker {
    id: usize,
    context: WorkerContext,
    cancellation_token: CancellationToken,
}

impl DeliveryWorker {
    pub(crate) fn new(
        id: usize,
        context: WorkerContext,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { id, context, cancellation_token }
    }

    /// Main worker loop; processes jobs until the queue is closed and
    /// drained, or the pool is cancelled outright.
    pub(crate) async fn run(&self) -> Result<()> {
        loop {
            let next = tokio::select! {
                biased;
                () = self.cancellation_token.cancelled() => {
                    info!(worker_id = self.id, "delivery worker cancelled");
                    break;
                }
                job = self.context.queue.pop() => job,
            };

            let Some(job) = next else {
                debug!(worker_id = self.id, "queue closed and drained");
                break;
            };

            self.process_job(job).await;
        }

        Ok(())
    }

    async fn process_job(&self, mut job: DeliveryJob) {
        let attempt_number = job.attempt() + 1;
        advance(&mut job, JobStatus::Sending);

        {
            let mut stats = self.context.stats.write().await;
            stats.attempts += 1;
            stats.in_flight_deliveries += 1;
        }
        self.context.track_in_flight(self.id, &job);

        debug!(
            worker_id = self.id,
            job_id = %job.id(),
            attempt_number,
            status = %job.status(),
            recipients = job.recipients().len(),
            "attempting delivery"
        );

        let result = self.attempt_delivery(&job).await;

        if !self.context.release_in_flight(self.id) {
            debug!(worker_id = self.id, job_id = %job.id(), "outcome already reported by shutdown");
            return;
        }

        {
            let mut stats = self.context.stats.write().await;
            stats.in_flight_deliveries -= 1;
            if result.is_ok() {
                stats.delivered += 1;
            }
        }

        match result {
            Ok(()) => {
                advance(&mut job, JobStatus::Delivered);
                info!(worker_id = self.id, job_id = %job.id(), attempt_number, "delivery succeeded");
                let report =
                    OutcomeReport::delivered(&job, attempt_number, self.context.clock.now_system().into());
                self.context.sink.record_outcome(report).await;
            },
            Err(error) => self.handle_failure(job, attempt_number, &error).await,
        }
    }

    async fn attempt_delivery(&self, job: &DeliveryJob) -> std::result::Result<(), TransportError> {
        let timeout = self.context.attempt_timeout;
        let attempt = self.context.transport.attempt(job.recipients(), job.subject(), job.body());

        match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result,
            Err(_elapsed) => Err(TransportError::timeout(timeout)),
        }
    }

    async fn handle_failure(&self, mut job: DeliveryJob, attempt_number: u32, error: &TransportError) {
        let decision = if self.context.retry_cancel.is_cancelled() {
            RetryDecision::GiveUp { reason: "dispatcher shutting down".to_string() }
        } else {
            RetryContext::new(attempt_number, error, &self.context.retry_policy).decide_retry()
        };

        match decision {
            RetryDecision::Retry { delay } => {
                job.record_failed_attempt();
                advance(&mut job, JobStatus::RetryScheduled);
                {
                    let mut stats = self.context.stats.write().await;
                    stats.retries_scheduled += 1;
                }
                warn!(
                    worker_id = self.id,
                    job_id = %job.id(),
                    attempt_number,
                    retry_in_ms = delay.as_millis(),
                    category = %ErrorCategory::from(error),
                    error = %error,
                    "delivery failed, retry scheduled"
                );
                schedule_retry(self.context.clone(), job, delay);
            },
            RetryDecision::GiveUp { reason } => {
                error!(
                    worker_id = self.id,
                    job_id = %job.id(),
                    attempt_number,
                    category = %ErrorCategory::from(error),
                    error = %error,
                    reason = %reason,
                    "delivery permanently failed"
                );
                self.context.report_failure(job, attempt_number, &error.to_string()).await;
            },
        }
    }
}

/// Parks `job` for `delay`, then puts it back at the tail of the queue.
fn schedule_retry(context: WorkerContext, mut job: DeliveryJob, delay: Duration) {
    let tracker = context.retry_tasks.clone();

    tracker.spawn(async move {
        tokio::select! {
            biased;
            () = context.retry_cancel.cancelled() => {
                let attempts = job.attempt();
                warn!(job_id = %job.id(), attempts, "pending retry cancelled by shutdown");
                context.report_failure(job, attempts, "retry cancelled by shutdown").await;
            }
            () = context.clock.sleep(delay) => {
                advance(&mut job, JobStatus::Queued);
                match context.queue.try_push(job) {
                    Ok(()) => debug!("retry re-enqueued"),
                    Err(rejected) => {
                        let reason = rejected.reason();
                        let job = rejected.into_job();
                        let attempts = job.attempt();
                        error!(
                            job_id = %job.id(),
                            attempts,
                            reason,
                            "retry re-submission rejected"
                        );
                        context.report_failure(job, attempts, reason).await;
                    },
                }
            }
        }
    });
}
