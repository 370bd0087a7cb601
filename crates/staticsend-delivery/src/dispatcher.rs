//! Dispatcher coordinating the job queue, workers, and retries.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use staticsend_core::{Clock, DeliveryJob, JobId, JobStatus, RealClock};
use tokio::sync::{Mutex, RwLock};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    error::{DeliveryError, Result, TransportError},
    queue::{JobQueue, PushError},
    retry::RetryPolicy,
    sink::PersistenceSink,
    transport::Transport,
    worker::WorkerContext,
    worker_pool::WorkerPool,
};

/// Configuration for the delivery dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Maximum number of buffered jobs.
    pub queue_capacity: usize,

    /// Number of concurrent delivery workers.
    pub worker_count: usize,

    /// Retry policy applied to every job.
    pub retry_policy: RetryPolicy,

    /// Deadline for a single transport attempt.
    pub attempt_timeout: Duration,

    /// Maximum time to wait for workers and retry tasks on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: crate::DEFAULT_QUEUE_CAPACITY,
            worker_count: crate::DEFAULT_WORKER_COUNT,
            retry_policy: RetryPolicy::default(),
            attempt_timeout: Duration::from_secs(crate::DEFAULT_ATTEMPT_TIMEOUT_SECONDS),
            shutdown_timeout: Duration::from_secs(crate::DEFAULT_SHUTDOWN_TIMEOUT_SECONDS),
        }
    }
}

impl DispatcherConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(DeliveryError::configuration("queue_capacity must be greater than 0"));
        }

        if self.worker_count == 0 {
            return Err(DeliveryError::configuration("worker_count must be greater than 0"));
        }

        if self.attempt_timeout.is_zero() {
            return Err(DeliveryError::configuration("attempt_timeout must be greater than 0"));
        }

        if self.shutdown_timeout.is_zero() {
            return Err(DeliveryError::configuration("shutdown_timeout must be greater than 0"));
        }

        self.retry_policy.validate()
    }
}

/// Counters for dispatcher monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Number of running delivery workers.
    pub active_workers: usize,
    /// Jobs buffered and not yet picked up by a worker.
    pub queued: usize,
    /// Transport attempts started.
    pub attempts: u64,
    /// Jobs delivered.
    pub delivered: u64,
    /// Failed attempts that were scheduled for retry.
    pub retries_scheduled: u64,
    /// Jobs that ended in failure.
    pub permanent_failures: u64,
    /// Attempts currently in progress.
    pub in_flight_deliveries: u64,
}

/// Asynchronous notification dispatcher.
///
/// Submissions are validated and buffered without waiting; a fixed pool of
/// workers delivers them through the [`Transport`] and reports each job's
/// terminal outcome to the [`PersistenceSink`] exactly once.
pub struct DeliveryDispatcher {
    config: DispatcherConfig,
    context: WorkerContext,
    shutting_down: AtomicBool,
    worker_pool: Mutex<Option<WorkerPool>>,
}

impl DeliveryDispatcher {
    /// Creates a dispatcher on the real clock. Workers are not started.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if any setting is invalid.
    pub fn new(
        config: DispatcherConfig,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn PersistenceSink>,
    ) -> Result<Self> {
        Self::with_clock(config, transport, sink, Arc::new(RealClock::new()))
    }

    /// Creates a dispatcher whose retry backoff sleeps on `clock`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if any setting is invalid.
    pub fn with_clock(
        config: DispatcherConfig,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn PersistenceSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let context = WorkerContext {
            queue: Arc::new(JobQueue::new(config.queue_capacity)),
            transport,
            sink,
            clock,
            retry_policy: config.retry_policy.clone(),
            attempt_timeout: config.attempt_timeout,
            stats: Arc::new(RwLock::new(DispatcherStats::default())),
            retry_cancel: CancellationToken::new(),
            retry_tasks: TaskTracker::new(),
            in_flight: Arc::new(StdMutex::new(BTreeMap::new())),
        };

        Ok(Self { config, context, shutting_down: AtomicBool::new(false), worker_pool: Mutex::new(None) })
    }

    /// Configuration this dispatcher was built with.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Checks the transport's connection to its relay.
    pub async fn verify_transport(&self) -> std::result::Result<(), TransportError> {
        self.context.transport.verify().await
    }

    /// Spawns the worker pool. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ShuttingDown` if shutdown has begun.
    pub async fn start(&self) -> Result<()> {
        let mut pool = self.worker_pool.lock().await;

        if self.is_shutting_down() {
            return Err(DeliveryError::ShuttingDown);
        }

        if pool.is_some() {
            debug!("delivery dispatcher already started");
            return Ok(());
        }

        info!(
            worker_count = self.config.worker_count,
            queue_capacity = self.config.queue_capacity,
            max_retries = self.config.retry_policy.max_retries,
            "starting delivery dispatcher"
        );

        let mut worker_pool = WorkerPool::new(self.config.worker_count, self.context.clone());
        worker_pool.spawn_workers().await;
        *pool = Some(worker_pool);

        Ok(())
    }

    /// Builds a job and submits it. Never waits.
    ///
    /// # Errors
    ///
    /// `InvalidJob` for an empty or blank recipient list, `ShuttingDown`
    /// once shutdown has begun, `QueueFull` when the buffer is at capacity.
    pub fn enqueue<I, S>(
        &self,
        recipients: I,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<JobId>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let job = DeliveryJob::new(recipients, subject, body)?.with_created_at(self.now());
        self.submit(job)
    }

    /// Enqueues the notification for a received form submission.
    ///
    /// # Errors
    ///
    /// As [`enqueue`](Self::enqueue); a submission without fields is an
    /// `InvalidJob`.
    pub fn enqueue_form_submission<I, S>(
        &self,
        recipients: I,
        fields: &BTreeMap<String, String>,
    ) -> Result<JobId>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let job = DeliveryJob::form_submission(recipients, fields)?.with_created_at(self.now());
        self.submit(job)
    }

    /// Submits a pre-built job. Never waits.
    ///
    /// # Errors
    ///
    /// `InvalidJob` if the job has already been attempted or is not
    /// `Queued`, otherwise as [`enqueue`](Self::enqueue).
    pub fn submit(&self, job: DeliveryJob) -> Result<JobId> {
        if job.attempt() != 0 {
            return Err(DeliveryError::invalid_job(format!(
                "job {} has already been attempted {} times",
                job.id(),
                job.attempt()
            )));
        }

        if job.status() != JobStatus::Queued {
            return Err(DeliveryError::invalid_job(format!(
                "job {} is {}, expected queued",
                job.id(),
                job.status()
            )));
        }

        if self.is_shutting_down() {
            return Err(DeliveryError::ShuttingDown);
        }

        let job_id = job.id();
        match self.context.queue.try_push(job) {
            Ok(()) => {
                debug!(job_id = %job_id, queue_depth = self.queue_depth(), "job enqueued");
                Ok(job_id)
            },
            Err(PushError::Full(_)) => {
                let capacity = self.context.queue.capacity();
                warn!(job_id = %job_id, capacity, "delivery queue full, job rejected");
                Err(DeliveryError::QueueFull { capacity })
            },
            Err(PushError::Closed(_)) => Err(DeliveryError::ShuttingDown),
        }
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.context.clock.now_system().into()
    }

    /// Jobs buffered and not yet picked up by a worker.
    pub fn queue_depth(&self) -> usize {
        self.context.queue.depth()
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Returns current dispatcher statistics.
    pub async fn stats(&self) -> DispatcherStats {
        let mut stats = self.context.stats.read().await.clone();
        stats.queued = self.queue_depth();
        stats
    }

    /// Gracefully shuts the dispatcher down.
    ///
    /// Stops accepting jobs, cancels pending retries (reporting those jobs
    /// as failed), lets workers drain every buffered job without further
    /// retries, and waits for workers and retry tasks to finish. Jobs left
    /// in the buffer afterwards, for example because the dispatcher was never
    /// started, are reported as failed. Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if the work does not finish within the
    /// configured shutdown timeout, or `WorkerPanic` if a worker panicked.
    pub async fn shutdown(&self) -> Result<()> {
        let first_call = !self.shutting_down.swap(true, Ordering::SeqCst);
        let mut pool = self.worker_pool.lock().await;

        if first_call {
            info!(queue_depth = self.queue_depth(), "shutting down delivery dispatcher");
        }

        let timeout = self.config.shutdown_timeout;
        let started = tokio::time::Instant::now();

        self.context.retry_cancel.cancel();
        self.context.queue.close();

        let workers_result = match pool.take() {
            Some(worker_pool) => worker_pool.shutdown_graceful(timeout).await,
            None => Ok(()),
        };

        for job in self.context.queue.drain() {
            warn!(job_id = %job.id(), "job never attempted before shutdown");
            let attempts = job.attempt();
            self.context.report_failure(job, attempts, "dispatcher shut down before delivery").await;
        }

        self.context.retry_tasks.close();
        let remaining = timeout.saturating_sub(started.elapsed());
        let retries_result =
            if tokio::time::timeout(remaining, self.context.retry_tasks.wait()).await.is_ok() {
                Ok(())
            } else {
                error!(
                    pending_retries = self.context.retry_tasks.len(),
                    "retry tasks did not finish before shutdown timeout"
                );
                Err(DeliveryError::ShutdownTimeout { timeout })
            };

        drop(pool);

        if first_call {
            info!("delivery dispatcher shut down");
        }
        workers_result.and(retries_result)
    }
}

impl Drop for DeliveryDispatcher {
    fn drop(&mut self) {
        if !self.is_shutting_down() {
            self.context.retry_cancel.cancel();
            self.context.queue.close();
        }
    }
}
