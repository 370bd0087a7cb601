//! Outcome-recording sink.

use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use anyhow::{bail, Result};
use staticsend_core::{DeliveryOutcome, JobId, OutcomeReport};
use staticsend_delivery::PersistenceSink;
use tokio::sync::Notify;

/// Sink that keeps every report in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<OutcomeReport>>,
    recorded: Notify,
}

impl RecordingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every report received, in arrival order.
    pub fn reports(&self) -> Vec<OutcomeReport> {
        self.lock().clone()
    }

    /// Reports with a delivered outcome.
    pub fn delivered(&self) -> Vec<OutcomeReport> {
        self.with_outcome(DeliveryOutcome::Delivered)
    }

    /// Reports with a failed outcome.
    pub fn failed(&self) -> Vec<OutcomeReport> {
        self.with_outcome(DeliveryOutcome::Failed)
    }

    /// Reports received for `job_id`.
    pub fn reports_for(&self, job_id: JobId) -> Vec<OutcomeReport> {
        self.lock().iter().filter(|report| report.job_id == job_id).cloned().collect()
    }

    /// Waits until at least `count` reports have arrived.
    ///
    /// # Errors
    ///
    /// Fails if `timeout` of real time passes first.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Result<Vec<OutcomeReport>> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.recorded.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let reports = self.lock();
                if reports.len() >= count {
                    return Ok(reports.clone());
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                bail!("timeout waiting for {count} outcome reports, got {}", self.lock().len());
            }
        }
    }

    fn with_outcome(&self, outcome: DeliveryOutcome) -> Vec<OutcomeReport> {
        self.lock().iter().filter(|report| report.outcome == outcome).cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<OutcomeReport>> {
        self.reports.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl PersistenceSink for RecordingSink {
    async fn record_outcome(&self, report: OutcomeReport) {
        self.lock().push(report);
        self.recorded.notify_waiters();
    }
}
