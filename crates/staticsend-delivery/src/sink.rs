//! Outcome persistence.
//!
//! Every job reaches exactly one terminal [`OutcomeReport`], which the
//! dispatcher hands to a [`PersistenceSink`]. Sinks deal with their own
//! failures; nothing they do can fail a delivery.

use staticsend_core::{DeliveryOutcome, OutcomeReport};
use tracing::{info, warn};

/// Receives terminal delivery outcomes.
#[async_trait::async_trait]
pub trait PersistenceSink: Send + Sync + std::fmt::Debug {
    /// Records the outcome of a job.
    ///
    /// Should not block delivery processing. If recording fails, log the
    /// error rather than propagating it.
    async fn record_outcome(&self, report: OutcomeReport);
}

/// Sink that writes outcomes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TracingSink {
    /// Creates a new tracing sink.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl PersistenceSink for TracingSink {
    async fn record_outcome(&self, report: OutcomeReport) {
        match report.outcome {
            DeliveryOutcome::Delivered => info!(
                job_id = %report.job_id,
                attempts = report.attempts,
                recipients = report.recipients.len(),
                "outcome recorded: delivered"
            ),
            DeliveryOutcome::Failed => warn!(
                job_id = %report.job_id,
                attempts = report.attempts,
                recipients = report.recipients.len(),
                error = report.error.as_deref().unwrap_or("unknown"),
                "outcome recorded: failed"
            ),
        }
    }
}
