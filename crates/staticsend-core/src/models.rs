//! Delivery job model and strongly-typed identifiers.
//!
//! A [`DeliveryJob`] is created by the caller, handed to the dispatcher by
//! value, and travels through the state machine below until it reaches a
//! terminal status. Its [`OutcomeReport`] is what persistence sees.
//!
//! ```text
//! Queued -> Sending -> Delivered
//!   |          |    -> RetryScheduled -> Queued
//!   |          |             |
//!   +----------+-------------+--> PermanentlyFailed
//! ```

use std::{
    collections::{BTreeMap, HashSet},
    fmt,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Subject line used for form submission notifications.
pub const FORM_SUBMISSION_SUBJECT: &str = "New Form Submission";

const FORM_SUBMISSION_SIGNATURE: &str = "This email was sent automatically by staticSend";

/// Strongly-typed delivery job identifier.
///
/// ```
/// use staticsend_core::JobId;
/// let job_id = JobId::new();
/// println!("queued job {job_id}");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Creates a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Lifecycle status of a delivery job inside the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Buffered and waiting for a worker.
    Queued,

    /// A worker is attempting delivery through the transport.
    Sending,

    /// Delivery failed; the job re-enters the queue after a backoff delay.
    RetryScheduled,

    /// Terminal success state.
    Delivered,

    /// Terminal failure state: retries exhausted, non-retryable error, or
    /// re-submission rejected.
    PermanentlyFailed,
}

impl JobStatus {
    /// Returns true for states a job never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::PermanentlyFailed)
    }

    /// Whether a job may move from `self` to `next`.
    ///
    /// A queued job fails without reaching `Sending` when shutdown finds it
    /// still buffered; a parked retry fails when shutdown cancels it or the
    /// queue refuses it back.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Sending | Self::PermanentlyFailed)
                | (Self::Sending, Self::Delivered | Self::RetryScheduled | Self::PermanentlyFailed)
                | (Self::RetryScheduled, Self::Queued | Self::PermanentlyFailed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Sending => write!(f, "sending"),
            Self::RetryScheduled => write!(f, "retry_scheduled"),
            Self::Delivered => write!(f, "delivered"),
            Self::PermanentlyFailed => write!(f, "permanently_failed"),
        }
    }
}

/// Final outcome reported to persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// The transport accepted the message.
    Delivered,
    /// The job reached `PermanentlyFailed`.
    Failed,
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered => write!(f, "delivered"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Outbound notification owned by the dispatcher once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryJob {
    id: JobId,
    recipients: Vec<String>,
    subject: String,
    body: String,
    attempt: u32,
    status: JobStatus,
    created_at: DateTime<Utc>,
}

impl DeliveryJob {
    /// Builds a `Queued` job with `attempt = 0`, stamped with the current
    /// wall-clock time.
    ///
    /// Recipients are trimmed and de-duplicated keeping the first
    /// occurrence. An empty list or a blank entry is rejected.
    pub fn new<I, S>(recipients: I, subject: impl Into<String>, body: impl Into<String>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();

        for (position, recipient) in recipients.into_iter().enumerate() {
            let trimmed = recipient.as_ref().trim();
            if trimmed.is_empty() {
                return Err(CoreError::BlankRecipient { position });
            }
            if seen.insert(trimmed.to_string()) {
                ordered.push(trimmed.to_string());
            }
        }

        if ordered.is_empty() {
            return Err(CoreError::NoRecipients);
        }

        Ok(Self {
            id: JobId::new(),
            recipients: ordered,
            subject: subject.into(),
            body: body.into(),
            attempt: 0,
            status: JobStatus::Queued,
            created_at: Utc::now(),
        })
    }

    /// Builds the notification sent when a form receives a submission.
    ///
    /// Fields are listed as `key: value` lines in key order, followed by a
    /// fixed signature.
    pub fn form_submission<I, S>(recipients: I, fields: &BTreeMap<String, String>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if fields.is_empty() {
            return Err(CoreError::InvalidInput("form submission has no fields".to_string()));
        }

        let mut body = String::from("You have received a new form submission:\n\n");
        for (key, value) in fields {
            body.push_str(key);
            body.push_str(": ");
            body.push_str(value);
            body.push('\n');
        }
        body.push_str("\n---\n");
        body.push_str(FORM_SUBMISSION_SIGNATURE);

        Self::new(recipients, FORM_SUBMISSION_SUBJECT, body)
    }

    /// Replaces the creation timestamp, for callers that read time from an
    /// injected clock.
    #[must_use]
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Unique identifier of this job.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Destination addresses in submission order.
    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// Message subject.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Message body.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Number of delivery attempts already made and failed.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// When the job was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current lifecycle status.
    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Moves the job to `next`.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` if the state machine has no such edge; the status
    /// is left unchanged.
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition { from: self.status, to: next });
        }
        self.status = next;
        Ok(())
    }

    /// Records a failed attempt and returns the new attempt count.
    pub fn record_failed_attempt(&mut self) -> u32 {
        self.attempt = self.attempt.saturating_add(1);
        self.attempt
    }
}

/// Terminal outcome handed to the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeReport {
    /// Job the outcome belongs to.
    pub job_id: JobId,

    /// Delivered or failed.
    pub outcome: DeliveryOutcome,

    /// Total transport attempts made for this job (0 when the job never
    /// reached the transport).
    pub attempts: u32,

    /// Recipients the job was addressed to.
    pub recipients: Vec<String>,

    /// Last error observed, for failed outcomes.
    pub error: Option<String>,

    /// When the outcome was decided.
    pub recorded_at: DateTime<Utc>,
}

impl OutcomeReport {
    /// Report for a successful delivery.
    pub fn delivered(job: &DeliveryJob, attempts: u32, recorded_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job.id(),
            outcome: DeliveryOutcome::Delivered,
            attempts,
            recipients: job.recipients().to_vec(),
            error: None,
            recorded_at,
        }
    }

    /// Report for a permanent failure.
    pub fn failed(
        job: &DeliveryJob,
        attempts: u32,
        error: impl Into<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: job.id(),
            outcome: DeliveryOutcome::Failed,
            attempts,
            recipients: job.recipients().to_vec(),
            error: Some(error.into()),
            recorded_at,
        }
    }
}
