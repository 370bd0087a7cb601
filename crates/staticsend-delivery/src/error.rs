//! Error types for notification delivery.
//!
//! [`DeliveryError`] covers everything returned to callers of the
//! dispatcher: rejected submissions, bad configuration, and shutdown
//! problems. [`TransportError`] is what a transport reports for a single
//! attempt; the worker classifies it to decide between retrying and giving
//! up, and it never reaches submitters.

use std::{fmt, time::Duration};

use staticsend_core::CoreError;
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors returned by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The job buffer is at capacity.
    #[error("delivery queue is full (capacity {capacity})")]
    QueueFull {
        /// Configured buffer capacity
        capacity: usize,
    },

    /// The dispatcher no longer accepts work.
    #[error("dispatcher is shutting down")]
    ShuttingDown,

    /// The submitted job is malformed.
    #[error("invalid job: {message}")]
    InvalidJob {
        /// Why the job was rejected
        message: String,
    },

    /// Invalid dispatcher configuration.
    #[error("invalid dispatcher configuration: {message}")]
    Configuration {
        /// Which setting was rejected and why
        message: String,
    },

    /// Workers or retry tasks did not finish within the shutdown timeout.
    #[error("shutdown did not complete within {timeout:?}")]
    ShutdownTimeout {
        /// Configured shutdown timeout
        timeout: Duration,
    },

    /// A worker task panicked.
    #[error("worker {worker_id} panicked: {error}")]
    WorkerPanic {
        /// Index of the worker
        worker_id: usize,
        /// Join error description
        error: String,
    },
}

impl DeliveryError {
    /// Creates an invalid job error.
    pub fn invalid_job(message: impl Into<String>) -> Self {
        Self::InvalidJob { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Whether the caller may succeed by submitting again later.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }
}

impl From<CoreError> for DeliveryError {
    fn from(error: CoreError) -> Self {
        Self::invalid_job(error.to_string())
    }
}

/// Failure of a single transport attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Could not reach the mail relay.
    #[error("connection failed: {message}")]
    Connection {
        /// Error message describing the connection failure
        message: String,
    },

    /// The attempt exceeded its deadline.
    #[error("attempt timed out after {timeout:?}")]
    Timeout {
        /// Deadline that was exceeded
        timeout: Duration,
    },

    /// The relay reported a transient condition.
    #[error("temporary failure: {message}")]
    Temporary {
        /// Relay response or description
        message: String,
    },

    /// The relay refused the message outright.
    #[error("rejected: {message}")]
    Rejected {
        /// Relay response or description
        message: String,
    },
}

impl TransportError {
    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout }
    }

    /// Creates a temporary failure.
    pub fn temporary(message: impl Into<String>) -> Self {
        Self::Temporary { message: message.into() }
    }

    /// Creates a permanent rejection.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected { message: message.into() }
    }

    /// Determines if the attempt may succeed when repeated.
    ///
    /// Returns `false` only for rejections; connection problems, timeouts
    /// and temporary relay failures are retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } | Self::Temporary { .. } => true,
            Self::Rejected { .. } => false,
        }
    }
}

/// Category of transport failure for log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connectivity or deadline problems.
    Network,
    /// Transient relay conditions.
    Transient,
    /// Permanent refusals.
    Permanent,
}

impl From<&TransportError> for ErrorCategory {
    fn from(error: &TransportError) -> Self {
        match error {
            TransportError::Connection { .. } | TransportError::Timeout { .. } => Self::Network,
            TransportError::Temporary { .. } => Self::Transient,
            TransportError::Rejected { .. } => Self::Permanent,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}
