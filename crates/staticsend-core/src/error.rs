//! Error types for domain model construction.

use thiserror::Error;

use crate::models::JobStatus;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while building domain values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A delivery job had no usable recipients.
    #[error("no recipients specified")]
    NoRecipients,

    /// A recipient entry was empty after trimming whitespace.
    #[error("recipient at position {position} is blank")]
    BlankRecipient {
        /// Zero-based index of the offending entry
        position: usize,
    },

    /// A job was moved along an edge its state machine does not have.
    #[error("invalid job status transition from {from} to {to}")]
    InvalidTransition {
        /// Status the job was in
        from: JobStatus,
        /// Status that was requested
        to: JobStatus,
    },

    /// Invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
