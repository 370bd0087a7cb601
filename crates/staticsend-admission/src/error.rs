//! Error types for admission control.
//!
//! Admission decisions are never errors; the only failure is a controller
//! built from invalid configuration.

use thiserror::Error;

/// Result type alias for admission operations.
pub type Result<T> = std::result::Result<T, AdmissionError>;

/// Errors raised while constructing an admission controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// Invalid controller configuration.
    #[error("invalid admission configuration: {message}")]
    Configuration {
        /// Which setting was rejected and why
        message: String,
    },
}

impl AdmissionError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_error_display() {
        let error = AdmissionError::configuration("burst must be greater than 0");
        assert_eq!(error.to_string(), "invalid admission configuration: burst must be greater than 0");
    }
}
