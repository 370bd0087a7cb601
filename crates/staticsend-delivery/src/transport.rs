//! Message transport abstraction.
//!
//! The dispatcher hands every attempt to a [`Transport`]. Implementations
//! must be safe to call from many workers at once and should report
//! permanent refusals as [`TransportError::Rejected`] so the job is not
//! retried.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use crate::error::TransportError;

/// Sends one message to a set of recipients.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Makes a single delivery attempt.
    async fn attempt(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), TransportError>;

    /// Checks that the transport can reach its relay.
    ///
    /// Called once before workers start; the default does nothing.
    async fn verify(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Transport that logs messages instead of sending them.
#[derive(Debug, Default)]
pub struct DryRunTransport {
    sent: AtomicU64,
}

impl DryRunTransport {
    /// Creates a new dry-run transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages accepted so far.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Transport for DryRunTransport {
    async fn attempt(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), TransportError> {
        self.sent.fetch_add(1, Ordering::Relaxed);
        info!(
            recipients = ?recipients,
            subject,
            body_bytes = body.len(),
            "dry run: message not sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dry_run_accepts_everything() {
        let transport = DryRunTransport::new();
        let recipients = vec!["owner@example.com".to_string()];

        transport.verify().await.unwrap();
        transport.attempt(&recipients, "subject", "body").await.unwrap();
        transport.attempt(&recipients, "subject", "body").await.unwrap();

        assert_eq!(transport.sent(), 2);
    }
}
