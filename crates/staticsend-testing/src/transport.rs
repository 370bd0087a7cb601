//! Scriptable transport double.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use staticsend_delivery::{Transport, TransportError};

/// How the mock answers one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    /// Accept the message.
    Success,
    /// Fail with the given error.
    Fail(TransportError),
    /// Never complete; only the attempt timeout ends it.
    Hang,
}

/// One call made to the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAttempt {
    /// Recipients passed to the transport
    pub recipients: Vec<String>,
    /// Subject passed to the transport
    pub subject: String,
    /// Body passed to the transport
    pub body: String,
}

#[derive(Debug)]
struct MockState {
    script: VecDeque<MockResponse>,
    attempts: Vec<RecordedAttempt>,
}

/// Transport whose answers are scripted up front.
///
/// Scripted responses are consumed in order; once the script runs out every
/// attempt gets the fallback response.
#[derive(Debug)]
pub struct MockTransport {
    state: Mutex<MockState>,
    fallback: MockResponse,
    latency: Duration,
    verify_error: Option<TransportError>,
}

impl MockTransport {
    /// Creates a transport that plays `script`, then answers `fallback`.
    pub fn scripted(script: impl IntoIterator<Item = MockResponse>, fallback: MockResponse) -> Self {
        Self {
            state: Mutex::new(MockState { script: script.into_iter().collect(), attempts: Vec::new() }),
            fallback,
            latency: Duration::ZERO,
            verify_error: None,
        }
    }

    /// Accepts every message.
    pub fn always_succeed() -> Self {
        Self::scripted(Vec::new(), MockResponse::Success)
    }

    /// Fails every attempt with `error`.
    pub fn always_fail(error: TransportError) -> Self {
        Self::scripted(Vec::new(), MockResponse::Fail(error))
    }

    /// Fails the first `failures` attempts with `error`, then succeeds.
    pub fn fail_times(failures: usize, error: &TransportError) -> Self {
        let script = std::iter::repeat(MockResponse::Fail(error.clone())).take(failures);
        Self::scripted(script, MockResponse::Success)
    }

    /// Never completes an attempt.
    pub fn hanging() -> Self {
        Self::scripted(Vec::new(), MockResponse::Hang)
    }

    /// Delays every attempt by `latency` of real time.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Makes [`Transport::verify`] fail with `error`.
    #[must_use]
    pub fn with_verify_error(mut self, error: TransportError) -> Self {
        self.verify_error = Some(error);
        self
    }

    /// Number of attempts made so far.
    pub fn attempts(&self) -> usize {
        self.lock().attempts.len()
    }

    /// Every attempt made so far, in call order.
    pub fn recorded(&self) -> Vec<RecordedAttempt> {
        self.lock().attempts.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn attempt(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), TransportError> {
        let response = {
            let mut state = self.lock();
            state.attempts.push(RecordedAttempt {
                recipients: recipients.to_vec(),
                subject: subject.to_string(),
                body: body.to_string(),
            });
            state.script.pop_front().unwrap_or_else(|| self.fallback.clone())
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match response {
            MockResponse::Success => Ok(()),
            MockResponse::Fail(error) => Err(error),
            MockResponse::Hang => std::future::pending().await,
        }
    }

    async fn verify(&self) -> Result<(), TransportError> {
        self.verify_error.clone().map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipients() -> Vec<String> {
        vec!["owner@example.com".to_string()]
    }

    #[tokio::test]
    async fn fail_times_then_succeeds() {
        let transport = MockTransport::fail_times(2, &TransportError::temporary("busy"));

        assert!(transport.attempt(&recipients(), "s", "b").await.is_err());
        assert!(transport.attempt(&recipients(), "s", "b").await.is_err());
        assert!(transport.attempt(&recipients(), "s", "b").await.is_ok());
        assert_eq!(transport.attempts(), 3);
    }

    #[tokio::test]
    async fn records_arguments() {
        let transport = MockTransport::always_succeed();
        transport.attempt(&recipients(), "subject", "body").await.unwrap();

        assert_eq!(
            transport.recorded(),
            [RecordedAttempt {
                recipients: recipients(),
                subject: "subject".to_string(),
                body: "body".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn verify_error_is_reported() {
        let transport = MockTransport::always_succeed()
            .with_verify_error(TransportError::connection("relay unreachable"));

        assert_eq!(transport.verify().await, Err(TransportError::connection("relay unreachable")));
        assert!(MockTransport::always_succeed().verify().await.is_ok());
    }

    #[tokio::test]
    async fn hanging_attempt_never_completes() {
        let transport = MockTransport::hanging();
        let recipients = recipients();

        let result = tokio::time::timeout(
            Duration::from_millis(20),
            transport.attempt(&recipients, "s", "b"),
        )
        .await;
        assert!(result.is_err());
    }
}
