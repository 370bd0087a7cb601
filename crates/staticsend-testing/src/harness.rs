//! Dispatcher harness wiring test doubles together.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use staticsend_core::{Clock, JobId, RealClock, TestClock};
use staticsend_delivery::{
    BackoffStrategy, DeliveryDispatcher, DeliveryError, DispatcherConfig, RetryPolicy,
};

use crate::{init_test_tracing, sink::RecordingSink, transport::MockTransport};

/// A dispatcher plus handles on its transport, sink, and clock.
pub struct DispatcherHarness {
    /// Dispatcher under test
    pub dispatcher: Arc<DeliveryDispatcher>,
    /// Transport the dispatcher delivers through
    pub transport: Arc<MockTransport>,
    /// Sink receiving outcome reports
    pub sink: Arc<RecordingSink>,
    /// Virtual clock driving retry backoff, unless real time was requested
    pub clock: TestClock,
}

impl DispatcherHarness {
    /// Starts building a harness.
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// Enqueues a plain message to `recipient`.
    ///
    /// # Errors
    ///
    /// Whatever the dispatcher rejects the submission with.
    pub fn enqueue_to(&self, recipient: &str) -> std::result::Result<JobId, DeliveryError> {
        self.dispatcher.enqueue([recipient], "test subject", "test body")
    }

    /// Waits for `count` outcome reports.
    ///
    /// # Errors
    ///
    /// Fails if they do not arrive within five seconds.
    pub async fn wait_for_outcomes(&self, count: usize) -> Result<Vec<staticsend_core::OutcomeReport>> {
        self.sink.wait_for(count, Duration::from_secs(5)).await
    }
}

/// Builder for [`DispatcherHarness`].
///
/// Defaults to one worker, a small queue, quadratic backoff from 10ms on
/// virtual time, and a transport that accepts everything.
pub struct HarnessBuilder {
    config: DispatcherConfig,
    transport: MockTransport,
    real_time_backoff: bool,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            config: DispatcherConfig {
                queue_capacity: 16,
                worker_count: 1,
                retry_policy: RetryPolicy {
                    max_retries: 3,
                    base_delay: Duration::from_millis(10),
                    max_delay: Duration::from_secs(60),
                    jitter_factor: 0.0,
                    backoff_strategy: BackoffStrategy::Quadratic,
                },
                attempt_timeout: Duration::from_secs(5),
                shutdown_timeout: Duration::from_secs(5),
            },
            transport: MockTransport::always_succeed(),
            real_time_backoff: false,
        }
    }
}

impl HarnessBuilder {
    /// Sets the buffer capacity.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Sets the worker count.
    #[must_use]
    pub fn worker_count(mut self, workers: usize) -> Self {
        self.config.worker_count = workers;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.retry_policy.max_retries = retries;
        self
    }

    /// Sets the base backoff delay.
    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.retry_policy.base_delay = delay;
        self
    }

    /// Sets the per-attempt deadline.
    #[must_use]
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.config.attempt_timeout = timeout;
        self
    }

    /// Sets the shutdown deadline.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Uses `transport` instead of the always-succeeding default.
    #[must_use]
    pub fn transport(mut self, transport: MockTransport) -> Self {
        self.transport = transport;
        self
    }

    /// Sleeps out retry backoff on the real clock instead of virtual time.
    #[must_use]
    pub fn real_time_backoff(mut self) -> Self {
        self.real_time_backoff = true;
        self
    }

    /// Builds the harness without starting workers.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid.
    pub fn build(self) -> Result<DispatcherHarness> {
        init_test_tracing();

        let transport = Arc::new(self.transport);
        let sink = Arc::new(RecordingSink::new());
        let clock = TestClock::new();
        let dispatcher_clock: Arc<dyn Clock> =
            if self.real_time_backoff { Arc::new(RealClock::new()) } else { Arc::new(clock.clone()) };

        let dispatcher = DeliveryDispatcher::with_clock(
            self.config,
            transport.clone(),
            sink.clone(),
            dispatcher_clock,
        )
        .context("failed to build dispatcher")?;

        Ok(DispatcherHarness { dispatcher: Arc::new(dispatcher), transport, sink, clock })
    }

    /// Builds the harness and starts its workers.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or workers cannot start.
    pub async fn start(self) -> Result<DispatcherHarness> {
        let harness = self.build()?;
        harness.dispatcher.start().await.context("failed to start dispatcher")?;
        Ok(harness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_harness_delivers() {
        let harness = DispatcherHarness::builder().start().await.unwrap();

        let job_id = harness.enqueue_to("owner@example.com").unwrap();
        let reports = harness.wait_for_outcomes(1).await.unwrap();

        assert_eq!(reports[0].job_id, job_id);
        assert_eq!(harness.transport.attempts(), 1);
        harness.dispatcher.shutdown().await.unwrap();
    }

    #[test]
    fn invalid_configuration_fails_build() {
        let result = DispatcherHarness::builder().worker_count(0).build();
        assert!(result.is_err());
    }
}
