//! Retry policies with configurable backoff and jitter.
//!
//! A failed attempt is retried while the error is retryable and fewer than
//! `max_retries` retries have been used, so a job sees at most
//! `max_retries + 1` transport attempts. The default quadratic backoff
//! waits `base_delay * n²` before the n-th retry.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{DeliveryError, Result, TransportError};

/// Retry policy applied to every job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,

    /// Base delay for backoff calculation.
    pub base_delay: Duration,

    /// Upper bound on any single retry delay.
    pub max_delay: Duration,

    /// Jitter fraction (0.0 to 1.0) applied symmetrically to each delay.
    pub jitter_factor: f64,

    /// Strategy for calculating backoff delays.
    pub backoff_strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: crate::DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            jitter_factor: 0.0,
            backoff_strategy: BackoffStrategy::Quadratic,
        }
    }
}

impl RetryPolicy {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(DeliveryError::configuration("jitter_factor must be between 0.0 and 1.0"));
        }

        if self.base_delay > self.max_delay {
            return Err(DeliveryError::configuration("base_delay must not exceed max_delay"));
        }

        Ok(())
    }

    /// Delay before the `retry_number`-th retry (1-based), before jitter.
    pub fn backoff(&self, retry_number: u32) -> Duration {
        let retry_number = retry_number.max(1);

        let delay = match self.backoff_strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(retry_number),
            BackoffStrategy::Quadratic => {
                self.base_delay.saturating_mul(retry_number.saturating_mul(retry_number))
            },
            BackoffStrategy::Exponential => {
                let exponent = (retry_number - 1).min(20);
                self.base_delay.saturating_mul(2_u32.saturating_pow(exponent))
            },
        };

        delay.min(self.max_delay)
    }
}

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    Fixed,
    /// Delay grows by `base_delay` each retry.
    Linear,
    /// Delay grows with the square of the retry number.
    Quadratic,
    /// Delay doubles each retry.
    Exponential,
}

/// Retry decision context for a failed delivery attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryContext<'a> {
    /// Attempt that just failed (1-based).
    pub attempt_number: u32,
    /// Error that caused the failure.
    pub error: &'a TransportError,
    /// Retry policy to apply.
    pub policy: &'a RetryPolicy,
}

/// Result of retry decision calculation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue the job after `delay`.
    Retry {
        /// Wait before the job re-enters the queue
        delay: Duration,
    },
    /// Do not retry; the job has permanently failed.
    GiveUp {
        /// Reason why the job should not be retried
        reason: String,
    },
}

impl<'a> RetryContext<'a> {
    /// Creates a new retry context for a failed attempt.
    pub fn new(attempt_number: u32, error: &'a TransportError, policy: &'a RetryPolicy) -> Self {
        Self { attempt_number, error, policy }
    }

    /// Determines if and when to retry.
    pub fn decide_retry(&self) -> RetryDecision {
        if !self.error.is_retryable() {
            return RetryDecision::GiveUp { reason: format!("non-retryable error: {}", self.error) };
        }

        if self.attempt_number > self.policy.max_retries {
            return RetryDecision::GiveUp {
                reason: format!("maximum retries ({}) exhausted", self.policy.max_retries),
            };
        }

        RetryDecision::Retry { delay: self.calculate_delay() }
    }

    fn calculate_delay(&self) -> Duration {
        let capped_delay = self.policy.backoff(self.attempt_number);
        let jittered_delay = apply_jitter(capped_delay, self.policy.jitter_factor);

        std::cmp::min(jittered_delay, self.policy.max_delay)
    }
}

/// Randomizes `duration` by ±`jitter_factor`, so a 10s delay with a factor
/// of 0.25 lands anywhere in 7.5s..=12.5s.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rng.random_range(-jitter_range..=jitter_range);
    let jittered_secs = duration.as_secs_f64() + jitter_offset;

    Duration::from_secs_f64(jittered_secs.max(0.0))
}
