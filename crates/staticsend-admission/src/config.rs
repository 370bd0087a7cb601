//! Admission controller configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AdmissionError, Result};

/// Default minimum time between stale-bucket sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default idle time after which a bucket is purged.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60 * 60);

/// Token bucket parameters shared by every key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Time to refill one permit.
    pub rate: Duration,

    /// Maximum permits a bucket holds; also its initial fill.
    pub burst: u32,

    /// Minimum time between stale-bucket sweeps.
    pub sweep_interval: Duration,

    /// Buckets untouched for longer than this are purged by the sweep.
    pub stale_after: Duration,

    /// Number of independently locked partitions of the key map.
    pub shards: usize,
}

impl AdmissionConfig {
    /// Creates a configuration with the required refill rate and burst and
    /// default sweep settings on a single shard.
    pub fn new(rate: Duration, burst: u32) -> Self {
        Self {
            rate,
            burst,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            stale_after: DEFAULT_STALE_AFTER,
            shards: 1,
        }
    }

    /// Overrides the sweep interval and staleness window.
    pub fn with_sweep(mut self, sweep_interval: Duration, stale_after: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self.stale_after = stale_after;
        self
    }

    /// Overrides the shard count.
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.rate.is_zero() {
            return Err(AdmissionError::configuration("rate must be greater than 0"));
        }

        if self.burst == 0 {
            return Err(AdmissionError::configuration("burst must be greater than 0"));
        }

        if self.sweep_interval.is_zero() {
            return Err(AdmissionError::configuration("sweep_interval must be greater than 0"));
        }

        if self.stale_after.is_zero() {
            return Err(AdmissionError::configuration("stale_after must be greater than 0"));
        }

        if self.shards == 0 {
            return Err(AdmissionError::configuration("shards must be greater than 0"));
        }

        Ok(())
    }
}
