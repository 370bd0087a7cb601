//! Configuration management for the staticsend service.

use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use staticsend_admission::AdmissionConfig;
use staticsend_delivery::{BackoffStrategy, DispatcherConfig, RetryPolicy};

const CONFIG_FILE: &str = "staticsend.toml";
const ENV_PREFIX: &str = "STATICSEND_";

/// Service configuration with defaults, file, and environment overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed with `STATICSEND_`, plus `RUST_LOG`
///    (highest priority)
/// 2. Configuration file (`staticsend.toml`)
/// 3. Built-in defaults (lowest priority)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // Admission
    /// Milliseconds to refill one admission permit.
    ///
    /// Environment variable: `STATICSEND_ADMISSION_RATE_MS`
    #[serde(default = "default_admission_rate_ms")]
    pub admission_rate_ms: u64,
    /// Permits a client may spend at once.
    ///
    /// Environment variable: `STATICSEND_ADMISSION_BURST`
    #[serde(default = "default_admission_burst")]
    pub admission_burst: u32,
    /// Seconds between stale bucket sweeps.
    ///
    /// Environment variable: `STATICSEND_ADMISSION_SWEEP_INTERVAL_SECS`
    #[serde(default = "default_admission_sweep_interval_secs")]
    pub admission_sweep_interval_secs: u64,
    /// Seconds of inactivity after which a client's bucket is purged.
    ///
    /// Environment variable: `STATICSEND_ADMISSION_STALE_AFTER_SECS`
    #[serde(default = "default_admission_stale_after_secs")]
    pub admission_stale_after_secs: u64,
    /// Number of independently locked bucket partitions.
    ///
    /// Environment variable: `STATICSEND_ADMISSION_SHARDS`
    #[serde(default = "default_admission_shards")]
    pub admission_shards: usize,

    // Delivery
    /// Maximum number of buffered notifications.
    ///
    /// Environment variable: `STATICSEND_QUEUE_CAPACITY`
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Number of concurrent delivery workers.
    ///
    /// Environment variable: `STATICSEND_WORKER_COUNT`
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Attempt timeout in seconds.
    ///
    /// Environment variable: `STATICSEND_ATTEMPT_TIMEOUT_SECS`
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    /// Seconds allowed for draining on shutdown.
    ///
    /// Environment variable: `STATICSEND_SHUTDOWN_TIMEOUT_SECS`
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    // Retry
    /// Retries after the first delivery attempt.
    ///
    /// Environment variable: `STATICSEND_MAX_RETRIES`
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for quadratic backoff in milliseconds.
    ///
    /// Environment variable: `STATICSEND_RETRY_BASE_DELAY_MS`
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    ///
    /// Environment variable: `STATICSEND_RETRY_MAX_DELAY_MS`
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Jitter factor for retry timing (0.0 to 1.0).
    ///
    /// Environment variable: `STATICSEND_RETRY_JITTER_FACTOR`
    #[serde(default = "default_retry_jitter_factor")]
    pub retry_jitter_factor: f64,

    // Observability
    /// Seconds between periodic stats log lines.
    ///
    /// Environment variable: `STATICSEND_STATS_INTERVAL_SECS`
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
    /// Log filter directives.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

impl Config {
    /// Load configuration from defaults, config file, and environment variable
    /// overrides.
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Serialized::defaults(Self::default()))
                .merge(Toml::file(CONFIG_FILE))
                .merge(Env::prefixed(ENV_PREFIX))
                .merge(Env::raw().only(&["RUST_LOG"])),
        )
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Convert to the admission controller's configuration.
    pub fn to_admission_config(&self) -> AdmissionConfig {
        AdmissionConfig::new(Duration::from_millis(self.admission_rate_ms), self.admission_burst)
            .with_sweep(
                Duration::from_secs(self.admission_sweep_interval_secs),
                Duration::from_secs(self.admission_stale_after_secs),
            )
            .with_shards(self.admission_shards)
    }

    /// Convert to the dispatcher's configuration.
    pub fn to_dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            queue_capacity: self.queue_capacity,
            worker_count: self.worker_count,
            retry_policy: self.to_retry_policy(),
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }

    /// Convert to retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter_factor: self.retry_jitter_factor,
            backoff_strategy: BackoffStrategy::Quadratic,
        }
    }

    /// Interval between stats log lines.
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    /// Interval between forced admission sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.admission_sweep_interval_secs)
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.admission_rate_ms == 0 {
            anyhow::bail!("admission_rate_ms must be greater than 0");
        }

        if self.admission_burst == 0 {
            anyhow::bail!("admission_burst must be greater than 0");
        }

        if self.admission_sweep_interval_secs == 0 || self.admission_stale_after_secs == 0 {
            anyhow::bail!("admission sweep interval and staleness must be greater than 0");
        }

        if self.admission_shards == 0 {
            anyhow::bail!("admission_shards must be greater than 0");
        }

        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be greater than 0");
        }

        if self.worker_count == 0 {
            anyhow::bail!("worker_count must be greater than 0");
        }

        if self.attempt_timeout_secs == 0 {
            anyhow::bail!("attempt_timeout_secs must be greater than 0");
        }

        if self.shutdown_timeout_secs == 0 {
            anyhow::bail!("shutdown_timeout_secs must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            anyhow::bail!("retry_jitter_factor must be between 0.0 and 1.0");
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            anyhow::bail!("retry_base_delay_ms cannot exceed retry_max_delay_ms");
        }

        if self.stats_interval_secs == 0 {
            anyhow::bail!("stats_interval_secs must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            admission_rate_ms: default_admission_rate_ms(),
            admission_burst: default_admission_burst(),
            admission_sweep_interval_secs: default_admission_sweep_interval_secs(),
            admission_stale_after_secs: default_admission_stale_after_secs(),
            admission_shards: default_admission_shards(),
            queue_capacity: default_queue_capacity(),
            worker_count: default_worker_count(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_jitter_factor: default_retry_jitter_factor(),
            stats_interval_secs: default_stats_interval_secs(),
            rust_log: default_log_level(),
        }
    }
}

fn default_admission_rate_ms() -> u64 {
    6000
}

fn default_admission_burst() -> u32 {
    10
}

fn default_admission_sweep_interval_secs() -> u64 {
    staticsend_admission::config::DEFAULT_SWEEP_INTERVAL.as_secs()
}

fn default_admission_stale_after_secs() -> u64 {
    staticsend_admission::config::DEFAULT_STALE_AFTER.as_secs()
}

fn default_admission_shards() -> usize {
    1
}

fn default_queue_capacity() -> usize {
    staticsend_delivery::DEFAULT_QUEUE_CAPACITY
}

fn default_worker_count() -> usize {
    staticsend_delivery::DEFAULT_WORKER_COUNT
}

fn default_attempt_timeout_secs() -> u64 {
    staticsend_delivery::DEFAULT_ATTEMPT_TIMEOUT_SECONDS
}

fn default_shutdown_timeout_secs() -> u64 {
    staticsend_delivery::DEFAULT_SHUTDOWN_TIMEOUT_SECONDS
}

fn default_max_retries() -> u32 {
    staticsend_delivery::DEFAULT_MAX_RETRIES
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    300_000
}

fn default_retry_jitter_factor() -> f64 {
    0.0
}

fn default_stats_interval_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info,staticsend=debug".to_string()
}
