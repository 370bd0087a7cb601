//! Concurrent admission controller.
//!
//! Buckets live in a fixed number of mutex-guarded shards. A key always maps
//! to the same shard, so every check on a key is serialized while checks on
//! keys in other shards proceed in parallel. Sweeping is opportunistic: the
//! first check on a shard after `sweep_interval` purges that shard's stale
//! buckets before admitting.

use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    hash::{Hash, Hasher},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use staticsend_core::{Clock, RealClock};
use tracing::debug;

use crate::{bucket::TokenBucket, config::AdmissionConfig, error::Result};

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// A permit was consumed.
    Allowed {
        /// Permits left in the bucket after this one.
        remaining: u32,
    },
    /// No permit was available; the bucket is unchanged.
    Denied {
        /// Time until the next permit is credited.
        retry_after: Duration,
    },
}

impl AdmissionDecision {
    /// Whether the check was admitted.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Read-only view of a key's bucket, suitable for rate-limit headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Bucket capacity.
    pub limit: u32,
    /// Permits available now.
    pub remaining: u32,
    /// Time until the bucket is full again.
    pub reset_after: Duration,
}

#[derive(Debug)]
struct Shard {
    buckets: HashMap<String, TokenBucket>,
    last_sweep: Instant,
}

impl Shard {
    fn sweep(&mut self, now: Instant, stale_after: Duration) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| !bucket.is_stale(now, stale_after));
        self.last_sweep = now;
        before - self.buckets.len()
    }
}

/// Token bucket admission controller keyed by arbitrary strings.
///
/// Safe to share across threads and tasks behind an [`Arc`]; all methods
/// take `&self`.
#[derive(Debug)]
pub struct AdmissionController {
    config: AdmissionConfig,
    shards: Box<[Mutex<Shard>]>,
    clock: Arc<dyn Clock>,
}

impl AdmissionController {
    /// Creates a controller on the real clock.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if any setting is zero.
    pub fn new(config: AdmissionConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(RealClock::new()))
    }

    /// Creates a controller reading time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if any setting is zero.
    pub fn with_clock(config: AdmissionConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let now = clock.now();
        let shards = (0..config.shards)
            .map(|_| Mutex::new(Shard { buckets: HashMap::new(), last_sweep: now }))
            .collect();

        Ok(Self { config, shards, clock })
    }

    /// Configuration this controller was built with.
    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Consumes a permit for `key` if one is available.
    pub fn check(&self, key: &str) -> bool {
        self.decide(key).is_allowed()
    }

    /// Like [`check`](Self::check), but reports remaining permits or the
    /// wait until the next one.
    pub fn decide(&self, key: &str) -> AdmissionDecision {
        let now = self.clock.now();
        let AdmissionConfig { rate, burst, .. } = self.config;

        let mut shard = self.lock_shard(key);
        self.maybe_sweep(&mut shard, now);

        let bucket =
            shard.buckets.entry(key.to_owned()).or_insert_with(|| TokenBucket::full(burst, now));

        bucket.touch(now);
        bucket.refill(now, rate, burst);

        if bucket.try_take() {
            AdmissionDecision::Allowed { remaining: bucket.tokens() }
        } else {
            AdmissionDecision::Denied { retry_after: bucket.next_permit_in(now, rate) }
        }
    }

    /// Current quota for `key` without consuming a permit.
    ///
    /// Returns `None` for keys with no bucket; a key that was never checked
    /// (or has been swept) is implicitly at full burst.
    pub fn quota(&self, key: &str) -> Option<Quota> {
        let now = self.clock.now();
        let AdmissionConfig { rate, burst, .. } = self.config;

        let shard = self.lock_shard(key);
        let mut bucket = shard.buckets.get(key)?.clone();
        bucket.refill(now, rate, burst);

        Some(Quota {
            limit: burst,
            remaining: bucket.tokens(),
            reset_after: bucket.full_in(now, rate, burst),
        })
    }

    /// Number of keys currently holding a bucket.
    pub fn tracked_keys(&self) -> usize {
        self.shards.iter().map(|shard| lock(shard).buckets.len()).sum()
    }

    /// Purges stale buckets from every shard regardless of the sweep
    /// interval. Returns the number of buckets removed.
    pub fn sweep_now(&self) -> usize {
        let now = self.clock.now();
        let removed: usize =
            self.shards.iter().map(|shard| lock(shard).sweep(now, self.config.stale_after)).sum();

        if removed > 0 {
            debug!(removed, remaining = self.tracked_keys(), "swept stale admission buckets");
        }
        removed
    }

    fn maybe_sweep(&self, shard: &mut Shard, now: Instant) {
        if now.saturating_duration_since(shard.last_sweep) < self.config.sweep_interval {
            return;
        }

        let removed = shard.sweep(now, self.config.stale_after);
        if removed > 0 {
            debug!(removed, remaining = shard.buckets.len(), "swept stale admission buckets");
        }
    }

    fn lock_shard(&self, key: &str) -> MutexGuard<'_, Shard> {
        lock(&self.shards[self.shard_index(key)])
    }

    fn shard_index(&self, key: &str) -> usize {
        if self.shards.len() == 1 {
            return 0;
        }
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        // Truncation is fine, only the low bits select the shard
        #[allow(clippy::cast_possible_truncation)]
        let hash = hasher.finish() as usize;
        hash % self.shards.len()
    }
}

// A panic while holding a shard lock cannot leave a bucket half-updated, so
// a poisoned shard is still consistent.
fn lock(shard: &Mutex<Shard>) -> MutexGuard<'_, Shard> {
    shard.lock().unwrap_or_else(PoisonError::into_inner)
}
