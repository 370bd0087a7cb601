//! Single-key token bucket.
//!
//! Refill is integral: a bucket earns `floor(elapsed / rate)` permits and
//! its refill mark advances by exactly that many intervals, so partial
//! progress toward the next permit is carried over rather than lost. A full
//! bucket does not bank progress; its mark is pinned to the current time.

use std::time::{Duration, Instant};

/// Permit counter for one admission key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBucket {
    tokens: u32,
    last_refill: Instant,
    last_seen: Instant,
}

impl TokenBucket {
    /// Creates a bucket holding `burst` permits.
    pub fn full(burst: u32, now: Instant) -> Self {
        Self { tokens: burst, last_refill: now, last_seen: now }
    }

    /// Permits currently available.
    pub fn tokens(&self) -> u32 {
        self.tokens
    }

    /// Instant up to which refill has been credited.
    pub fn last_refill(&self) -> Instant {
        self.last_refill
    }

    /// Instant of the last check against this bucket.
    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Marks the bucket as used at `now`.
    pub fn touch(&mut self, now: Instant) {
        self.last_seen = now;
    }

    /// Credits permits earned since the last refill, clamped to `burst`.
    pub fn refill(&mut self, now: Instant, rate: Duration, burst: u32) {
        if self.tokens >= burst {
            self.tokens = burst;
            self.last_refill = now;
            return;
        }

        let elapsed = now.saturating_duration_since(self.last_refill);
        let earned = elapsed.as_nanos() / rate.as_nanos().max(1);
        if earned == 0 {
            return;
        }

        let earned = u32::try_from(earned).unwrap_or(u32::MAX);
        self.tokens = self.tokens.saturating_add(earned).min(burst);

        if self.tokens == burst {
            self.last_refill = now;
        } else {
            // earned < burst here, so the multiplication cannot overflow
            self.last_refill += rate * earned;
        }
    }

    /// Takes one permit if available. A denied take leaves the bucket
    /// untouched.
    pub fn try_take(&mut self) -> bool {
        if self.tokens == 0 {
            return false;
        }
        self.tokens -= 1;
        true
    }

    /// Time until the next permit is credited. Zero when one is available.
    pub fn next_permit_in(&self, now: Instant, rate: Duration) -> Duration {
        if self.tokens > 0 {
            return Duration::ZERO;
        }
        rate.saturating_sub(now.saturating_duration_since(self.last_refill))
    }

    /// Time until the bucket is full again.
    pub fn full_in(&self, now: Instant, rate: Duration, burst: u32) -> Duration {
        let missing = burst.saturating_sub(self.tokens);
        if missing == 0 {
            return Duration::ZERO;
        }
        rate.saturating_mul(missing)
            .saturating_sub(now.saturating_duration_since(self.last_refill))
    }

    /// Whether the bucket has been idle for longer than `stale_after`.
    pub fn is_stale(&self, now: Instant, stale_after: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > stale_after
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: Duration = Duration::from_millis(100);

    #[test]
    fn starts_full() {
        let bucket = TokenBucket::full(3, Instant::now());
        assert_eq!(bucket.tokens(), 3);
    }

    #[test]
    fn denied_take_does_not_go_negative() {
        let mut bucket = TokenBucket::full(1, Instant::now());

        assert!(bucket.try_take());
        assert!(!bucket.try_take());
        assert!(!bucket.try_take());
        assert_eq!(bucket.tokens(), 0);
    }

    #[test]
    fn refill_is_floor_of_elapsed_intervals() {
        let start = Instant::now();
        let mut bucket = TokenBucket::full(5, start);
        for _ in 0..5 {
            assert!(bucket.try_take());
        }

        bucket.refill(start + Duration::from_millis(250), RATE, 5);

        assert_eq!(bucket.tokens(), 2);
        assert_eq!(bucket.last_refill(), start + Duration::from_millis(200));
    }

    #[test]
    fn fractional_progress_carries_over() {
        let start = Instant::now();
        let mut bucket = TokenBucket::full(5, start);
        for _ in 0..5 {
            bucket.try_take();
        }

        bucket.refill(start + Duration::from_millis(150), RATE, 5);
        assert_eq!(bucket.tokens(), 1);

        // 50ms of progress were kept from the previous refill
        bucket.refill(start + Duration::from_millis(200), RATE, 5);
        assert_eq!(bucket.tokens(), 2);
    }

    #[test]
    fn refill_clamped_to_burst() {
        let start = Instant::now();
        let mut bucket = TokenBucket::full(2, start);
        bucket.try_take();

        let later = start + Duration::from_secs(60);
        bucket.refill(later, RATE, 2);

        assert_eq!(bucket.tokens(), 2);
        assert_eq!(bucket.last_refill(), later);
    }

    #[test]
    fn full_bucket_does_not_bank_progress() {
        let start = Instant::now();
        let mut bucket = TokenBucket::full(2, start);

        // Idle while full, then spend everything
        let spend_at = start + Duration::from_millis(90);
        bucket.refill(spend_at, RATE, 2);
        assert!(bucket.try_take());
        assert!(bucket.try_take());

        // 10ms later nothing has been earned
        bucket.refill(spend_at + Duration::from_millis(10), RATE, 2);
        assert_eq!(bucket.tokens(), 0);
    }

    #[test]
    fn next_permit_wait_shrinks_with_time() {
        let start = Instant::now();
        let mut bucket = TokenBucket::full(1, start);
        bucket.try_take();

        assert_eq!(bucket.next_permit_in(start, RATE), RATE);
        assert_eq!(
            bucket.next_permit_in(start + Duration::from_millis(40), RATE),
            Duration::from_millis(60)
        );
    }

    #[test]
    fn full_in_counts_missing_permits() {
        let start = Instant::now();
        let mut bucket = TokenBucket::full(3, start);
        bucket.try_take();
        bucket.try_take();

        assert_eq!(bucket.full_in(start, RATE, 3), Duration::from_millis(200));
        assert_eq!(TokenBucket::full(3, start).full_in(start, RATE, 3), Duration::ZERO);
    }

    #[test]
    fn staleness_uses_last_seen() {
        let start = Instant::now();
        let mut bucket = TokenBucket::full(1, start);
        let window = Duration::from_secs(3600);

        assert!(!bucket.is_stale(start + window, window));
        assert!(bucket.is_stale(start + window + Duration::from_secs(1), window));

        bucket.touch(start + window);
        assert!(!bucket.is_stale(start + window + Duration::from_secs(1), window));
    }
}
