//! Property tests for token bucket admission.

use std::{sync::Arc, time::Duration};

use proptest::prelude::*;
use staticsend_admission::{AdmissionConfig, AdmissionController};
use staticsend_core::TestClock;

fn controller(rate: Duration, burst: u32) -> (AdmissionController, TestClock) {
    let clock = TestClock::new();
    let controller =
        AdmissionController::with_clock(AdmissionConfig::new(rate, burst), Arc::new(clock.clone()))
            .unwrap();
    (controller, clock)
}

proptest! {
    /// A fresh key admits exactly `burst` checks with no time passing.
    #[test]
    fn fresh_key_admits_exactly_burst(burst in 1u32..64, extra in 1usize..16) {
        let (controller, _) = controller(Duration::from_secs(1), burst);

        let admitted = (0..burst as usize + extra).filter(|_| controller.check("k")).count();
        prop_assert_eq!(admitted, burst as usize);
    }

    /// After exhaustion, waiting one full interval yields exactly one permit.
    #[test]
    fn one_interval_yields_one_permit(burst in 1u32..32, rate_ms in 1u64..10_000) {
        let rate = Duration::from_millis(rate_ms);
        let (controller, clock) = controller(rate, burst);
        while controller.check("k") {}

        clock.advance(rate);

        prop_assert!(controller.check("k"));
        prop_assert!(!controller.check("k"));
    }

    /// Admissions over any schedule never exceed the initial burst plus one
    /// permit per whole elapsed interval.
    #[test]
    fn admissions_bounded_by_burst_plus_elapsed_intervals(
        burst in 1u32..16,
        rate_ms in 1u64..1_000,
        steps in prop::collection::vec((0u64..2_000, 0usize..8), 1..40),
    ) {
        let rate = Duration::from_millis(rate_ms);
        let (controller, clock) = controller(rate, burst);

        let mut elapsed_ms = 0u64;
        let mut admitted = 0u64;
        for (advance_ms, checks) in steps {
            clock.advance(Duration::from_millis(advance_ms));
            elapsed_ms += advance_ms;
            admitted += (0..checks).filter(|_| controller.check("k")).count() as u64;

            let ceiling = u64::from(burst) + elapsed_ms / rate_ms;
            prop_assert!(admitted <= ceiling, "admitted {} > ceiling {}", admitted, ceiling);
        }
    }

    /// Remaining permits never exceed the burst, however long the key idles.
    #[test]
    fn quota_never_exceeds_burst(burst in 1u32..32, idle_secs in 0u64..100_000) {
        let (controller, clock) = controller(Duration::from_millis(10), burst);
        controller.check("k");

        clock.advance(Duration::from_secs(idle_secs));

        let quota = controller.quota("k").unwrap();
        prop_assert!(quota.remaining <= burst);
        prop_assert_eq!(quota.limit, burst);
    }
}
