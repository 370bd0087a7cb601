//! Property tests for retry accounting.
//!
//! Each case runs a fresh dispatcher on its own single-threaded runtime with
//! retry backoff on virtual time.

use proptest::prelude::*;
use staticsend_core::DeliveryOutcome;
use staticsend_delivery::TransportError;
use staticsend_testing::{DispatcherHarness, MockTransport};

fn reset() -> TransportError {
    TransportError::connection("connection reset by peer")
}

fn run<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime should build")
        .block_on(future)
}

/// Runs one job through `transport` and returns (transport attempts,
/// outcome, reported attempts).
fn deliver(max_retries: u32, transport: MockTransport) -> (usize, DeliveryOutcome, u32) {
    run(async move {
        let harness = DispatcherHarness::builder()
            .max_retries(max_retries)
            .transport(transport)
            .start()
            .await
            .unwrap();

        harness.enqueue_to("owner@example.com").unwrap();
        let reports = harness.wait_for_outcomes(1).await.unwrap();
        harness.dispatcher.shutdown().await.unwrap();

        assert_eq!(harness.sink.reports().len(), 1, "exactly one terminal report");
        (harness.transport.attempts(), reports[0].outcome, reports[0].attempts)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// A transport that always fails is tried exactly `max_retries + 1` times.
    #[test]
    fn always_failing_transport_uses_full_budget(max_retries in 0u32..6) {
        let (attempts, outcome, reported) = deliver(max_retries, MockTransport::always_fail(reset()));

        prop_assert_eq!(attempts, max_retries as usize + 1);
        prop_assert_eq!(outcome, DeliveryOutcome::Failed);
        prop_assert_eq!(reported, max_retries + 1);
    }

    /// Delivery succeeds iff the failures fit inside the retry budget.
    #[test]
    fn outcome_depends_on_retry_budget(max_retries in 0u32..5, failures in 0usize..7) {
        let (attempts, outcome, reported) = deliver(max_retries, MockTransport::fail_times(failures, &reset()));

        if failures <= max_retries as usize {
            prop_assert_eq!(outcome, DeliveryOutcome::Delivered);
            prop_assert_eq!(attempts, failures + 1);
        } else {
            prop_assert_eq!(outcome, DeliveryOutcome::Failed);
            prop_assert_eq!(attempts, max_retries as usize + 1);
        }
        prop_assert_eq!(reported as usize, attempts);
    }
}
