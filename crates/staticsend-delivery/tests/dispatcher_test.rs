//! Integration tests for the delivery dispatcher.
//!
//! Exercises backpressure, retry exhaustion, permanent rejections, attempt
//! timeouts, and the graceful shutdown policy against scripted transports.

use std::{collections::BTreeMap, time::Duration};

use anyhow::Result;
use staticsend_core::DeliveryOutcome;
use staticsend_delivery::{DeliveryError, TransportError};
use staticsend_testing::{DispatcherHarness, MockTransport};

fn temporary() -> TransportError {
    TransportError::temporary("451 mailbox busy")
}

/// A full buffer rejects the next submission immediately.
#[tokio::test]
async fn full_queue_rejects_second_job() -> Result<()> {
    let harness = DispatcherHarness::builder().queue_capacity(1).worker_count(1).start().await?;

    let accepted = harness.enqueue_to("a@example.com")?;
    let rejected = harness.enqueue_to("b@example.com");

    assert_eq!(rejected, Err(DeliveryError::QueueFull { capacity: 1 }));

    let reports = harness.wait_for_outcomes(1).await?;
    assert_eq!(reports[0].job_id, accepted);
    harness.dispatcher.shutdown().await?;
    Ok(())
}

/// An always-failing transport is tried `max_retries + 1` times and the job
/// is reported failed exactly once.
#[tokio::test]
async fn retries_exhausted_reports_single_failure() -> Result<()> {
    let harness = DispatcherHarness::builder()
        .max_retries(2)
        .transport(MockTransport::always_fail(temporary()))
        .start()
        .await?;

    let job_id = harness.enqueue_to("owner@example.com")?;
    let reports = harness.wait_for_outcomes(1).await?;
    harness.dispatcher.shutdown().await?;

    assert_eq!(harness.transport.attempts(), 3);
    assert_eq!(harness.sink.reports().len(), 1);
    assert_eq!(reports[0].job_id, job_id);
    assert_eq!(reports[0].outcome, DeliveryOutcome::Failed);
    assert_eq!(reports[0].attempts, 3);

    let stats = harness.dispatcher.stats().await;
    assert_eq!(stats.attempts, 3);
    assert_eq!(stats.retries_scheduled, 2);
    assert_eq!(stats.permanent_failures, 1);
    assert_eq!(stats.delivered, 0);
    Ok(())
}

#[tokio::test]
async fn transient_failures_then_delivery() -> Result<()> {
    let harness = DispatcherHarness::builder()
        .max_retries(3)
        .transport(MockTransport::fail_times(2, &temporary()))
        .start()
        .await?;

    harness.enqueue_to("owner@example.com")?;
    let reports = harness.wait_for_outcomes(1).await?;
    harness.dispatcher.shutdown().await?;

    assert_eq!(reports[0].outcome, DeliveryOutcome::Delivered);
    assert_eq!(reports[0].attempts, 3);
    assert_eq!(reports[0].error, None);
    Ok(())
}

/// Backoff sleeps on the injected clock: two retries at 10ms base delay
/// advance virtual time by 10ms + 40ms.
#[tokio::test]
async fn backoff_is_quadratic_on_virtual_time() -> Result<()> {
    let harness = DispatcherHarness::builder()
        .max_retries(2)
        .base_delay(Duration::from_millis(10))
        .transport(MockTransport::always_fail(temporary()))
        .start()
        .await?;

    harness.enqueue_to("owner@example.com")?;
    harness.wait_for_outcomes(1).await?;
    harness.dispatcher.shutdown().await?;

    assert_eq!(harness.clock.elapsed(), Duration::from_millis(50));
    Ok(())
}

#[tokio::test]
async fn rejection_is_not_retried() -> Result<()> {
    let harness = DispatcherHarness::builder()
        .max_retries(5)
        .transport(MockTransport::always_fail(TransportError::rejected("550 no such user")))
        .start()
        .await?;

    harness.enqueue_to("nobody@example.com")?;
    let reports = harness.wait_for_outcomes(1).await?;
    harness.dispatcher.shutdown().await?;

    assert_eq!(harness.transport.attempts(), 1);
    assert_eq!(reports[0].outcome, DeliveryOutcome::Failed);
    assert!(reports[0].error.as_deref().unwrap_or_default().contains("550 no such user"));
    Ok(())
}

/// A transport that never answers is cut off by the attempt timeout.
#[tokio::test]
async fn hung_transport_is_cut_off() -> Result<()> {
    let harness = DispatcherHarness::builder()
        .max_retries(0)
        .attempt_timeout(Duration::from_millis(50))
        .transport(MockTransport::hanging())
        .start()
        .await?;

    harness.enqueue_to("owner@example.com")?;
    let reports = harness.wait_for_outcomes(1).await?;
    harness.dispatcher.shutdown().await?;

    assert_eq!(reports[0].outcome, DeliveryOutcome::Failed);
    assert!(reports[0].error.as_deref().unwrap_or_default().contains("timed out"));
    Ok(())
}

/// Shutdown right after submitting three jobs still attempts all of them.
#[tokio::test]
async fn shutdown_drains_buffered_jobs() -> Result<()> {
    let harness = DispatcherHarness::builder()
        .worker_count(2)
        .transport(MockTransport::always_succeed().with_latency(Duration::from_millis(20)))
        .start()
        .await?;

    for recipient in ["a@example.com", "b@example.com", "c@example.com"] {
        harness.enqueue_to(recipient)?;
    }
    harness.dispatcher.shutdown().await?;

    assert_eq!(harness.transport.attempts(), 3);
    assert_eq!(harness.sink.delivered().len(), 3);
    assert_eq!(harness.dispatcher.queue_depth(), 0);
    Ok(())
}

/// Failures while draining are final; nothing is re-enqueued.
#[tokio::test]
async fn failures_during_drain_are_not_retried() -> Result<()> {
    let harness = DispatcherHarness::builder()
        .max_retries(3)
        .transport(MockTransport::always_fail(temporary()))
        .start()
        .await?;

    for recipient in ["a@example.com", "b@example.com", "c@example.com"] {
        harness.enqueue_to(recipient)?;
    }
    harness.dispatcher.shutdown().await?;

    assert_eq!(harness.transport.attempts(), 3);
    let failed = harness.sink.failed();
    assert_eq!(failed.len(), 3);
    assert!(failed.iter().all(|report| report.attempts == 1));
    Ok(())
}

#[tokio::test]
async fn shutdown_cancels_pending_retry() -> Result<()> {
    let harness = DispatcherHarness::builder()
        .max_retries(3)
        .base_delay(Duration::from_secs(60))
        .real_time_backoff()
        .transport(MockTransport::always_fail(temporary()))
        .start()
        .await?;

    let job_id = harness.enqueue_to("owner@example.com")?;
    while harness.dispatcher.stats().await.retries_scheduled == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    tokio::time::timeout(Duration::from_secs(2), harness.dispatcher.shutdown()).await??;

    let reports = harness.sink.reports_for(job_id);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].outcome, DeliveryOutcome::Failed);
    assert_eq!(reports[0].attempts, 1);
    assert_eq!(reports[0].error.as_deref(), Some("retry cancelled by shutdown"));
    assert_eq!(harness.transport.attempts(), 1);
    Ok(())
}

#[tokio::test]
async fn enqueue_after_shutdown_is_rejected() -> Result<()> {
    let harness = DispatcherHarness::builder().start().await?;
    harness.dispatcher.shutdown().await?;

    assert_eq!(harness.enqueue_to("late@example.com"), Err(DeliveryError::ShuttingDown));
    assert!(harness.dispatcher.is_shutting_down());
    Ok(())
}

#[tokio::test]
async fn shutdown_is_idempotent() -> Result<()> {
    let harness = DispatcherHarness::builder().worker_count(3).start().await?;
    harness.enqueue_to("owner@example.com")?;

    let (first, second) =
        tokio::join!(harness.dispatcher.shutdown(), harness.dispatcher.shutdown());
    first?;
    second?;
    harness.dispatcher.shutdown().await?;

    assert_eq!(harness.sink.reports().len(), 1);
    Ok(())
}

#[tokio::test]
async fn shutdown_times_out_on_stuck_worker() -> Result<()> {
    let harness = DispatcherHarness::builder()
        .attempt_timeout(Duration::from_secs(60))
        .shutdown_timeout(Duration::from_millis(50))
        .transport(MockTransport::hanging())
        .start()
        .await?;

    let job_id = harness.enqueue_to("owner@example.com")?;
    while harness.transport.attempts() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let result = harness.dispatcher.shutdown().await;
    assert_eq!(result, Err(DeliveryError::ShutdownTimeout { timeout: Duration::from_millis(50) }));

    // The aborted worker must not report the job a second time.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let reports = harness.sink.reports_for(job_id);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].outcome, DeliveryOutcome::Failed);
    assert_eq!(reports[0].attempts, 1);
    assert_eq!(reports[0].error.as_deref(), Some("aborted by shutdown timeout"));

    let stats = harness.dispatcher.stats().await;
    assert_eq!(stats.in_flight_deliveries, 0);
    assert_eq!(stats.permanent_failures, 1);
    Ok(())
}

/// A retry that finds the queue full when its backoff ends is final: it is
/// reported failed once and never attempted again.
#[tokio::test]
async fn rejected_retry_resubmission_is_reported_failed() -> Result<()> {
    let harness = DispatcherHarness::builder()
        .queue_capacity(1)
        .worker_count(1)
        .max_retries(3)
        .base_delay(Duration::from_millis(200))
        .real_time_backoff()
        .transport(
            MockTransport::fail_times(1, &temporary()).with_latency(Duration::from_millis(400)),
        )
        .start()
        .await?;

    let retried = harness.enqueue_to("a@example.com")?;
    while harness.dispatcher.stats().await.retries_scheduled == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Keep the only worker busy and the single slot occupied until the
    // backoff has elapsed.
    let busy = harness.enqueue_to("b@example.com")?;
    while harness.dispatcher.queue_depth() > 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let waiting = harness.enqueue_to("c@example.com")?;

    harness.wait_for_outcomes(3).await?;
    harness.dispatcher.shutdown().await?;

    let reports = harness.sink.reports_for(retried);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].outcome, DeliveryOutcome::Failed);
    assert_eq!(reports[0].attempts, 1);
    assert_eq!(reports[0].error.as_deref(), Some("delivery queue is full"));

    for job_id in [busy, waiting] {
        let reports = harness.sink.reports_for(job_id);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, DeliveryOutcome::Delivered);
    }
    assert_eq!(harness.transport.attempts(), 3);
    Ok(())
}

#[tokio::test]
async fn jobs_buffered_before_start_are_delivered_in_order() -> Result<()> {
    let harness = DispatcherHarness::builder().worker_count(1).build()?;

    for subject in ["first", "second", "third"] {
        harness.dispatcher.enqueue(["owner@example.com"], subject, "body")?;
    }
    assert_eq!(harness.dispatcher.queue_depth(), 3);

    harness.dispatcher.start().await?;
    harness.wait_for_outcomes(3).await?;
    harness.dispatcher.shutdown().await?;

    let subjects: Vec<_> =
        harness.transport.recorded().into_iter().map(|attempt| attempt.subject).collect();
    assert_eq!(subjects, ["first", "second", "third"]);
    Ok(())
}

#[tokio::test]
async fn form_submission_is_composed_and_delivered() -> Result<()> {
    let harness = DispatcherHarness::builder().start().await?;
    let fields = BTreeMap::from([
        ("name".to_string(), "Ada".to_string()),
        ("email".to_string(), "ada@example.com".to_string()),
    ]);

    harness.dispatcher.enqueue_form_submission(["owner@example.com"], &fields)?;
    harness.wait_for_outcomes(1).await?;
    harness.dispatcher.shutdown().await?;

    let attempt = &harness.transport.recorded()[0];
    assert_eq!(attempt.subject, "New Form Submission");
    assert_eq!(
        attempt.body,
        "You have received a new form submission:\n\n\
         email: ada@example.com\n\
         name: Ada\n\
         \n---\n\
         This email was sent automatically by staticSend"
    );
    Ok(())
}

#[tokio::test]
async fn recipients_are_deduplicated_before_delivery() -> Result<()> {
    let harness = DispatcherHarness::builder().start().await?;

    harness.dispatcher.enqueue(
        [" a@example.com", "b@example.com", "a@example.com "],
        "subject",
        "body",
    )?;
    harness.wait_for_outcomes(1).await?;
    harness.dispatcher.shutdown().await?;

    assert_eq!(harness.transport.recorded()[0].recipients, ["a@example.com", "b@example.com"]);
    Ok(())
}

#[tokio::test]
async fn verify_reports_transport_problems() -> Result<()> {
    let harness = DispatcherHarness::builder()
        .transport(
            MockTransport::always_succeed()
                .with_verify_error(TransportError::connection("relay unreachable")),
        )
        .build()?;

    let result = harness.dispatcher.verify_transport().await;
    assert_eq!(result, Err(TransportError::connection("relay unreachable")));
    Ok(())
}
