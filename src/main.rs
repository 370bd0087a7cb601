//! staticSend notification service.
//!
//! Main entry point. Builds the admission controller and the delivery
//! dispatcher, runs periodic maintenance, and coordinates graceful startup
//! and shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use staticsend_admission::AdmissionController;
use staticsend_delivery::{DeliveryDispatcher, DryRunTransport, TracingSink};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

mod config;

use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log)?;

    info!("Starting staticSend notification service");
    info!(
        admission_burst = config.admission_burst,
        admission_rate_ms = config.admission_rate_ms,
        queue_capacity = config.queue_capacity,
        worker_count = config.worker_count,
        max_retries = config.max_retries,
        "Configuration loaded"
    );

    let admission = Arc::new(
        AdmissionController::new(config.to_admission_config())
            .context("Failed to create admission controller")?,
    );

    let dispatcher = Arc::new(
        DeliveryDispatcher::new(
            config.to_dispatcher_config(),
            Arc::new(DryRunTransport::new()),
            Arc::new(TracingSink::new()),
        )
        .context("Failed to create delivery dispatcher")?,
    );

    // An unreachable transport is not fatal; failed attempts go through retry.
    match dispatcher.verify_transport().await {
        Ok(()) => info!("Transport verified"),
        Err(e) => warn!(error = %e, "Transport verification failed"),
    }

    dispatcher.start().await.context("Failed to start delivery workers")?;
    info!(workers = config.worker_count, "staticSend is ready to deliver notifications");

    let maintenance_token = CancellationToken::new();
    let maintenance = tokio::spawn(run_maintenance(
        admission.clone(),
        dispatcher.clone(),
        config.clone(),
        maintenance_token.clone(),
    ));

    shutdown_signal().await;
    info!("Shutdown signal received, starting graceful shutdown");

    maintenance_token.cancel();
    if let Err(e) = maintenance.await {
        error!(error = %e, "Maintenance task failed");
    }

    dispatcher.shutdown().await.context("Delivery dispatcher did not shut down cleanly")?;

    let stats = dispatcher.stats().await;
    info!(
        delivered = stats.delivered,
        permanent_failures = stats.permanent_failures,
        "staticSend shutdown complete"
    );
    Ok(())
}

/// Logs dispatcher and admission stats and sweeps idle client buckets until
/// cancelled.
async fn run_maintenance(
    admission: Arc<AdmissionController>,
    dispatcher: Arc<DeliveryDispatcher>,
    config: Config,
    cancellation_token: CancellationToken,
) {
    let mut stats_interval = tokio::time::interval(config.stats_interval());
    let mut sweep_interval = tokio::time::interval(config.sweep_interval());

    // Both intervals complete their first tick immediately.
    stats_interval.tick().await;
    sweep_interval.tick().await;

    loop {
        tokio::select! {
            () = cancellation_token.cancelled() => {
                debug!("Maintenance task stopping");
                break;
            }
            _ = stats_interval.tick() => {
                let stats = dispatcher.stats().await;
                info!(
                    queue_depth = dispatcher.queue_depth(),
                    tracked_clients = admission.tracked_keys(),
                    active_workers = stats.active_workers,
                    in_flight = stats.in_flight_deliveries,
                    attempts = stats.attempts,
                    delivered = stats.delivered,
                    retries_scheduled = stats.retries_scheduled,
                    permanent_failures = stats.permanent_failures,
                    "Service stats"
                );
            }
            _ = sweep_interval.tick() => {
                admission.sweep_now();
            }
        }
    }
}

/// Initializes tracing with a filter from the loaded configuration.
fn init_tracing(directives: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_new(directives)
        .or_else(|_| EnvFilter::try_new("info,staticsend=debug"))
        .context("Invalid log filter")?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed to install tracing subscriber")
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
