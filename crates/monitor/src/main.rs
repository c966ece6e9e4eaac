//! Transaction Monitor - streaming anomaly detection for transaction counts
//!
//! Accepts per-minute batches of outcome counts over HTTP, judges each
//! tracked metric against its rolling baseline and delivers alerts to a
//! webhook or the log.

use std::sync::Arc;

use anyhow::{Context, Result};
use monitor_lib::{
    dispatch::{AlertDelivery, AlertDispatcher, LogDelivery, WebhookDelivery},
    health::{components, HealthRegistry},
    observability::{MonitorMetrics, StructuredLogger},
    replay,
    service::IngestLoop,
    AnomalyMonitor,
};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use transaction_monitor::{api, config::MonitorSettings, lifecycle};

const MONITOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting transaction-monitor");

    let settings = MonitorSettings::load()?;
    info!(instance = %settings.instance_name, "Monitor configured");

    let health_registry = HealthRegistry::new();
    health_registry.register(components::INGEST_LOOP).await;
    health_registry.register(components::DISPATCHER).await;

    let metrics = MonitorMetrics::new();
    let logger = StructuredLogger::new(&settings.instance_name);

    // Alert delivery runs off the ingestion path
    let delivery: Arc<dyn AlertDelivery> = match &settings.webhook_url {
        Some(url) => {
            let webhook = WebhookDelivery::new(url, &settings.instance_name);
            info!(url = %webhook.url(), "Delivering alerts to webhook");
            Arc::new(webhook)
        }
        None => {
            info!("No webhook configured, alerts are logged only");
            Arc::new(LogDelivery::new(logger.clone()))
        }
    };
    let (dispatcher, sink) =
        AlertDispatcher::new(delivery, settings.dispatch_config(), logger.clone());
    let dispatcher = dispatcher.with_health(health_registry.clone());
    let dispatcher_handle = tokio::spawn(dispatcher.run());

    let monitor_config = settings.monitor_config();
    let mut monitor = AnomalyMonitor::new(monitor_config.clone(), Arc::new(sink))
        .context("Invalid detection configuration")?
        .with_instance(&settings.instance_name);

    if let Some(path) = &settings.replay_path {
        match replay::replay_file(&mut monitor, path) {
            Ok(stats) => {
                logger.log_warm_up(&path.display().to_string(), stats.applied, stats.rejected)
            }
            Err(e) => warn!(error = %format!("{e:#}"), "Warm-up replay failed"),
        }
    }

    logger.log_startup(
        MONITOR_VERSION,
        monitor_config.window_size,
        monitor_config.sigma_threshold,
    );

    let (ingest_loop, ingest) = IngestLoop::with_queue_size(monitor, settings.ingest_queue_size);
    let ingest_loop = ingest_loop.with_health(health_registry.clone());
    let (loop_shutdown, loop_shutdown_rx) = broadcast::channel(1);
    let loop_handle = tokio::spawn(ingest_loop.run(loop_shutdown_rx));

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics.clone(),
        ingest,
    ));

    // Mark monitor as ready after initialization
    health_registry.set_ready(true).await;

    let (api_shutdown, mut api_shutdown_rx) = broadcast::channel(1);
    let api_handle = tokio::spawn(api::serve(settings.api_port, app_state, async move {
        let _ = api_shutdown_rx.recv().await;
    }));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;

    // Dropping the monitor releases the last alert sender so the dispatcher can drain
    let monitor =
        lifecycle::stop_in_order(&api_shutdown, api_handle, &loop_shutdown, loop_handle).await;
    drop(monitor);

    match tokio::time::timeout(settings.shutdown_grace(), dispatcher_handle).await {
        Ok(Ok(stats)) => info!(
            delivered = stats.delivered,
            failed = stats.failed,
            "Pending alerts flushed"
        ),
        Ok(Err(e)) => warn!(error = %e, "Alert dispatcher task failed"),
        Err(_) => warn!(
            grace_secs = settings.shutdown_grace_secs,
            "Shutdown grace period elapsed with alerts still pending"
        ),
    }

    info!("Shutting down");
    Ok(())
}
