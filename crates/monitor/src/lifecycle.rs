//! Ordered shutdown of the service tasks

use monitor_lib::AnomalyMonitor;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

/// Stop the API first, then the ingestion loop
///
/// The loop keeps accepting batches until the API server has finished its
/// in-flight requests. Returns the monitor once the loop has drained, or
/// `None` if the loop task failed.
pub async fn stop_in_order(
    api_shutdown: &broadcast::Sender<()>,
    api_handle: JoinHandle<anyhow::Result<()>>,
    loop_shutdown: &broadcast::Sender<()>,
    loop_handle: JoinHandle<AnomalyMonitor>,
) -> Option<AnomalyMonitor> {
    let _ = api_shutdown.send(());
    match api_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "API server exited with error"),
        Err(e) => warn!(error = %e, "API server task failed"),
    }

    let _ = loop_shutdown.send(());
    match loop_handle.await {
        Ok(monitor) => Some(monitor),
        Err(e) => {
            warn!(error = %e, "Ingestion loop task failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monitor_lib::{anomaly::RecordingSink, service::IngestLoop, Batch, MonitorConfig};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_loop_outlives_in_flight_requests() {
        let monitor =
            AnomalyMonitor::new(MonitorConfig::default(), Arc::new(RecordingSink::new())).unwrap();
        let (ingest_loop, ingest) = IngestLoop::new(monitor);

        let (loop_tx, loop_rx) = broadcast::channel(1);
        let loop_handle = tokio::spawn(ingest_loop.run(loop_rx));

        // Stands in for the API server: one request completes during its
        // graceful shutdown
        let (api_tx, mut api_rx) = broadcast::channel::<()>(1);
        let api_handle = tokio::spawn(async move {
            let _ = api_rx.recv().await;
            ingest.ingest(Batch::new().with_count("denied", 4)).await?;
            Ok::<_, anyhow::Error>(())
        });

        let monitor = stop_in_order(&api_tx, api_handle, &loop_tx, loop_handle)
            .await
            .unwrap();

        let denied: Vec<f64> = monitor.history("denied").unwrap().values().collect();
        assert_eq!(denied, vec![4.0]);
    }
}
