//! Asynchronous alert delivery
//!
//! The monitor calls its sink synchronously on the ingestion path. To keep
//! network latency off that path, [`ChannelSink`] only enqueues alerts and
//! an [`AlertDispatcher`] task delivers them, each bounded by a timeout.
//! Failures are logged and counted here and never reach ingestion.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};

use crate::anomaly::{to_alertmanager_alert, AlertSink, AlertmanagerPayload};
use crate::error::SinkError;
use crate::health::{components, HealthRegistry};
use crate::models::AnomalyAlert;
use crate::observability::{MonitorMetrics, StructuredLogger};

/// Default number of alerts buffered between the monitor and the dispatcher
const DEFAULT_QUEUE_SIZE: usize = 1024;

/// Default upper bound on a single delivery attempt
const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// A transport that alerts are finally delivered through
#[async_trait]
pub trait AlertDelivery: Send + Sync {
    async fn deliver(&self, alert: &AnomalyAlert) -> Result<(), SinkError>;
}

/// Delivers alerts as structured log lines
#[derive(Clone)]
pub struct LogDelivery {
    logger: StructuredLogger,
}

impl LogDelivery {
    pub fn new(logger: StructuredLogger) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl AlertDelivery for LogDelivery {
    async fn deliver(&self, alert: &AnomalyAlert) -> Result<(), SinkError> {
        self.logger.log_alert(alert);
        Ok(())
    }
}

/// Posts alerts to an Alertmanager-compatible webhook
#[derive(Clone)]
pub struct WebhookDelivery {
    client: reqwest::Client,
    url: String,
    instance: String,
}

impl WebhookDelivery {
    pub fn new(url: impl Into<String>, instance: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url, instance)
    }

    pub fn with_client(
        client: reqwest::Client,
        url: impl Into<String>,
        instance: impl Into<String>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            instance: instance.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AlertDelivery for WebhookDelivery {
    async fn deliver(&self, alert: &AnomalyAlert) -> Result<(), SinkError> {
        let payload = AlertmanagerPayload::single(to_alertmanager_alert(alert, &self.instance));

        self.client
            .post(&self.url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        debug!(metric = %alert.metric, url = %self.url, "Alert delivered to webhook");
        Ok(())
    }
}

/// Sink that hands alerts to an [`AlertDispatcher`] without blocking
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<AnomalyAlert>,
}

impl AlertSink for ChannelSink {
    fn notify(&self, alert: &AnomalyAlert) -> Result<(), SinkError> {
        self.tx.try_send(alert.clone()).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::QueueFull,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Configuration for the alert dispatcher
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Alerts buffered before `ChannelSink` starts rejecting
    pub queue_size: usize,
    /// Upper bound on a single delivery attempt
    pub delivery_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_size: DEFAULT_QUEUE_SIZE,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }
}

/// Delivery counts reported when the dispatcher stops
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub failed: u64,
}

/// Background task delivering queued alerts
pub struct AlertDispatcher {
    rx: mpsc::Receiver<AnomalyAlert>,
    delivery: Arc<dyn AlertDelivery>,
    config: DispatchConfig,
    logger: StructuredLogger,
    metrics: MonitorMetrics,
    health: Option<HealthRegistry>,
}

impl AlertDispatcher {
    /// Create a dispatcher and the sink that feeds it
    pub fn new(
        delivery: Arc<dyn AlertDelivery>,
        config: DispatchConfig,
        logger: StructuredLogger,
    ) -> (Self, ChannelSink) {
        let (tx, rx) = mpsc::channel(config.queue_size.max(1));

        let dispatcher = Self {
            rx,
            delivery,
            config,
            logger,
            metrics: MonitorMetrics::new(),
            health: None,
        };

        (dispatcher, ChannelSink { tx })
    }

    /// Report delivery trouble through the health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Deliver alerts until every [`ChannelSink`] is dropped
    ///
    /// Alerts already queued when the last sender goes away are still
    /// delivered, each within the configured timeout.
    pub async fn run(mut self) -> DispatchStats {
        info!(
            timeout_ms = self.config.delivery_timeout.as_millis() as u64,
            queue_size = self.config.queue_size,
            "Starting alert dispatcher"
        );

        let mut stats = DispatchStats::default();
        let mut degraded = false;

        while let Some(alert) = self.rx.recv().await {
            match self.dispatch_one(&alert).await {
                Ok(()) => {
                    stats.delivered += 1;
                    if degraded {
                        degraded = false;
                        if let Some(health) = &self.health {
                            health.set_healthy(components::DISPATCHER).await;
                        }
                    }
                }
                Err(e) => {
                    stats.failed += 1;
                    self.metrics.inc_sink_failures();
                    self.logger.log_delivery_failure(&alert, &e);
                    degraded = true;
                    if let Some(health) = &self.health {
                        health
                            .set_degraded(components::DISPATCHER, e.to_string())
                            .await;
                    }
                }
            }
        }

        info!(
            delivered = stats.delivered,
            failed = stats.failed,
            "Alert dispatcher drained, stopping"
        );
        stats
    }

    async fn dispatch_one(&self, alert: &AnomalyAlert) -> Result<(), SinkError> {
        let timeout = self.config.delivery_timeout;
        match tokio::time::timeout(timeout, self.delivery.deliver(alert)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DetectionRule;
    use std::sync::Mutex;

    fn alert(metric: &str) -> AnomalyAlert {
        AnomalyAlert {
            metric: metric.to_string(),
            value: 15,
            baseline_mean: 0.0,
            rule: DetectionRule::StaticCeiling,
            z_score: None,
            message: format!("Anomaly detected in '{}'", metric),
            detected_at: 1_704_067_200,
        }
    }

    /// Delivery that records alerts, optionally failing or stalling
    #[derive(Default)]
    struct MockDelivery {
        delivered: Mutex<Vec<String>>,
        fail: bool,
        stall: Option<Duration>,
    }

    #[async_trait]
    impl AlertDelivery for MockDelivery {
        async fn deliver(&self, alert: &AnomalyAlert) -> Result<(), SinkError> {
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
            }
            if self.fail {
                return Err(SinkError::Delivery("pager rejected alert".to_string()));
            }
            self.delivered.lock().unwrap().push(alert.metric.clone());
            Ok(())
        }
    }

    fn logger() -> StructuredLogger {
        StructuredLogger::new("test-instance")
    }

    #[test]
    fn test_dispatch_config_default() {
        let config = DispatchConfig::default();
        assert_eq!(config.queue_size, 1024);
        assert_eq!(config.delivery_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_channel_sink_reports_full_queue() {
        let config = DispatchConfig {
            queue_size: 1,
            ..Default::default()
        };
        let (_dispatcher, sink) =
            AlertDispatcher::new(Arc::new(MockDelivery::default()), config, logger());

        assert!(sink.notify(&alert("failed")).is_ok());
        assert!(matches!(
            sink.notify(&alert("denied")),
            Err(SinkError::QueueFull)
        ));
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed_dispatcher() {
        let (dispatcher, sink) = AlertDispatcher::new(
            Arc::new(MockDelivery::default()),
            DispatchConfig::default(),
            logger(),
        );
        drop(dispatcher);

        assert!(matches!(sink.notify(&alert("failed")), Err(SinkError::Closed)));
    }

    #[tokio::test]
    async fn test_dispatcher_drains_queue_after_senders_drop() {
        let delivery = Arc::new(MockDelivery::default());
        let (dispatcher, sink) =
            AlertDispatcher::new(delivery.clone(), DispatchConfig::default(), logger());

        sink.notify(&alert("failed")).unwrap();
        sink.notify(&alert("reversed")).unwrap();
        drop(sink);

        let stats = dispatcher.run().await;

        assert_eq!(stats, DispatchStats { delivered: 2, failed: 0 });
        assert_eq!(
            *delivery.delivered.lock().unwrap(),
            vec!["failed".to_string(), "reversed".to_string()]
        );
    }

    #[tokio::test]
    async fn test_slow_delivery_times_out() {
        let delivery = Arc::new(MockDelivery {
            stall: Some(Duration::from_secs(10)),
            ..Default::default()
        });
        let config = DispatchConfig {
            delivery_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let (dispatcher, sink) = AlertDispatcher::new(delivery.clone(), config, logger());

        sink.notify(&alert("failed")).unwrap();
        drop(sink);

        let stats = tokio::time::timeout(Duration::from_secs(2), dispatcher.run())
            .await
            .expect("dispatcher should not wait for a stalled delivery");

        assert_eq!(stats, DispatchStats { delivered: 0, failed: 1 });
        assert!(delivery.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_delivery_degrades_health() {
        let health = HealthRegistry::new();
        health.register(components::DISPATCHER).await;

        let delivery = Arc::new(MockDelivery {
            fail: true,
            ..Default::default()
        });
        let (dispatcher, sink) =
            AlertDispatcher::new(delivery, DispatchConfig::default(), logger());
        let dispatcher = dispatcher.with_health(health.clone());

        sink.notify(&alert("failed")).unwrap();
        drop(sink);

        let stats = dispatcher.run().await;
        assert_eq!(stats.failed, 1);
        assert_eq!(
            health.status(components::DISPATCHER).await,
            Some(crate::health::ComponentStatus::Degraded)
        );
    }

    #[tokio::test]
    async fn test_log_delivery_succeeds() {
        let delivery = LogDelivery::new(logger());
        assert!(delivery.deliver(&alert("denied")).await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_delivery_posts_alertmanager_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v2/alerts")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::Regex("TransactionAnomaly".to_string()))
            .with_status(200)
            .create_async()
            .await;

        let url = format!("{}/api/v2/alerts", server.url());
        let delivery = WebhookDelivery::new(url.clone(), "test-instance");
        assert_eq!(delivery.url(), url);

        delivery.deliver(&alert("failed")).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_webhook_delivery_surfaces_http_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/hook")
            .with_status(500)
            .create_async()
            .await;

        let delivery = WebhookDelivery::new(format!("{}/hook", server.url()), "test-instance");

        let err = delivery.deliver(&alert("failed")).await.unwrap_err();
        assert!(matches!(err, SinkError::Http(_)));
    }
}
