//! Observability infrastructure for the transaction monitor
//!
//! Provides:
//! - Prometheus metrics (ingest latency, batches, alerts per metric, sink failures, history size)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge_vec,
    Histogram, IntCounter, IntCounterVec, IntGaugeVec,
};
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

use crate::error::SinkError;
use crate::models::AnomalyAlert;

/// Histogram buckets for per-batch ingest latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.000_01, 0.000_05, 0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1,
];

/// `instance` label used by handles that were not given one
pub const DEFAULT_INSTANCE: &str = "default";

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    ingest_latency_seconds: Histogram,
    batches_ingested: IntCounter,
    alerts_fired: IntCounterVec,
    sink_failures: IntCounter,
    input_errors: IntCounter,
    history_len: IntGaugeVec,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            ingest_latency_seconds: register_histogram!(
                "transaction_monitor_ingest_latency_seconds",
                "Time spent evaluating and recording one batch",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register ingest_latency_seconds"),

            batches_ingested: register_int_counter!(
                "transaction_monitor_batches_ingested_total",
                "Total number of batches ingested"
            )
            .expect("Failed to register batches_ingested"),

            alerts_fired: register_int_counter_vec!(
                "transaction_monitor_alerts_fired_total",
                "Total number of anomaly alerts fired",
                &["instance", "metric"]
            )
            .expect("Failed to register alerts_fired"),

            sink_failures: register_int_counter!(
                "transaction_monitor_sink_failures_total",
                "Total number of alerts whose delivery failed"
            )
            .expect("Failed to register sink_failures"),

            input_errors: register_int_counter!(
                "transaction_monitor_input_errors_total",
                "Total number of malformed batches rejected"
            )
            .expect("Failed to register input_errors"),

            history_len: register_int_gauge_vec!(
                "transaction_monitor_history_len",
                "Samples currently held in each metric's rolling window",
                &["instance", "metric"]
            )
            .expect("Failed to register history_len"),
        }
    }
}

/// Monitor metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics. Per-metric series
/// carry the handle's `instance` label so several monitors can share a
/// process.
#[derive(Clone)]
pub struct MonitorMetrics {
    instance: Arc<str>,
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        Self::for_instance(DEFAULT_INSTANCE)
    }

    /// Handle whose per-metric series are labelled with `instance`
    pub fn for_instance(instance: impl Into<String>) -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self {
            instance: Arc::from(instance.into()),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    pub fn observe_ingest_latency(&self, duration_secs: f64) {
        self.inner().ingest_latency_seconds.observe(duration_secs);
    }

    pub fn inc_batches_ingested(&self) {
        self.inner().batches_ingested.inc();
    }

    pub fn inc_alerts_fired(&self, metric: &str) {
        self.inner()
            .alerts_fired
            .with_label_values(&[&*self.instance, metric])
            .inc();
    }

    pub fn inc_sink_failures(&self) {
        self.inner().sink_failures.inc();
    }

    pub fn inc_input_errors(&self) {
        self.inner().input_errors.inc();
    }

    pub fn set_history_len(&self, metric: &str, len: i64) {
        self.inner()
            .history_len
            .with_label_values(&[&*self.instance, metric])
            .set(len);
    }

    pub fn history_len(&self, metric: &str) -> i64 {
        self.inner()
            .history_len
            .with_label_values(&[&*self.instance, metric])
            .get()
    }
}

/// Structured logger for monitor events
///
/// Provides consistent JSON-formatted logging for alerts, delivery
/// failures and lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Log a fired anomaly alert
    pub fn log_alert(&self, alert: &AnomalyAlert) {
        warn!(
            event = "anomaly_detected",
            instance = %self.instance,
            metric = %alert.metric,
            value = alert.value,
            baseline_mean = alert.baseline_mean,
            rule = %alert.rule,
            z_score = ?alert.z_score,
            "{}",
            alert.message
        );
    }

    /// Log a failed alert delivery
    pub fn log_delivery_failure(&self, alert: &AnomalyAlert, error: &SinkError) {
        warn!(
            event = "alert_delivery_failed",
            instance = %self.instance,
            metric = %alert.metric,
            value = alert.value,
            error = %error,
            "Alert delivery failed"
        );
    }

    /// Log history rebuilt from a replay source
    pub fn log_warm_up(&self, source: &str, batches: usize, rejected: usize) {
        if rejected == 0 {
            info!(
                event = "history_warmed_up",
                instance = %self.instance,
                source = %source,
                batches = batches,
                "Rolling history rebuilt from replay"
            );
        } else {
            warn!(
                event = "history_warmed_up",
                instance = %self.instance,
                source = %source,
                batches = batches,
                rejected = rejected,
                "Rolling history rebuilt from replay, some batches were rejected"
            );
        }
    }

    /// Log monitor startup
    pub fn log_startup(&self, version: &str, window_size: usize, sigma_threshold: f64) {
        info!(
            event = "monitor_started",
            instance = %self.instance,
            version = %version,
            window_size = window_size,
            sigma_threshold = sigma_threshold,
            "Transaction monitor started"
        );
    }

    /// Log monitor shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "monitor_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Transaction monitor shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DetectionRule;

    #[test]
    fn test_monitor_metrics_handles_share_registry() {
        let metrics = MonitorMetrics::new();
        let other = metrics.clone();

        metrics.observe_ingest_latency(0.0002);
        metrics.inc_batches_ingested();
        other.inc_alerts_fired("failed");
        other.inc_sink_failures();
        other.inc_input_errors();
        other.set_history_len("denied", 42);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "transaction_monitor_alerts_fired_total"));
        assert!(families
            .iter()
            .any(|f| f.get_name() == "transaction_monitor_history_len"));
    }

    #[test]
    fn test_instances_keep_separate_series() {
        let tenant_a = MonitorMetrics::for_instance("metrics-test-a");
        let tenant_b = MonitorMetrics::for_instance("metrics-test-b");

        tenant_a.set_history_len("denied", 60);
        tenant_b.set_history_len("denied", 3);

        assert_eq!(tenant_a.history_len("denied"), 60);
        assert_eq!(tenant_b.history_len("denied"), 3);
        assert_eq!(MonitorMetrics::new().instance(), DEFAULT_INSTANCE);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-instance");
        assert_eq!(logger.instance(), "test-instance");

        let alert = AnomalyAlert {
            metric: "failed".to_string(),
            value: 9,
            baseline_mean: 0.0,
            rule: DetectionRule::StaticCeiling,
            z_score: None,
            message: "Anomaly detected in 'failed'".to_string(),
            detected_at: 0,
        };
        logger.log_alert(&alert);
        logger.log_delivery_failure(&alert, &SinkError::QueueFull);
        logger.log_warm_up("replay.jsonl", 10, 1);
    }
}
