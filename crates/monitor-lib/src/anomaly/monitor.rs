//! Streaming anomaly monitor
//!
//! Owns one rolling series per tracked metric and judges every incoming
//! minute against the history that precedes it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::policy::{DetectionPolicy, Trigger, STATIC_FAILURE_CEILING};
use super::series::{Baseline, MetricSeries};
use super::AlertSink;
use crate::error::{ConfigError, InputError};
use crate::models::{AnomalyAlert, Batch, DetectionRule, IngestResult};
use crate::observability::MonitorMetrics;

/// Default rolling window (one hour of minute batches)
pub const DEFAULT_WINDOW_SIZE: usize = 60;

/// Default z-score threshold for adaptive metrics
pub const DEFAULT_SIGMA_THRESHOLD: f64 = 3.0;

/// Monitor construction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Number of past batches kept per metric
    pub window_size: usize,
    /// Z-score above which an adaptive metric fires
    pub sigma_threshold: f64,
    /// Metrics evaluated on every batch, in this order
    pub tracked_metrics: Vec<String>,
    /// Subset of tracked metrics judged by the static ceiling
    pub static_metrics: Vec<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            sigma_threshold: DEFAULT_SIGMA_THRESHOLD,
            tracked_metrics: vec![
                "failed".to_string(),
                "denied".to_string(),
                "reversed".to_string(),
            ],
            static_metrics: vec!["failed".to_string()],
        }
    }
}

impl MonitorConfig {
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_sigma_threshold(mut self, sigma_threshold: f64) -> Self {
        self.sigma_threshold = sigma_threshold;
        self
    }

    pub fn with_tracked_metrics<I, S>(mut self, metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tracked_metrics = metrics.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_static_metrics<I, S>(mut self, metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.static_metrics = metrics.into_iter().map(Into::into).collect();
        self
    }

    /// Check every parameter, returning the first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::InvalidWindowSize(self.window_size));
        }
        if !(self.sigma_threshold.is_finite() && self.sigma_threshold > 0.0) {
            return Err(ConfigError::InvalidSigmaThreshold(self.sigma_threshold));
        }
        if self.tracked_metrics.is_empty() {
            return Err(ConfigError::NoTrackedMetrics);
        }

        let mut seen = HashSet::new();
        for metric in &self.tracked_metrics {
            if !seen.insert(metric.as_str()) {
                return Err(ConfigError::DuplicateMetric(metric.clone()));
            }
        }
        if let Some(stray) = self
            .static_metrics
            .iter()
            .find(|m| !seen.contains(m.as_str()))
        {
            return Err(ConfigError::UntrackedStaticMetric(stray.clone()));
        }

        Ok(())
    }

    /// Policy a tracked metric is judged by
    fn policy_for(&self, metric: &str) -> DetectionPolicy {
        if self.static_metrics.iter().any(|m| m == metric) {
            DetectionPolicy::static_ceiling()
        } else {
            DetectionPolicy::adaptive(self.sigma_threshold)
        }
    }
}

/// A metric's history paired with the policy resolved for it
struct TrackedMetric {
    series: MetricSeries,
    policy: DetectionPolicy,
}

/// Rolling-baseline anomaly monitor for per-minute transaction counts
///
/// History lives only in memory. After a restart it has to be rebuilt,
/// either by [`warm_up`](Self::warm_up) from recorded batches or by
/// waiting out the cold-start period.
///
/// Batches are assumed to arrive in chronological order. Nothing checks
/// this; out-of-order batches silently skew the baseline.
pub struct AnomalyMonitor {
    config: MonitorConfig,
    tracked: Vec<TrackedMetric>,
    sink: Arc<dyn AlertSink>,
    metrics: MonitorMetrics,
}

impl AnomalyMonitor {
    /// Create a monitor with an empty history for every tracked metric
    pub fn new(config: MonitorConfig, sink: Arc<dyn AlertSink>) -> Result<Self, ConfigError> {
        config.validate()?;

        let tracked = config
            .tracked_metrics
            .iter()
            .map(|name| TrackedMetric {
                series: MetricSeries::new(name.clone(), config.window_size),
                policy: config.policy_for(name),
            })
            .collect();

        Ok(Self {
            config,
            tracked,
            sink,
            metrics: MonitorMetrics::new(),
        })
    }

    /// Label this monitor's Prometheus series with `instance`
    ///
    /// Needed when more than one monitor runs in the same process.
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.metrics = MonitorMetrics::for_instance(instance);
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Tracked metric names in evaluation order
    pub fn tracked_metrics(&self) -> impl Iterator<Item = &str> {
        self.tracked.iter().map(|t| t.series.name())
    }

    pub fn history(&self, metric: &str) -> Option<&MetricSeries> {
        self.find(metric).map(|t| &t.series)
    }

    pub fn policy(&self, metric: &str) -> Option<DetectionPolicy> {
        self.find(metric).map(|t| t.policy)
    }

    pub fn baseline(&self, metric: &str) -> Option<Baseline> {
        self.find(metric).map(|t| t.series.baseline())
    }

    /// Baselines of all tracked metrics in evaluation order
    pub fn baselines(&self) -> Vec<Baseline> {
        self.tracked.iter().map(|t| t.series.baseline()).collect()
    }

    fn find(&self, metric: &str) -> Option<&TrackedMetric> {
        self.tracked.iter().find(|t| t.series.name() == metric)
    }

    /// Evaluate one minute of counts, then fold it into the history
    ///
    /// Each metric is judged against its history *before* the new value is
    /// appended. Every fired alert is handed to the sink exactly once; a
    /// sink failure is logged and does not stop the remaining metrics.
    ///
    /// Not idempotent: feeding the same batch twice judges the second copy
    /// against a history that already contains the first.
    pub fn ingest(&mut self, batch: &Batch) -> IngestResult {
        let start = Instant::now();
        let mut alerts = Vec::new();

        for tracked in &mut self.tracked {
            let metric = tracked.series.name().to_string();
            let value = batch.get(&metric);

            if let Some(trigger) = tracked.policy.evaluate(value as f64, &tracked.series) {
                let alert = build_alert(&metric, value, tracked.series.mean(), trigger);
                self.metrics.inc_alerts_fired(&metric);

                if let Err(e) = self.sink.notify(&alert) {
                    self.metrics.inc_sink_failures();
                    warn!(
                        event = "alert_sink_failed",
                        metric = %metric,
                        error = %e,
                        "Alert sink failed, continuing ingestion"
                    );
                }
                alerts.push(alert);
            }

            tracked.series.push(value as f64);
            self.metrics
                .set_history_len(&metric, tracked.series.len() as i64);
        }

        let elapsed = start.elapsed();
        self.metrics.inc_batches_ingested();
        self.metrics.observe_ingest_latency(elapsed.as_secs_f64());

        debug!(
            timestamp = ?batch.timestamp,
            alerts = alerts.len(),
            elapsed_us = elapsed.as_micros() as u64,
            "Batch processed"
        );

        IngestResult::processed(alerts)
    }

    /// Parse an untyped batch and ingest it
    ///
    /// A structurally invalid batch is rejected before any history changes.
    pub fn ingest_json(&mut self, value: &Value) -> Result<IngestResult, InputError> {
        let batch = Batch::from_json(value, &self.config.tracked_metrics).map_err(|e| {
            self.metrics.inc_input_errors();
            e
        })?;
        Ok(self.ingest(&batch))
    }

    /// Append a batch to the history without evaluating it
    ///
    /// Used to rebuild the baseline from recorded batches after a restart.
    pub fn warm_up(&mut self, batch: &Batch) {
        for tracked in &mut self.tracked {
            let value = batch.get(tracked.series.name());
            tracked.series.push(value as f64);
            self.metrics
                .set_history_len(tracked.series.name(), tracked.series.len() as i64);
        }
    }
}

fn build_alert(metric: &str, value: i64, baseline_mean: f64, trigger: Trigger) -> AnomalyAlert {
    let detail = match trigger.rule {
        DetectionRule::StaticCeiling => {
            format!("static ceiling {} exceeded", STATIC_FAILURE_CEILING)
        }
        DetectionRule::ZeroVarianceMargin => "flat history, fallback margin exceeded".to_string(),
        DetectionRule::ZScore => format!("z-score {:.2}", trigger.z_score.unwrap_or_default()),
    };

    AnomalyAlert {
        metric: metric.to_string(),
        value,
        baseline_mean,
        rule: trigger.rule,
        z_score: trigger.z_score,
        message: format!(
            "Anomaly detected in '{}': current value {} (expected baseline ~{:.2}, {})",
            metric, value, baseline_mean, detail
        ),
        detected_at: chrono::Utc::now().timestamp(),
    }
}
