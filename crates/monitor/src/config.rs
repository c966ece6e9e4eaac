//! Monitor service configuration

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use monitor_lib::anomaly::{MonitorConfig, DEFAULT_SIGMA_THRESHOLD, DEFAULT_WINDOW_SIZE};
use monitor_lib::dispatch::DispatchConfig;
use serde::Deserialize;

/// Environment variable prefix, e.g. `MONITOR_WINDOW_SIZE`
const ENV_PREFIX: &str = "MONITOR";

/// Service settings, read from `MONITOR_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSettings {
    /// Name of this deployment, attached to logs and alerts
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Port for the ingestion, health and metrics API
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Rolling window length in batches
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Z-score threshold for adaptive metrics
    #[serde(default = "default_sigma_threshold")]
    pub sigma_threshold: f64,

    /// Comma-separated metrics evaluated on each batch
    #[serde(default = "default_tracked_metrics")]
    pub tracked_metrics: Vec<String>,

    /// Comma-separated zero-tolerance metrics
    #[serde(default = "default_static_metrics")]
    pub static_metrics: Vec<String>,

    /// Alertmanager-compatible webhook; alerts are only logged when unset
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,

    #[serde(default = "default_alert_queue_size")]
    pub alert_queue_size: usize,

    #[serde(default = "default_ingest_queue_size")]
    pub ingest_queue_size: usize,

    /// How long shutdown waits for queued alerts to be delivered
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// JSON-lines file of recent batches replayed into history at startup
    #[serde(default)]
    pub replay_path: Option<PathBuf>,
}

fn default_instance_name() -> String {
    std::env::var("INSTANCE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_window_size() -> usize {
    DEFAULT_WINDOW_SIZE
}

fn default_sigma_threshold() -> f64 {
    DEFAULT_SIGMA_THRESHOLD
}

fn default_tracked_metrics() -> Vec<String> {
    MonitorConfig::default().tracked_metrics
}

fn default_static_metrics() -> Vec<String> {
    MonitorConfig::default().static_metrics
}

fn default_delivery_timeout_ms() -> u64 {
    5_000
}

fn default_alert_queue_size() -> usize {
    1024
}

fn default_ingest_queue_size() -> usize {
    64
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

impl MonitorSettings {
    /// Load settings from the process environment
    pub fn load() -> Result<Self> {
        Self::from_environment(environment())
    }

    fn from_environment(source: ::config::Environment) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(source)
            .build()
            .context("Failed to read monitor configuration")?;

        settings
            .try_deserialize()
            .context("Invalid monitor configuration")
    }

    /// Detection parameters for the monitor
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig::default()
            .with_window_size(self.window_size)
            .with_sigma_threshold(self.sigma_threshold)
            .with_tracked_metrics(self.tracked_metrics.iter().cloned())
            .with_static_metrics(self.static_metrics.iter().cloned())
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            queue_size: self.alert_queue_size,
            delivery_timeout: Duration::from_millis(self.delivery_timeout_ms),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn environment() -> ::config::Environment {
    ::config::Environment::with_prefix(ENV_PREFIX)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("tracked_metrics")
        .with_list_parse_key("static_metrics")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load_from(vars: &[(&str, &str)]) -> Result<MonitorSettings> {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        MonitorSettings::from_environment(environment().source(Some(source)))
    }

    #[test]
    fn test_defaults_when_unset() {
        let settings = load_from(&[]).unwrap();

        assert_eq!(settings.api_port, 8080);
        assert_eq!(settings.window_size, 60);
        assert_eq!(settings.sigma_threshold, 3.0);
        assert_eq!(settings.tracked_metrics, vec!["failed", "denied", "reversed"]);
        assert_eq!(settings.static_metrics, vec!["failed"]);
        assert!(settings.webhook_url.is_none());
        assert!(settings.replay_path.is_none());
        assert_eq!(settings.monitor_config(), MonitorConfig::default());
    }

    #[test]
    fn test_overrides_from_environment() {
        let settings = load_from(&[
            ("MONITOR_WINDOW_SIZE", "120"),
            ("MONITOR_SIGMA_THRESHOLD", "2.5"),
            ("MONITOR_TRACKED_METRICS", "failed,denied,reversed,chargeback"),
            ("MONITOR_STATIC_METRICS", "failed,chargeback"),
            ("MONITOR_WEBHOOK_URL", "http://alertmanager:9093/api/v2/alerts"),
            ("MONITOR_DELIVERY_TIMEOUT_MS", "250"),
        ])
        .unwrap();

        let config = settings.monitor_config();
        assert_eq!(config.window_size, 120);
        assert_eq!(config.sigma_threshold, 2.5);
        assert_eq!(config.tracked_metrics.len(), 4);
        assert_eq!(config.static_metrics, vec!["failed", "chargeback"]);
        assert!(config.validate().is_ok());

        assert_eq!(
            settings.dispatch_config().delivery_timeout,
            Duration::from_millis(250)
        );
        assert_eq!(
            settings.webhook_url.as_deref(),
            Some("http://alertmanager:9093/api/v2/alerts")
        );
    }

    #[test]
    fn test_negative_window_is_rejected() {
        assert!(load_from(&[("MONITOR_WINDOW_SIZE", "-5")]).is_err());
    }

    #[test]
    fn test_zero_sigma_fails_validation() {
        let settings = load_from(&[("MONITOR_SIGMA_THRESHOLD", "0")]).unwrap();
        assert!(settings.monitor_config().validate().is_err());
    }
}
