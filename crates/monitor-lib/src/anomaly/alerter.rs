//! Alert sinks and Alertmanager formatting
//!
//! Handles:
//! - The synchronous sink interface the monitor calls once per fired alert
//! - An in-memory recording sink
//! - Conversion of alerts into the Alertmanager webhook format

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::SinkError;
use crate::models::{AnomalyAlert, DetectionRule};

/// Alertmanager `alertname` label for every transaction anomaly
const ALERT_NAME: &str = "TransactionAnomaly";

/// Receives alerts as the monitor fires them
///
/// Called synchronously from the ingestion path, so implementations must
/// return quickly. Slow transports belong behind a
/// [`ChannelSink`](crate::dispatch::ChannelSink).
pub trait AlertSink: Send + Sync {
    fn notify(&self, alert: &AnomalyAlert) -> Result<(), SinkError>;
}

impl<S: AlertSink + ?Sized> AlertSink for Arc<S> {
    fn notify(&self, alert: &AnomalyAlert) -> Result<(), SinkError> {
        (**self).notify(alert)
    }
}

/// Keeps every alert in memory, in delivery order
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    alerts: Arc<Mutex<Vec<AnomalyAlert>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Alerts received so far
    pub fn alerts(&self) -> Vec<AnomalyAlert> {
        match self.alerts.lock() {
            Ok(alerts) => alerts.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.alerts().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AlertSink for RecordingSink {
    fn notify(&self, alert: &AnomalyAlert) -> Result<(), SinkError> {
        let mut alerts = self
            .alerts
            .lock()
            .map_err(|_| SinkError::Delivery("recording sink lock poisoned".to_string()))?;
        alerts.push(alert.clone());
        Ok(())
    }
}

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl AlertSeverity {
    /// Static-ceiling breaches are zero-tolerance incidents
    pub fn for_rule(rule: DetectionRule) -> Self {
        match rule {
            DetectionRule::StaticCeiling => AlertSeverity::Critical,
            DetectionRule::ZeroVarianceMargin | DetectionRule::ZScore => AlertSeverity::Warning,
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Alertmanager webhook alert format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerAlert {
    /// Alert status (firing or resolved)
    pub status: String,
    /// Alert labels for routing and grouping
    pub labels: HashMap<String, String>,
    /// Alert annotations with details
    pub annotations: HashMap<String, String>,
    /// Start time in RFC3339 format
    pub starts_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator_url: Option<String>,
}

/// Alertmanager webhook payload (array of alerts)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertmanagerPayload {
    pub alerts: Vec<AlertmanagerAlert>,
}

impl AlertmanagerPayload {
    pub fn single(alert: AlertmanagerAlert) -> Self {
        Self {
            alerts: vec![alert],
        }
    }
}

/// Convert an anomaly alert into the Alertmanager format
///
/// `instance` identifies the monitor deployment that raised it.
pub fn to_alertmanager_alert(alert: &AnomalyAlert, instance: &str) -> AlertmanagerAlert {
    let severity = AlertSeverity::for_rule(alert.rule);

    let mut labels = HashMap::new();
    labels.insert("alertname".to_string(), ALERT_NAME.to_string());
    labels.insert("severity".to_string(), severity.to_string());
    labels.insert("metric".to_string(), alert.metric.clone());
    labels.insert("rule".to_string(), alert.rule.to_string());
    labels.insert("instance".to_string(), instance.to_string());

    let mut annotations = HashMap::new();
    annotations.insert(
        "summary".to_string(),
        format!("Anomalous '{}' transaction count", alert.metric),
    );
    annotations.insert("description".to_string(), alert.message.clone());
    annotations.insert("observed".to_string(), alert.value.to_string());
    annotations.insert(
        "baseline_mean".to_string(),
        format!("{:.2}", alert.baseline_mean),
    );
    if let Some(z) = alert.z_score {
        annotations.insert("z_score".to_string(), format!("{:.2}", z));
    }

    let starts_at = chrono::DateTime::from_timestamp(alert.detected_at, 0)
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_default();

    AlertmanagerAlert {
        status: "firing".to_string(),
        labels,
        annotations,
        starts_at,
        ends_at: None,
        generator_url: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(rule: DetectionRule, z_score: Option<f64>) -> AnomalyAlert {
        AnomalyAlert {
            metric: "denied".to_string(),
            value: 42,
            baseline_mean: 5.0,
            rule,
            z_score,
            message: "Anomaly detected in 'denied'".to_string(),
            detected_at: 1_704_067_200,
        }
    }

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        assert!(sink.is_empty());

        let mut first = alert(DetectionRule::StaticCeiling, None);
        first.metric = "failed".to_string();
        sink.notify(&first).unwrap();
        sink.notify(&alert(DetectionRule::ZScore, Some(4.0))).unwrap();

        let alerts = sink.alerts();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].metric, "failed");
        assert_eq!(alerts[1].metric, "denied");
    }

    #[test]
    fn test_shared_sink_through_arc() {
        let sink = Arc::new(RecordingSink::new());
        let as_dyn: Arc<dyn AlertSink> = sink.clone();

        as_dyn.notify(&alert(DetectionRule::ZScore, Some(3.5))).unwrap();
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_severity_by_rule() {
        assert_eq!(
            AlertSeverity::for_rule(DetectionRule::StaticCeiling),
            AlertSeverity::Critical
        );
        assert_eq!(
            AlertSeverity::for_rule(DetectionRule::ZScore),
            AlertSeverity::Warning
        );
        assert_eq!(
            AlertSeverity::for_rule(DetectionRule::ZeroVarianceMargin),
            AlertSeverity::Warning
        );
    }

    #[test]
    fn test_alertmanager_alert_labels_and_annotations() {
        let am = to_alertmanager_alert(&alert(DetectionRule::ZScore, Some(4.25)), "node-1");

        assert_eq!(am.status, "firing");
        assert_eq!(am.labels.get("alertname").unwrap(), "TransactionAnomaly");
        assert_eq!(am.labels.get("metric").unwrap(), "denied");
        assert_eq!(am.labels.get("rule").unwrap(), "z_score");
        assert_eq!(am.labels.get("severity").unwrap(), "warning");
        assert_eq!(am.labels.get("instance").unwrap(), "node-1");
        assert_eq!(am.annotations.get("observed").unwrap(), "42");
        assert_eq!(am.annotations.get("baseline_mean").unwrap(), "5.00");
        assert_eq!(am.annotations.get("z_score").unwrap(), "4.25");
        assert!(am.starts_at.starts_with("2024-01-01T00:00:00"));
    }

    #[test]
    fn test_alertmanager_alert_without_z_score() {
        let am = to_alertmanager_alert(&alert(DetectionRule::StaticCeiling, None), "node-1");

        assert_eq!(am.labels.get("severity").unwrap(), "critical");
        assert!(!am.annotations.contains_key("z_score"));

        let payload = serde_json::to_value(AlertmanagerPayload::single(am)).unwrap();
        assert_eq!(payload["alerts"][0]["status"], "firing");
        assert!(payload["alerts"][0].get("startsAt").is_some());
        assert!(payload["alerts"][0].get("endsAt").is_none());
    }
}
