//! Core data models for the transaction monitor

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::InputError;

/// Key carrying the optional minute label of a batch
const TIMESTAMP_KEY: &str = "timestamp";

/// One minute of aggregated transaction-status counts
///
/// Metrics missing from the batch read as a count of zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Batch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub counts: HashMap<String, i64>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a batch from `(metric, count)` pairs
    pub fn from_counts<I, K>(counts: I) -> Self
    where
        I: IntoIterator<Item = (K, i64)>,
        K: Into<String>,
    {
        Self {
            timestamp: None,
            counts: counts.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn with_count(mut self, metric: impl Into<String>, count: i64) -> Self {
        self.counts.insert(metric.into(), count);
        self
    }

    /// Count for a metric, zero when absent
    pub fn get(&self, metric: &str) -> i64 {
        self.counts.get(metric).copied().unwrap_or(0)
    }

    /// Parse an untyped JSON batch, keeping only the given metrics
    ///
    /// The batch must be an object. Counts for the listed metrics must be
    /// integers (a float with no fractional part is accepted); `null` reads
    /// as absent. Every other key is ignored, so producers may send extra
    /// statuses such as `approved` alongside the tracked ones.
    pub fn from_json<S: AsRef<str>>(value: &Value, metrics: &[S]) -> Result<Self, InputError> {
        let object = value.as_object().ok_or(InputError::NotAMapping {
            found: json_kind(value),
        })?;

        let mut batch = Batch::new();
        batch.timestamp = match object.get(TIMESTAMP_KEY) {
            Some(Value::String(ts)) => Some(ts.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };

        for metric in metrics {
            let metric = metric.as_ref();
            match object.get(metric) {
                None | Some(Value::Null) => {}
                Some(raw) => {
                    let count = parse_count(raw).ok_or_else(|| InputError::InvalidCount {
                        metric: metric.to_string(),
                        found: raw.to_string(),
                    })?;
                    batch.counts.insert(metric.to_string(), count);
                }
            }
        }

        Ok(batch)
    }
}

fn parse_count(raw: &Value) -> Option<i64> {
    let Value::Number(number) = raw else {
        return None;
    };
    if let Some(count) = number.as_i64() {
        return Some(count);
    }
    let float = number.as_f64()?;
    if float.fract() == 0.0 && float >= i64::MIN as f64 && float <= i64::MAX as f64 {
        Some(float as i64)
    } else {
        None
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Which branch of the detection policy fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionRule {
    /// Static class value above the fixed ceiling
    StaticCeiling,
    /// Adaptive class over a flat history, value above `mean + margin`
    ZeroVarianceMargin,
    /// Adaptive class with z-score above the sigma threshold
    ZScore,
}

impl std::fmt::Display for DetectionRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionRule::StaticCeiling => write!(f, "static_ceiling"),
            DetectionRule::ZeroVarianceMargin => write!(f, "zero_variance_margin"),
            DetectionRule::ZScore => write!(f, "z_score"),
        }
    }
}

/// Alert raised when a metric's latest value is judged anomalous
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyAlert {
    pub metric: String,
    /// Observed count for the minute
    pub value: i64,
    /// Mean of the history the value was judged against (0 with no history)
    pub baseline_mean: f64,
    pub rule: DetectionRule,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_score: Option<f64>,
    pub message: String,
    /// Unix seconds
    pub detected_at: i64,
}

/// Outcome tag of a processed batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Processed,
}

/// Result of ingesting one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestResult {
    pub status: IngestStatus,
    /// Alerts fired for this batch, in metric-evaluation order
    pub alerts: Vec<AnomalyAlert>,
}

impl IngestResult {
    pub fn processed(alerts: Vec<AnomalyAlert>) -> Self {
        Self {
            status: IngestStatus::Processed,
            alerts,
        }
    }

    pub fn fired(&self, metric: &str) -> bool {
        self.alerts.iter().any(|a| a.metric == metric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const METRICS: &[&str] = &["failed", "denied", "reversed"];

    #[test]
    fn test_missing_metric_reads_zero() {
        let batch = Batch::new().with_count("failed", 3);
        assert_eq!(batch.get("failed"), 3);
        assert_eq!(batch.get("denied"), 0);
    }

    #[test]
    fn test_from_json_ignores_untracked_keys() {
        let value = json!({
            "timestamp": "10:00",
            "failed": 2,
            "denied": 5,
            "approved": 100,
            "note": "not a count"
        });

        let batch = Batch::from_json(&value, METRICS).unwrap();

        assert_eq!(batch.timestamp.as_deref(), Some("10:00"));
        assert_eq!(batch.get("failed"), 2);
        assert_eq!(batch.get("denied"), 5);
        assert_eq!(batch.get("reversed"), 0);
        assert!(!batch.counts.contains_key("approved"));
    }

    #[test]
    fn test_from_json_rejects_non_mapping() {
        let err = Batch::from_json(&json!([1, 2, 3]), METRICS).unwrap_err();
        assert_eq!(err, InputError::NotAMapping { found: "an array" });

        let err = Batch::from_json(&json!("failed=3"), METRICS).unwrap_err();
        assert_eq!(err, InputError::NotAMapping { found: "a string" });
    }

    #[test]
    fn test_from_json_rejects_non_numeric_tracked_count() {
        let err = Batch::from_json(&json!({"denied": "five"}), METRICS).unwrap_err();
        assert!(matches!(err, InputError::InvalidCount { ref metric, .. } if metric == "denied"));

        let err = Batch::from_json(&json!({"failed": 1.5}), METRICS).unwrap_err();
        assert!(matches!(err, InputError::InvalidCount { .. }));
    }

    #[test]
    fn test_from_json_accepts_whole_floats_nulls_and_negatives() {
        let value = json!({"failed": 4.0, "denied": null, "reversed": -2});
        let batch = Batch::from_json(&value, METRICS).unwrap();

        assert_eq!(batch.get("failed"), 4);
        assert_eq!(batch.get("denied"), 0);
        assert_eq!(batch.get("reversed"), -2);
    }

    #[test]
    fn test_ingest_result_serialization() {
        let result = IngestResult::processed(vec![]);
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["status"], "processed");
        assert!(json["alerts"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_detection_rule_display_matches_serde() {
        for rule in [
            DetectionRule::StaticCeiling,
            DetectionRule::ZeroVarianceMargin,
            DetectionRule::ZScore,
        ] {
            let serialized = serde_json::to_value(rule).unwrap();
            assert_eq!(serialized, json!(rule.to_string()));
        }
    }
}
