//! Anomaly detection for per-minute transaction counts
//!
//! This module provides:
//! - Bounded rolling history per metric
//! - The hybrid static / z-score detection policy
//! - The monitor that ties them together and fires alerts into a sink

mod alerter;
mod monitor;
mod policy;
mod series;


pub use alerter::{
    to_alertmanager_alert, AlertSeverity, AlertSink, AlertmanagerAlert, AlertmanagerPayload,
    RecordingSink,
};
pub use monitor::{AnomalyMonitor, MonitorConfig, DEFAULT_SIGMA_THRESHOLD, DEFAULT_WINDOW_SIZE};
pub use policy::{
    DetectionPolicy, Trigger, MIN_HISTORY_FOR_STATISTICS, STATIC_FAILURE_CEILING,
    ZERO_VARIANCE_MARGIN,
};
pub use series::{Baseline, MetricSeries};
