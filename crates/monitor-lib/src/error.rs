//! Error taxonomy for the monitor
//!
//! Only [`ConfigError`] and [`InputError`] ever reach callers of the
//! monitor. [`SinkError`] is produced by alert sinks and contained by the
//! ingestion path.

use std::time::Duration;

use thiserror::Error;

/// Invalid construction parameters, fatal at startup
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("window size must be a positive integer, got {0}")]
    InvalidWindowSize(usize),

    #[error("sigma threshold must be a positive finite number, got {0}")]
    InvalidSigmaThreshold(f64),

    #[error("at least one metric must be tracked")]
    NoTrackedMetrics,

    #[error("metric '{0}' is tracked more than once")]
    DuplicateMetric(String),

    #[error("static metric '{0}' is not in the tracked metric set")]
    UntrackedStaticMetric(String),
}

/// Structurally invalid batch, rejected without touching monitor state
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("batch must be a mapping of metric name to count, got {found}")]
    NotAMapping { found: &'static str },

    #[error("count for metric '{metric}' must be an integer, got {found}")]
    InvalidCount { metric: String, found: String },
}

/// Errors returned by an [`IngestHandle`](crate::service::IngestHandle)
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("ingestion loop is not running")]
    Stopped,
}

/// Alert delivery failure, logged and counted but never propagated
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("alert queue is full")]
    QueueFull,

    #[error("alert channel is closed")]
    Closed,

    #[error("alert delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("alert delivery failed: {0}")]
    Delivery(String),

    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
}
