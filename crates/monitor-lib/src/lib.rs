//! Core library for the transaction anomaly monitor
//!
//! This crate provides:
//! - Rolling per-metric baselines and the hybrid detection policy
//! - Alert sinks and asynchronous alert delivery
//! - A single-writer ingestion loop with graceful shutdown
//! - Warm-up replay, health checks and observability

pub mod anomaly;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod replay;
pub mod service;

pub use anomaly::{AlertSink, AnomalyMonitor, MonitorConfig};
pub use error::{ConfigError, InputError, ServiceError, SinkError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{MonitorMetrics, StructuredLogger};
