//! Service surface of the transaction monitor
//!
//! Environment-driven settings and the HTTP API wrapped around
//! [`monitor_lib`].

pub mod api;
pub mod config;
pub mod lifecycle;
