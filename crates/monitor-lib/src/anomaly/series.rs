//! Bounded rolling history for a single metric
//!
//! Keeps the most recent `capacity` observations in arrival order and
//! evicts the oldest first. Mean and standard deviation are recomputed on
//! demand; windows are small (tens to a few hundred samples).

use std::collections::VecDeque;

use serde::Serialize;

/// Fixed-capacity FIFO of a metric's recent values
#[derive(Debug, Clone)]
pub struct MetricSeries {
    name: String,
    capacity: usize,
    values: VecDeque<f64>,
}

impl MetricSeries {
    /// Create an empty series holding at most `capacity` values
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            values: VecDeque::with_capacity(capacity),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Append a value, evicting the oldest one when at capacity
    pub fn push(&mut self, value: f64) {
        if self.capacity == 0 {
            return;
        }
        while self.values.len() >= self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Values from oldest to newest
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }

    /// Arithmetic mean, 0.0 for an empty series
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Population standard deviation, 0.0 for an empty series
    pub fn std_dev(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let variance = self
            .values
            .iter()
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / self.values.len() as f64;
        variance.sqrt()
    }

    /// Point-in-time statistics for reporting
    pub fn baseline(&self) -> Baseline {
        Baseline {
            metric: self.name.clone(),
            samples: self.len(),
            capacity: self.capacity,
            mean: self.mean(),
            std_dev: self.std_dev(),
        }
    }
}

/// Snapshot of a series' statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Baseline {
    pub metric: String,
    pub samples: usize,
    pub capacity: usize,
    pub mean: f64,
    pub std_dev: f64,
}
