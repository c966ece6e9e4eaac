//! Hybrid detection policy
//!
//! Each tracked metric is classified once, at monitor construction, as
//! either static (zero tolerance, fixed ceiling) or adaptive (z-score
//! against its own rolling history). Evaluation is a single match over the
//! variants.

use super::MetricSeries;
use crate::models::DetectionRule;

/// Minimum samples required before adaptive scoring is attempted
pub const MIN_HISTORY_FOR_STATISTICS: usize = 10;

/// Ceiling for static-class metrics; values strictly above it fire
pub const STATIC_FAILURE_CEILING: f64 = 5.0;

/// Absolute margin above the mean used when the history has no variance
pub const ZERO_VARIANCE_MARGIN: f64 = 5.0;

/// Detection strategy bound to a metric
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetectionPolicy {
    /// Fires when the value exceeds a fixed ceiling, ignoring history
    Static { ceiling: f64 },
    /// Fires when the value's z-score against history exceeds `sigma`
    Adaptive { sigma: f64 },
}

/// Why a policy fired
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trigger {
    pub rule: DetectionRule,
    pub z_score: Option<f64>,
}

impl DetectionPolicy {
    pub fn static_ceiling() -> Self {
        DetectionPolicy::Static {
            ceiling: STATIC_FAILURE_CEILING,
        }
    }

    pub fn adaptive(sigma: f64) -> Self {
        DetectionPolicy::Adaptive { sigma }
    }

    /// Judge `value` against `history`, which must not yet contain it
    ///
    /// # Returns
    /// * `Some(Trigger)` when the value is anomalous
    /// * `None` otherwise, including during the cold-start period
    pub fn evaluate(&self, value: f64, history: &MetricSeries) -> Option<Trigger> {
        match *self {
            DetectionPolicy::Static { ceiling } => (value > ceiling).then_some(Trigger {
                rule: DetectionRule::StaticCeiling,
                z_score: None,
            }),
            DetectionPolicy::Adaptive { sigma } => {
                // Cold start: not enough evidence for a baseline
                if history.len() < MIN_HISTORY_FOR_STATISTICS {
                    return None;
                }

                let mean = history.mean();
                let std_dev = history.std_dev();

                // z-score is undefined on a flat history
                if std_dev == 0.0 {
                    return (value > mean + ZERO_VARIANCE_MARGIN).then_some(Trigger {
                        rule: DetectionRule::ZeroVarianceMargin,
                        z_score: None,
                    });
                }

                let z_score = (value - mean) / std_dev;
                (z_score > sigma).then_some(Trigger {
                    rule: DetectionRule::ZScore,
                    z_score: Some(z_score),
                })
            }
        }
    }

    /// Boolean view of [`evaluate`](Self::evaluate)
    pub fn fires(&self, value: f64, history: &MetricSeries) -> bool {
        self.evaluate(value, history).is_some()
    }
}
