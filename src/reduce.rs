//! Reduction methods for multi-point plan-data comparisons.
//!
//! A plan-data check may select several data points from a prior scan; the
//! reduction method collapses those points into the single value the
//! comparison is applied to.

use serde::{Deserialize, Serialize};

/// How to collapse a selection of data points into one value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceMethod {
    /// Arithmetic mean of the selected points.
    #[default]
    Average,
    /// Smallest selected point.
    Min,
    /// Largest selected point.
    Max,
    /// Sum of the selected points.
    Sum,
    /// Population standard deviation of the selected points.
    Std,
}

impl ReduceMethod {
    /// Apply the reduction to a slice of samples.
    ///
    /// Returns `None` for an empty slice; there is no meaningful reduction
    /// of zero points.
    pub fn reduce(&self, samples: &[f64]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let sum: f64 = samples.iter().sum();
        let value = match self {
            ReduceMethod::Average => sum / n,
            ReduceMethod::Min => samples.iter().copied().fold(f64::INFINITY, f64::min),
            ReduceMethod::Max => samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            ReduceMethod::Sum => sum,
            ReduceMethod::Std => {
                let mean = sum / n;
                let variance =
                    samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
                variance.sqrt()
            }
        };
        Some(value)
    }
}
