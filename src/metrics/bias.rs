//! Bias metrics over per-group mean scores.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::stats::population_std_dev;

/// Disparity measure over one score per demographic group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BiasMetric {
    /// Ratio of the worst group's error to the best group's error, where
    /// error is `1 - score`.
    #[serde(rename = "SER", alias = "ser", alias = "skewed_error_ratio")]
    SkewedErrorRatio,
    /// Population standard deviation of the raw group scores.
    #[serde(rename = "SD", alias = "sd", alias = "std", alias = "standard_deviation")]
    StandardDeviation,
}

impl BiasMetric {
    /// All supported bias metrics, in default reporting order.
    #[must_use]
    pub fn all() -> &'static [Self] {
        &[Self::SkewedErrorRatio, Self::StandardDeviation]
    }

    /// Short name used in result keys.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::SkewedErrorRatio => "SER",
            Self::StandardDeviation => "SD",
        }
    }

    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ser" | "skewed_error_ratio" | "skew" => Some(Self::SkewedErrorRatio),
            "sd" | "std" | "stddev" | "standard_deviation" => Some(Self::StandardDeviation),
            _ => None,
        }
    }

    /// Fold per-group scores into one disparity value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DegenerateMetric`] for an empty score sequence, and for
    /// the skewed error ratio when the best group has zero error.
    pub fn compute(self, scores: &[f64]) -> Result<f64> {
        if scores.is_empty() {
            return Err(self.degenerate("no group scores"));
        }
        match self {
            Self::SkewedErrorRatio => {
                let (min_err, max_err) = scores.iter().map(|s| 1.0 - s).fold(
                    (f64::INFINITY, f64::NEG_INFINITY),
                    |(lo, hi), e| (lo.min(e), hi.max(e)),
                );
                if min_err <= 0.0 {
                    return Err(self.degenerate(&format!(
                        "best group has error {min_err} (score >= 1.0)"
                    )));
                }
                Ok(max_err / min_err)
            }
            Self::StandardDeviation => Ok(population_std_dev(scores)),
        }
    }

    fn degenerate(self, reason: &str) -> Error {
        Error::DegenerateMetric {
            metric: self.name().to_string(),
            reason: reason.to_string(),
        }
    }
}

impl std::fmt::Display for BiasMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
