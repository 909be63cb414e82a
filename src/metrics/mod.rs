//! Segmentation overlap metrics and cross-group bias metrics.
//!
//! Per-sample metrics are computed from a [`ConfusionMatrix`] between the
//! annotated label mask and the predicted label mask, macro-averaged over all
//! classes of the anatomy (background included):
//!
//! - **IoU**: `TP / (TP + FP + FN)` (multi-class Jaccard index)
//! - **Dice**: `2TP / (2TP + FP + FN)`
//!
//! A class that appears in neither mask has no defined overlap and is left out
//! of the macro average. A sample where every class is absent scores 1.0.
//!
//! Bias metrics in [`bias`] fold the per-group means into one disparity value.

pub mod bias;

use imgref::ImgRef;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use bias::BiasMetric;

/// Per-sample segmentation quality measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentationMetric {
    /// Macro-averaged intersection over union.
    #[serde(rename = "IoU", alias = "iou", alias = "jaccard")]
    Iou,
    /// Macro-averaged Dice coefficient.
    #[serde(rename = "Dice", alias = "dice", alias = "f1")]
    Dice,
}

impl SegmentationMetric {
    /// All supported per-sample metrics, in default reporting order.
    #[must_use]
    pub fn all() -> &'static [Self] {
        &[Self::Iou, Self::Dice]
    }

    /// Name used in result keys.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Iou => "IoU",
            Self::Dice => "Dice",
        }
    }

    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "iou" | "jaccard" | "miou" => Some(Self::Iou),
            "dice" | "f1" => Some(Self::Dice),
            _ => None,
        }
    }

    /// Score a sample from its confusion matrix.
    #[must_use]
    pub fn score(self, confusion: &ConfusionMatrix) -> f64 {
        match self {
            Self::Iou => confusion.macro_iou(),
            Self::Dice => confusion.macro_dice(),
        }
    }
}

impl std::fmt::Display for SegmentationMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Pixel counts indexed by `(target class, predicted class)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    classes: usize,
    counts: Vec<u64>,
}

impl ConfusionMatrix {
    /// Count pixel agreement between an annotation and a prediction.
    ///
    /// Rows are counted in parallel; the integer totals do not depend on
    /// scheduling.
    ///
    /// # Errors
    ///
    /// Returns an error if the masks differ in size or contain a label
    /// outside `0..classes`.
    pub fn from_masks(target: ImgRef<'_, u8>, prediction: ImgRef<'_, u8>, classes: usize) -> Result<Self> {
        if target.width() != prediction.width() || target.height() != prediction.height() {
            return Err(Error::DimensionMismatch {
                expected: (target.width(), target.height()),
                actual: (prediction.width(), prediction.height()),
            });
        }
        if classes == 0 {
            return Err(Error::MetricCalculation {
                metric: "confusion".to_string(),
                reason: "label catalog has no classes".to_string(),
            });
        }

        let width = target.width();
        let counts = (0..target.height())
            .into_par_iter()
            .map(|y| {
                let t_row = &target.buf()[y * target.stride()..][..width];
                let p_row = &prediction.buf()[y * prediction.stride()..][..width];
                let mut row_counts = vec![0u64; classes * classes];
                for (&t, &p) in t_row.iter().zip(p_row) {
                    let (t, p) = (usize::from(t), usize::from(p));
                    if t >= classes || p >= classes {
                        return Err(Error::MetricCalculation {
                            metric: "confusion".to_string(),
                            reason: format!(
                                "label {} outside catalog of {} classes (row {})",
                                t.max(p),
                                classes,
                                y
                            ),
                        });
                    }
                    row_counts[t * classes + p] += 1;
                }
                Ok(row_counts)
            })
            .try_reduce(
                || vec![0u64; classes * classes],
                |mut acc, row| {
                    for (a, r) in acc.iter_mut().zip(row) {
                        *a += r;
                    }
                    Ok(acc)
                },
            )?;

        Ok(Self { classes, counts })
    }

    /// Number of classes.
    #[must_use]
    pub fn classes(&self) -> usize {
        self.classes
    }

    /// Pixels of class `target` predicted as `predicted`.
    #[must_use]
    pub fn count(&self, target: usize, predicted: usize) -> u64 {
        self.counts[target * self.classes + predicted]
    }

    /// Correctly predicted pixels of a class.
    #[must_use]
    pub fn true_positives(&self, class: usize) -> u64 {
        self.count(class, class)
    }

    /// Pixels predicted as `class` that belong to another class.
    #[must_use]
    pub fn false_positives(&self, class: usize) -> u64 {
        (0..self.classes).map(|t| self.count(t, class)).sum::<u64>() - self.true_positives(class)
    }

    /// Pixels of `class` predicted as another class.
    #[must_use]
    pub fn false_negatives(&self, class: usize) -> u64 {
        (0..self.classes).map(|p| self.count(class, p)).sum::<u64>() - self.true_positives(class)
    }

    /// Intersection over union for one class; `None` if the class is absent
    /// from both masks.
    #[must_use]
    pub fn class_iou(&self, class: usize) -> Option<f64> {
        let tp = self.true_positives(class);
        let union = tp + self.false_positives(class) + self.false_negatives(class);
        (union > 0).then(|| tp as f64 / union as f64)
    }

    /// Dice coefficient for one class; `None` if the class is absent from
    /// both masks.
    #[must_use]
    pub fn class_dice(&self, class: usize) -> Option<f64> {
        let tp = self.true_positives(class);
        let denom = 2 * tp + self.false_positives(class) + self.false_negatives(class);
        (denom > 0).then(|| (2 * tp) as f64 / denom as f64)
    }

    /// Macro-averaged IoU over present classes.
    #[must_use]
    pub fn macro_iou(&self) -> f64 {
        macro_average((0..self.classes).filter_map(|c| self.class_iou(c)))
    }

    /// Macro-averaged Dice over present classes.
    #[must_use]
    pub fn macro_dice(&self) -> f64 {
        macro_average((0..self.classes).filter_map(|c| self.class_dice(c)))
    }
}

fn macro_average(scores: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = scores.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { 1.0 } else { sum / n as f64 }
}
