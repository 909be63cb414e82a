//! Error types for seg-fairness operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for seg-fairness operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during fairness evaluation, splitting, or training.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid or incomplete configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Class id not present in the label catalog.
    #[error("Unknown class id {id} for {anatomy} anatomy")]
    UnknownClass {
        /// Anatomy whose catalog was queried.
        anatomy: String,
        /// The class id that was requested.
        id: u8,
    },

    /// A bias metric has no defined value for the given scores.
    #[error("Degenerate {metric}: {reason}")]
    DegenerateMetric {
        /// Name of the bias metric.
        metric: String,
        /// Why the value is undefined.
        reason: String,
    },

    /// Failed to calculate a segmentation metric.
    #[error("Metric calculation failed: {metric}: {reason}")]
    MetricCalculation {
        /// Name of the metric that failed.
        metric: String,
        /// Reason for the failure.
        reason: String,
    },

    /// Prediction and annotation dimensions don't match.
    #[error("Dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        /// Expected dimensions (width, height).
        expected: (usize, usize),
        /// Actual dimensions (width, height).
        actual: (usize, usize),
    },

    /// Invalid cohort data (duplicate ids, missing columns, bad values).
    #[error("Cohort error: {0}")]
    Cohort(String),

    /// Error reading a cohort CSV.
    #[error("CSV import error at line {line}: {reason}")]
    CsvImport {
        /// Line number where the error occurred.
        line: usize,
        /// Reason for the failure.
        reason: String,
    },

    /// Failed to load an image or annotation file.
    #[error("Image load failed: {path}: {reason}")]
    ImageLoad {
        /// Path to the file that failed to load.
        path: PathBuf,
        /// Reason for the failure.
        reason: String,
    },

    /// Error from a segmentation model while loading or predicting.
    #[error("Model error ({model}): {message}")]
    Model {
        /// Model artifact identifier.
        model: String,
        /// Error message from the model backend.
        message: String,
    },

    /// Error in the training pipeline.
    #[error("Training error: {0}")]
    Training(String),

    /// I/O error wrapper.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
