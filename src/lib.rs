//! # seg-fairness
//!
//! Demographic fairness evaluation for knee and hip radiograph segmentation
//! models.
//!
//! The library partitions a subject cohort by a protected attribute (sex,
//! race, or age group), runs each trained model over every partition, scores
//! the predictions with macro IoU and Dice, and summarizes the spread across
//! groups with bias metrics (skewed error ratio, standard deviation). Models
//! are opaque: callers plug them in through [`ModelLoader`] and
//! [`SegmentationModel`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use seg_fairness::{
//!     Anatomy, BiasEvaluationPipeline, Cohort, EvalConfig, PredictionDirLoader, ProtectedAttribute,
//! };
//!
//! let config = EvalConfig::preset(
//!     Anatomy::Knee,
//!     ProtectedAttribute::Sex,
//!     "resnet18",
//!     "/results",
//!     "/data/Knee",
//! )?;
//! let cohort = Cohort::load("/data/Knee/Knee_segmentation.csv")?;
//! let loader = PredictionDirLoader::new(Anatomy::Knee.catalog().class_count());
//!
//! let mut pipeline =
//!     BiasEvaluationPipeline::with_png_store(&cohort, "FairnessSex_Resnet18_Knee", config, loader)?;
//! let report = pipeline.evaluate_bias()?;
//! println!("{:?}", report.get("baseline"));
//! pipeline.save("results")?;
//! ```
//!
//! ## Modules
//!
//! - [`error`]: Error types for the library
//! - [`labels`]: Per-anatomy class catalogs
//! - [`metrics`]: Confusion matrices, IoU/Dice, and bias metrics
//! - [`dataset`]: Image and annotation access by subject id
//! - [`model`]: Segmentation model seam
//! - [`cohort`]: Demographic cohorts, partitions, splits, and balancing
//! - [`eval`]: Evaluation config, bias pipeline, and reports
//! - [`training`]: Epoch orchestration and stratified batching
//! - [`stats`]: Descriptive statistics

pub mod cohort;
pub mod dataset;
pub mod error;
pub mod eval;
pub mod labels;
pub mod metrics;
pub mod model;
pub mod stats;
pub mod training;

// Re-export commonly used types
pub use cohort::{AgeGroup, Cohort, CohortRecord, DataSplit, Partition, ProtectedAttribute};
pub use dataset::{InMemorySource, PngImageStore, Sample, SampleSource};
pub use error::{Error, Result};
pub use eval::{
    BiasEvaluationPipeline, BiasReport, EvalConfig, Experiment, ExperimentKind, GroupModels,
    ModelReference, ResultRecord,
};
pub use labels::{Anatomy, LabelCatalog};
pub use metrics::{BiasMetric, ConfusionMatrix, SegmentationMetric};
pub use model::{ClassScores, ModelLoader, PredictionDirLoader, SegmentationModel};
pub use stats::Summary;
pub use training::{Sampling, StratifiedSampler, Trainer, TrainingConfig, TrainingPipeline};
