//! Fairness evaluation.
//!
//! - [`config::EvalConfig`]: experiments, metrics, and protected attribute
//! - [`pipeline::BiasEvaluationPipeline`]: runs the experiments over cohort partitions
//! - [`report`]: per-experiment result records and the bias report

pub mod config;
pub mod pipeline;
pub mod report;

pub use config::{
    EvalConfig, EvalConfigBuilder, Experiment, ExperimentKind, GroupModels, ModelReference,
};
pub use pipeline::BiasEvaluationPipeline;
pub use report::{BiasReport, ResultRecord};
