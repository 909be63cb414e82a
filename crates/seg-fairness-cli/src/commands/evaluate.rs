//! Bias evaluation command.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use seg_fairness::{
    BiasEvaluationPipeline, Cohort, EvalConfig, PredictionDirLoader, ProtectedAttribute,
};

use super::parse_anatomy;

/// Arguments of the `evaluate` subcommand.
pub struct Args {
    pub cohort: PathBuf,
    pub name: String,
    pub output: PathBuf,
    pub config: Option<PathBuf>,
    pub anatomy: String,
    pub attribute: Option<String>,
    pub backbone: Option<String>,
    pub models: Option<PathBuf>,
    pub images: Option<PathBuf>,
}

pub fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    let cohort = Cohort::load(&args.cohort)
        .with_context(|| format!("Failed to load cohort from {}", args.cohort.display()))?;

    // Artifacts are directories of precomputed `{id}.png` predictions.
    let loader = PredictionDirLoader::new(config.anatomy().catalog().class_count());
    let mut pipeline = BiasEvaluationPipeline::with_png_store(&cohort, &args.name, config, loader)
        .context("Failed to set up evaluation")?;

    let report = pipeline
        .evaluate_bias()
        .with_context(|| format!("Evaluation {} failed", args.name))?;
    println!("Evaluated {} experiments", report.len());

    let path = pipeline
        .save(&args.output)
        .with_context(|| format!("Failed to write report to {}", args.output.display()))?;
    println!("Report written to: {}", path.display());
    Ok(())
}

fn load_config(args: &Args) -> Result<EvalConfig> {
    if let Some(path) = &args.config {
        let config = EvalConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?;
        if let Some(images) = &args.images {
            log::warn!(
                "--images {} ignored; the config sets imaging_root {}",
                images.display(),
                config.imaging_root().display()
            );
        }
        return Ok(config);
    }

    let anatomy = parse_anatomy(&args.anatomy)?;
    let attribute = args
        .attribute
        .as_deref()
        .ok_or_else(|| anyhow!("--attribute is required without --config"))?;
    let attribute = ProtectedAttribute::from_str_loose(attribute)
        .ok_or_else(|| anyhow!("unknown attribute '{attribute}' (expected sex, race, or age)"))?;
    let backbone = args
        .backbone
        .as_deref()
        .ok_or_else(|| anyhow!("--backbone is required without --config"))?;
    let models = args
        .models
        .as_ref()
        .ok_or_else(|| anyhow!("--models is required without --config"))?;
    let images = args.images.clone().unwrap_or_else(|| PathBuf::from("."));

    EvalConfig::preset(anatomy, attribute, backbone, models, images)
        .context("Failed to build preset config")
}
