//! Split generation command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use seg_fairness::cohort::{Cohort, StandardSplits};

use super::parse_anatomy;

pub fn run(anatomy: &str, csv_file: PathBuf, outdir: PathBuf, seed: u64) -> Result<()> {
    let anatomy = parse_anatomy(anatomy)?;
    let raw = Cohort::load(&csv_file)
        .with_context(|| format!("Failed to load demographics from {}", csv_file.display()))?;
    log::info!("Loaded {} subjects from {}", raw.len(), csv_file.display());

    let splits = StandardSplits::new(anatomy, &outdir).seed(seed);
    let written = splits
        .write(&raw)
        .with_context(|| format!("Failed to write {anatomy} splits"))?;

    println!(
        "Wrote {} files to {}",
        written.len(),
        splits.anatomy_dir().display()
    );
    Ok(())
}
