//! Report summary command.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use seg_fairness::stats::Summary;
use seg_fairness::{BiasMetric, BiasReport, ResultRecord, SegmentationMetric};

pub fn run(input: PathBuf, metric: Option<&str>, json: bool) -> Result<()> {
    let report = BiasReport::load(&input)
        .with_context(|| format!("Failed to load report from {}", input.display()))?;

    let metrics: Vec<SegmentationMetric> = match metric {
        Some(name) => vec![
            SegmentationMetric::from_str_loose(name)
                .ok_or_else(|| anyhow!("unknown metric '{name}' (expected IoU or Dice)"))?,
        ],
        None => SegmentationMetric::all().to_vec(),
    };

    if json {
        let mut summaries: BTreeMap<&str, BTreeMap<&str, Summary>> = BTreeMap::new();
        for (experiment, record) in report.experiments() {
            let entry = summaries.entry(experiment).or_default();
            for metric in &metrics {
                if let Some(summary) = Summary::compute(&partition_values(record, *metric)) {
                    entry.insert(metric.name(), summary);
                }
            }
        }
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    println!("Experiments: {}", report.len());
    for (experiment, record) in report.experiments() {
        println!();
        println!("{experiment}");
        println!("{:-<60}", "");

        for metric in &metrics {
            let scores: Vec<(&str, f64)> = record.partition_scores(*metric).collect();
            if scores.is_empty() {
                continue;
            }
            println!("{metric}:");
            for (partition, value) in &scores {
                println!("  {partition:<24} {value:.4}");
            }

            if let Some(summary) = Summary::compute(&partition_values(record, *metric)) {
                println!(
                    "  range {:.4} .. {:.4}, mean {:.4}",
                    summary.min, summary.max, summary.mean
                );
            }
            for bias in BiasMetric::all() {
                if let Some(value) = record.bias(*metric, *bias) {
                    println!("  {:<24} {value:.4}", bias.name());
                }
            }
        }
    }
    Ok(())
}

fn partition_values(record: &ResultRecord, metric: SegmentationMetric) -> Vec<f64> {
    record.partition_scores(metric).map(|(_, v)| v).collect()
}
