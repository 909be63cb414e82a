//! Bias report types.
//!
//! A [`BiasReport`] maps each experiment name to a flat [`ResultRecord`] of
//! `"{metric}_{partition}"` and `"{metric}_{bias_metric}"` values. It is
//! serialized as plain JSON: `{experiment: {key: value}}`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::metrics::{BiasMetric, SegmentationMetric};

/// Flat score record for one experiment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultRecord {
    values: BTreeMap<String, f64>,
}

impl ResultRecord {
    /// Create an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Key for a per-partition metric mean.
    #[must_use]
    pub fn partition_key(metric: SegmentationMetric, partition: &str) -> String {
        format!("{}_{partition}", metric.name())
    }

    /// Key for a bias summary of a metric.
    #[must_use]
    pub fn bias_key(metric: SegmentationMetric, bias: BiasMetric) -> String {
        format!("{}_{}", metric.name(), bias.name())
    }

    /// Set a value.
    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        self.values.insert(key.into(), value);
    }

    /// Get a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Mean of `metric` on one partition.
    #[must_use]
    pub fn partition_score(&self, metric: SegmentationMetric, partition: &str) -> Option<f64> {
        self.get(&Self::partition_key(metric, partition))
    }

    /// Bias summary of `metric`.
    #[must_use]
    pub fn bias(&self, metric: SegmentationMetric, bias: BiasMetric) -> Option<f64> {
        self.get(&Self::bias_key(metric, bias))
    }

    /// Per-partition means of `metric`, in key order.
    pub fn partition_scores(
        &self,
        metric: SegmentationMetric,
    ) -> impl Iterator<Item = (&str, f64)> + '_ {
        let prefix = format!("{}_", metric.name());
        self.values.iter().filter_map(move |(key, value)| {
            let partition = key.strip_prefix(&prefix)?;
            let is_bias = BiasMetric::all().iter().any(|b| b.name() == partition);
            (!is_bias).then_some((partition, *value))
        })
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the record is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Result records for every experiment of one evaluation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BiasReport {
    experiments: BTreeMap<String, ResultRecord>,
}

impl BiasReport {
    /// Create an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a completed experiment.
    pub fn insert(&mut self, experiment: impl Into<String>, record: ResultRecord) {
        self.experiments.insert(experiment.into(), record);
    }

    /// Record for one experiment.
    #[must_use]
    pub fn get(&self, experiment: &str) -> Option<&ResultRecord> {
        self.experiments.get(experiment)
    }

    /// Iterate over experiments in name order.
    pub fn experiments(&self) -> impl Iterator<Item = (&str, &ResultRecord)> {
        self.experiments.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of experiments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    /// Check if the report is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Read a report written by [`BiasReport::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
