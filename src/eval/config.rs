//! Evaluation configuration.
//!
//! An [`EvalConfig`] names the experiments to compare, the per-sample metrics
//! to compute, and the bias metrics that summarize inter-group disparity. It
//! is built once, with [`EvalConfig::builder`], [`EvalConfig::load`], or
//! [`EvalConfig::preset`], and never changes afterwards.
//!
//! ## JSON format
//!
//! ```json
//! {
//!   "anatomy": "knee",
//!   "protected_attribute": "P02SEX",
//!   "imaging_root": "/data/Knee",
//!   "experiments": [
//!     { "name": "baseline", "model": "/models/KneeBaseline_resnet18/unet_resnet18.pt" },
//!     { "name": "group", "model": { "Male": "/models/m.pt", "Female": "/models/f.pt" } }
//!   ],
//!   "metrics": ["IoU", "Dice"],
//!   "bias_metrics": ["SER", "SD"]
//! }
//! ```
//!
//! A string model is used for every partition; an object assigns one model
//! per partition and evaluates only the partitions it names.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::cohort::ProtectedAttribute;
use crate::error::{Error, Result};
use crate::labels::Anatomy;
use crate::metrics::{BiasMetric, SegmentationMetric};

/// Model artifact(s) for one experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelReference {
    /// One model evaluated on every partition.
    Uniform(PathBuf),
    /// One model per partition key; only the named partitions are evaluated.
    PerGroup(GroupModels),
}

/// Partition key to model artifact, in configuration order.
///
/// Serialized as a JSON object. Keys keep the order they were written in,
/// which is the order groups are evaluated and accumulated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupModels {
    entries: Vec<(String, PathBuf)>,
}

impl GroupModels {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the artifact for `key`, replacing an earlier one in place.
    pub fn insert(&mut self, key: impl Into<String>, artifact: impl Into<PathBuf>) {
        let key = key.into();
        let artifact = artifact.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = artifact,
            None => self.entries.push((key, artifact)),
        }
    }

    /// Artifact for a partition key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Path> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, artifact)| artifact.as_path())
    }

    /// Partition keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// `(key, artifact)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.entries.iter().map(|(k, a)| (k.as_str(), a.as_path()))
    }

    /// Number of groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no group is named.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, P: Into<PathBuf>> FromIterator<(K, P)> for GroupModels {
    fn from_iter<I: IntoIterator<Item = (K, P)>>(iter: I) -> Self {
        let mut groups = Self::new();
        for (key, artifact) in iter {
            groups.insert(key, artifact);
        }
        groups
    }
}

impl Serialize for GroupModels {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, artifact) in &self.entries {
            map.serialize_entry(key, artifact)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for GroupModels {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct GroupModelsVisitor;

        impl<'de> Visitor<'de> for GroupModelsVisitor {
            type Value = GroupModels;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of group value to model path")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<GroupModels, A::Error> {
                let mut groups = GroupModels::new();
                while let Some((key, artifact)) = access.next_entry::<String, PathBuf>()? {
                    if groups.get(&key).is_some() {
                        return Err(serde::de::Error::custom(format!("duplicate group '{key}'")));
                    }
                    groups.insert(key, artifact);
                }
                Ok(groups)
            }
        }

        deserializer.deserialize_map(GroupModelsVisitor)
    }
}

/// A named model configuration to evaluate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experiment {
    /// Experiment name, used as the key in the bias report.
    pub name: String,
    /// Model artifact(s).
    pub model: ModelReference,
}

impl Experiment {
    /// Create an experiment.
    pub fn new(name: impl Into<String>, model: ModelReference) -> Self {
        Self {
            name: name.into(),
            model,
        }
    }
}

/// Immutable bias-evaluation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalConfig {
    anatomy: Anatomy,
    protected_attribute: String,
    #[serde(default = "default_imaging_root")]
    imaging_root: PathBuf,
    experiments: Vec<Experiment>,
    #[serde(default = "default_metrics")]
    metrics: Vec<SegmentationMetric>,
    #[serde(default = "default_bias_metrics")]
    bias_metrics: Vec<BiasMetric>,
}

fn default_imaging_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_metrics() -> Vec<SegmentationMetric> {
    SegmentationMetric::all().to_vec()
}

fn default_bias_metrics() -> Vec<BiasMetric> {
    BiasMetric::all().to_vec()
}

impl EvalConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> EvalConfigBuilder {
        EvalConfigBuilder::default()
    }

    /// Load and validate a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for malformed JSON, unsupported model
    /// reference shapes, or failed validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Parse and validate a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Standard experiment set for one anatomy, attribute, and encoder backbone.
    ///
    /// Artifacts are expected at `{results_root}/{run}/unet_{backbone}.pt`
    /// where `run` follows [`ExperimentKind::run_name`].
    pub fn preset(
        anatomy: Anatomy,
        attribute: ProtectedAttribute,
        backbone: &str,
        results_root: impl AsRef<Path>,
        imaging_root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let results_root = results_root.as_ref();
        let mut builder = Self::builder()
            .anatomy(anatomy)
            .attribute(attribute)
            .imaging_root(imaging_root);
        for kind in ExperimentKind::all() {
            builder = builder.experiment(
                kind.name(),
                kind.model_reference(anatomy, attribute, backbone, results_root),
            );
        }
        builder.build()
    }

    fn validate(&self) -> Result<()> {
        if self.protected_attribute.trim().is_empty() {
            return Err(Error::Config("protected attribute is empty".to_string()));
        }
        if self.experiments.is_empty() {
            return Err(Error::Config("no experiments configured".to_string()));
        }
        if self.metrics.is_empty() {
            return Err(Error::Config("no per-sample metrics configured".to_string()));
        }

        let mut names = HashSet::new();
        for experiment in &self.experiments {
            if !names.insert(experiment.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate experiment name '{}'",
                    experiment.name
                )));
            }
            if let ModelReference::PerGroup(map) = &experiment.model {
                if map.is_empty() {
                    return Err(Error::Config(format!(
                        "experiment '{}' has an empty group map",
                        experiment.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Anatomy under evaluation.
    #[must_use]
    pub fn anatomy(&self) -> Anatomy {
        self.anatomy
    }

    /// Cohort column to partition by.
    #[must_use]
    pub fn protected_attribute(&self) -> &str {
        &self.protected_attribute
    }

    /// Root of the image store.
    #[must_use]
    pub fn imaging_root(&self) -> &Path {
        &self.imaging_root
    }

    /// Experiments in evaluation order.
    #[must_use]
    pub fn experiments(&self) -> &[Experiment] {
        &self.experiments
    }

    /// Per-sample metrics in evaluation order.
    #[must_use]
    pub fn metrics(&self) -> &[SegmentationMetric] {
        &self.metrics
    }

    /// Bias metrics in evaluation order.
    #[must_use]
    pub fn bias_metrics(&self) -> &[BiasMetric] {
        &self.bias_metrics
    }

    /// Write the configuration as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Builder for [`EvalConfig`].
#[derive(Debug, Default)]
pub struct EvalConfigBuilder {
    anatomy: Option<Anatomy>,
    protected_attribute: Option<String>,
    imaging_root: Option<PathBuf>,
    experiments: Vec<Experiment>,
    metrics: Option<Vec<SegmentationMetric>>,
    bias_metrics: Option<Vec<BiasMetric>>,
}

impl EvalConfigBuilder {
    /// Set the anatomy.
    #[must_use]
    pub fn anatomy(mut self, anatomy: Anatomy) -> Self {
        self.anatomy = Some(anatomy);
        self
    }

    /// Set the cohort column to partition by.
    #[must_use]
    pub fn protected_attribute(mut self, column: impl Into<String>) -> Self {
        self.protected_attribute = Some(column.into());
        self
    }

    /// Partition by one of the standard protected attributes.
    #[must_use]
    pub fn attribute(self, attribute: ProtectedAttribute) -> Self {
        self.protected_attribute(attribute.column())
    }

    /// Set the image store root.
    #[must_use]
    pub fn imaging_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.imaging_root = Some(path.into());
        self
    }

    /// Append an experiment.
    #[must_use]
    pub fn experiment(mut self, name: impl Into<String>, model: ModelReference) -> Self {
        self.experiments.push(Experiment::new(name, model));
        self
    }

    /// Set the per-sample metrics (default: IoU, Dice).
    #[must_use]
    pub fn metrics(mut self, metrics: Vec<SegmentationMetric>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set the bias metrics (default: SER, SD).
    #[must_use]
    pub fn bias_metrics(mut self, metrics: Vec<BiasMetric>) -> Self {
        self.bias_metrics = Some(metrics);
        self
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the anatomy or protected attribute is
    /// missing, no experiments or metrics are configured, experiment names
    /// repeat, or a group map is empty.
    pub fn build(self) -> Result<EvalConfig> {
        let config = EvalConfig {
            anatomy: self
                .anatomy
                .ok_or_else(|| Error::Config("anatomy is required".to_string()))?,
            protected_attribute: self
                .protected_attribute
                .ok_or_else(|| Error::Config("protected attribute is required".to_string()))?,
            imaging_root: self.imaging_root.unwrap_or_else(default_imaging_root),
            experiments: self.experiments,
            metrics: self.metrics.unwrap_or_else(default_metrics),
            bias_metrics: self.bias_metrics.unwrap_or_else(default_bias_metrics),
        };
        config.validate()?;
        Ok(config)
    }
}

/// The standard experiment families compared in a fairness study.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentKind {
    /// Trained on the full training split.
    Baseline,
    /// Trained on a split balanced over the attribute.
    Balanced,
    /// Trained with batches stratified on the attribute.
    Stratified,
    /// One model per group, each trained on that group only.
    Group,
}

impl ExperimentKind {
    /// Get all experiment kinds.
    #[must_use]
    pub fn all() -> &'static [Self] {
        &[Self::Baseline, Self::Balanced, Self::Stratified, Self::Group]
    }

    /// Experiment name in the bias report.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Balanced => "balanced",
            Self::Stratified => "stratified",
            Self::Group => "group",
        }
    }

    /// Training run name, e.g. `KneeBalanced_Gender_resnet18`.
    ///
    /// For [`ExperimentKind::Group`] pass the group's directory tag, e.g.
    /// `SexGroup_Male`; other kinds ignore it.
    #[must_use]
    pub fn run_name(
        self,
        anatomy: Anatomy,
        attribute: ProtectedAttribute,
        backbone: &str,
        group_tag: Option<&str>,
    ) -> String {
        let title = anatomy.title();
        match (self, group_tag) {
            (Self::Baseline, _) | (Self::Group, None) => format!("{title}Baseline_{backbone}"),
            (Self::Balanced, _) => {
                format!("{title}Balanced_{}_{backbone}", attribute.experiment_tag())
            }
            (Self::Stratified, _) => {
                format!("{title}Stratified_{}_{backbone}", attribute.experiment_tag())
            }
            (Self::Group, Some(tag)) => format!("{title}Baseline_{tag}_{backbone}"),
        }
    }

    /// Model reference for this experiment under `results_root`.
    #[must_use]
    pub fn model_reference(
        self,
        anatomy: Anatomy,
        attribute: ProtectedAttribute,
        backbone: &str,
        results_root: &Path,
    ) -> ModelReference {
        let artifact = |run: String| results_root.join(run).join(format!("unet_{backbone}.pt"));
        match self {
            Self::Group => ModelReference::PerGroup(
                attribute
                    .groups()
                    .iter()
                    .map(|(value, tag)| {
                        let run = self.run_name(anatomy, attribute, backbone, Some(*tag));
                        ((*value).to_string(), artifact(run))
                    })
                    .collect(),
            ),
            _ => ModelReference::Uniform(artifact(self.run_name(anatomy, attribute, backbone, None))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = EvalConfig::builder()
            .anatomy(Anatomy::Knee)
            .attribute(ProtectedAttribute::Sex)
            .experiment("baseline", ModelReference::Uniform("m.pt".into()))
            .build()
            .unwrap();

        assert_eq!(config.protected_attribute(), "P02SEX");
        assert_eq!(config.metrics(), SegmentationMetric::all());
        assert_eq!(config.bias_metrics(), BiasMetric::all());
        assert_eq!(config.imaging_root(), Path::new("."));
    }

    #[test]
    fn test_builder_validation() {
        let no_experiments = EvalConfig::builder()
            .anatomy(Anatomy::Hip)
            .attribute(ProtectedAttribute::Race)
            .build();
        assert!(matches!(no_experiments, Err(Error::Config(_))));

        let duplicate = EvalConfig::builder()
            .anatomy(Anatomy::Hip)
            .attribute(ProtectedAttribute::Race)
            .experiment("a", ModelReference::Uniform("1.pt".into()))
            .experiment("a", ModelReference::Uniform("2.pt".into()))
            .build();
        assert!(matches!(duplicate, Err(Error::Config(_))));

        let empty_group = EvalConfig::builder()
            .anatomy(Anatomy::Hip)
            .attribute(ProtectedAttribute::Race)
            .experiment("group", ModelReference::PerGroup(GroupModels::new()))
            .build();
        assert!(matches!(empty_group, Err(Error::Config(_))));

        let no_metrics = EvalConfig::builder()
            .anatomy(Anatomy::Hip)
            .attribute(ProtectedAttribute::Race)
            .experiment("a", ModelReference::Uniform("1.pt".into()))
            .metrics(vec![])
            .build();
        assert!(matches!(no_metrics, Err(Error::Config(_))));
    }

    #[test]
    fn test_json_model_references() {
        let config = EvalConfig::from_json(
            r#"{
                "anatomy": "knee",
                "protected_attribute": "P02SEX",
                "experiments": [
                    { "name": "baseline", "model": "base.pt" },
                    { "name": "group", "model": { "Male": "m.pt", "Female": "f.pt" } }
                ],
                "metrics": ["IoU"],
                "bias_metrics": ["SER"]
            }"#,
        )
        .unwrap();

        let experiments = config.experiments();
        assert_eq!(experiments[0].name, "baseline");
        assert_eq!(experiments[0].model, ModelReference::Uniform("base.pt".into()));
        match &experiments[1].model {
            ModelReference::PerGroup(map) => {
                let keys: Vec<&str> = map.keys().collect();
                assert_eq!(keys, vec!["Male", "Female"]);
                assert_eq!(map.get("Female"), Some(Path::new("f.pt")));
            }
            other => panic!("expected per-group reference, got {other:?}"),
        }
        assert_eq!(config.metrics(), &[SegmentationMetric::Iou]);
    }

    #[test]
    fn test_unsupported_model_shape_is_config_error() {
        let result = EvalConfig::from_json(
            r#"{
                "anatomy": "hip",
                "protected_attribute": "P02RACE",
                "experiments": [{ "name": "baseline", "model": 42 }]
            }"#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eval.json");
        let config = EvalConfig::preset(
            Anatomy::Hip,
            ProtectedAttribute::AgeGroup,
            "resnet18",
            "/results",
            "/data/Hip",
        )
        .unwrap();

        config.save(&path).unwrap();
        assert_eq!(EvalConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_preset_paths() {
        let config = EvalConfig::preset(
            Anatomy::Knee,
            ProtectedAttribute::Sex,
            "resnet18",
            "/results",
            "/data/Knee",
        )
        .unwrap();

        let names: Vec<&str> = config.experiments().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["baseline", "balanced", "stratified", "group"]);
        assert_eq!(
            config.experiments()[1].model,
            ModelReference::Uniform("/results/KneeBalanced_Gender_resnet18/unet_resnet18.pt".into())
        );

        let ModelReference::PerGroup(groups) = &config.experiments()[3].model else {
            panic!("group experiment should be per-group");
        };
        assert_eq!(
            groups.get("Male"),
            Some(Path::new("/results/KneeBaseline_SexGroup_Male_resnet18/unet_resnet18.pt"))
        );
        assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["Male", "Female"]);
    }

    #[test]
    fn test_run_names() {
        let run = ExperimentKind::Stratified.run_name(
            Anatomy::Hip,
            ProtectedAttribute::AgeGroup,
            "efficientnet-b0",
            None,
        );
        assert_eq!(run, "HipStratified_Age_efficientnet-b0");

        let run = ExperimentKind::Group.run_name(
            Anatomy::Knee,
            ProtectedAttribute::Race,
            "resnet18",
            Some("RaceGroup_Black"),
        );
        assert_eq!(run, "KneeBaseline_RaceGroup_Black_resnet18");
    }
}
