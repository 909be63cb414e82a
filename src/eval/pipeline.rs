//! Bias evaluation pipeline.
//!
//! [`BiasEvaluationPipeline`] runs every configured experiment over the
//! partitions of a cohort and collects a [`BiasReport`]. The caller supplies
//! the sample source and model loader; the pipeline owns scoring, averaging,
//! and the cross-partition bias summaries.

use std::path::{Path, PathBuf};

use crate::cohort::{Cohort, Partition};
use crate::dataset::{PngImageStore, SampleSource};
use crate::error::{Error, Result};
use crate::eval::config::{EvalConfig, Experiment, ModelReference};
use crate::eval::report::{BiasReport, ResultRecord};
use crate::metrics::{BiasMetric, ConfusionMatrix};
use crate::model::{ModelLoader, SegmentationModel};
use crate::stats::{Summary, mean};

/// Fairness evaluation of several models across protected-attribute groups.
///
/// # Example
///
/// ```rust,ignore
/// use seg_fairness::{BiasEvaluationPipeline, Cohort, EvalConfig, PredictionDirLoader};
///
/// let config = EvalConfig::load("sex_resnet18.json")?;
/// let cohort = Cohort::load("Knee_segmentation.csv")?;
/// let loader = PredictionDirLoader::new(config.anatomy().catalog().class_count());
///
/// let mut pipeline =
///     BiasEvaluationPipeline::with_png_store(&cohort, "FairnessSex_Resnet18_Knee", config, loader)?;
/// pipeline.evaluate_bias()?;
/// pipeline.save("results")?;
/// ```
pub struct BiasEvaluationPipeline {
    name: String,
    config: EvalConfig,
    partitions: Vec<Partition>,
    source: Box<dyn SampleSource>,
    loader: Box<dyn ModelLoader>,
    report: Option<BiasReport>,
}

impl BiasEvaluationPipeline {
    /// Create a pipeline.
    ///
    /// The anatomy's excluded subjects are dropped and the remaining cohort is
    /// partitioned by the configured protected attribute.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cohort`] if the cohort cannot be partitioned by the
    /// protected attribute, or a group value collides with a bias metric name
    /// (`SER`, `SD`) in the report keys.
    pub fn new(
        cohort: &Cohort,
        name: impl Into<String>,
        config: EvalConfig,
        source: impl SampleSource + 'static,
        loader: impl ModelLoader + 'static,
    ) -> Result<Self> {
        let partitions = cohort
            .without_excluded(config.anatomy())
            .partition_by(config.protected_attribute())?;
        if let Some(partition) = partitions
            .iter()
            .find(|p| BiasMetric::all().iter().any(|b| b.name() == p.key))
        {
            return Err(Error::Cohort(format!(
                "{} value '{}' is reserved for bias metric keys",
                config.protected_attribute(),
                partition.key
            )));
        }
        let sizes: Vec<String> = partitions
            .iter()
            .map(|p| format!("{}={}", p.key, p.len()))
            .collect();
        log::info!(
            "Partitioned {} by {}: {}",
            config.anatomy(),
            config.protected_attribute(),
            sizes.join(", ")
        );

        Ok(Self {
            name: name.into(),
            config,
            partitions,
            source: Box::new(source),
            loader: Box::new(loader),
            report: None,
        })
    }

    /// Create a pipeline reading samples from the PNG store at the configured
    /// imaging root.
    pub fn with_png_store(
        cohort: &Cohort,
        name: impl Into<String>,
        config: EvalConfig,
        loader: impl ModelLoader + 'static,
    ) -> Result<Self> {
        let store = PngImageStore::new(config.imaging_root());
        Self::new(cohort, name, config, store, loader)
    }

    /// Run name, used for the output file.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Cohort partitions in evaluation order.
    #[must_use]
    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// The report of the last completed run.
    #[must_use]
    pub fn report(&self) -> Option<&BiasReport> {
        self.report.as_ref()
    }

    /// Evaluate every experiment and build the bias report.
    ///
    /// Any error aborts the whole run; the previous report, if any, is
    /// discarded and nothing partial is kept.
    pub fn evaluate_bias(&mut self) -> Result<&BiasReport> {
        self.report = None;

        let mut report = BiasReport::new();
        for experiment in self.config.experiments() {
            log::info!("Evaluating {}", experiment.name);
            let record = self.evaluate_experiment(experiment)?;
            report.insert(experiment.name.clone(), record);
        }

        Ok(&*self.report.insert(report))
    }

    fn evaluate_experiment(&self, experiment: &Experiment) -> Result<ResultRecord> {
        let metrics = self.config.metrics();
        let mut record = ResultRecord::new();
        // per metric, per-partition means in evaluation order
        let mut accumulated: Vec<Vec<f64>> = vec![Vec::new(); metrics.len()];

        let mut record_partition = |partition: &Partition, means: Vec<f64>| {
            for ((metric, value), slot) in metrics.iter().zip(means).zip(&mut accumulated) {
                record.insert(ResultRecord::partition_key(*metric, &partition.key), value);
                slot.push(value);
            }
        };

        match &experiment.model {
            ModelReference::Uniform(artifact) => {
                let model = self.load_model(artifact)?;
                for partition in &self.partitions {
                    let means = self.evaluate_partition(model.as_ref(), partition)?;
                    record_partition(partition, means);
                }
            }
            ModelReference::PerGroup(artifacts) => {
                let runs = artifacts
                    .iter()
                    .map(|(key, artifact)| {
                        self.find_partition(&experiment.name, key)
                            .map(|partition| (partition, artifact))
                    })
                    .collect::<Result<Vec<_>>>()?;
                if runs.len() < self.partitions.len() {
                    log::warn!(
                        "{}: {} of {} partitions have no group model and are skipped",
                        experiment.name,
                        self.partitions.len() - runs.len(),
                        self.partitions.len()
                    );
                }
                for (partition, artifact) in runs {
                    let model = self.load_model(artifact)?;
                    let means = self.evaluate_partition(model.as_ref(), partition)?;
                    record_partition(partition, means);
                }
            }
        }

        for bias in self.config.bias_metrics() {
            for (metric, values) in metrics.iter().zip(&accumulated) {
                let value = bias.compute(values)?;
                log::info!("{}: {}_{} = {value:.4}", experiment.name, metric, bias);
                record.insert(ResultRecord::bias_key(*metric, *bias), value);
            }
        }

        Ok(record)
    }

    fn find_partition(&self, experiment: &str, key: &str) -> Result<&Partition> {
        self.partitions
            .iter()
            .find(|p| p.key == key)
            .ok_or_else(|| {
                Error::Config(format!(
                    "experiment '{experiment}' names group '{key}', not a value of {} in the cohort",
                    self.config.protected_attribute()
                ))
            })
    }

    fn load_model(&self, artifact: &Path) -> Result<Box<dyn SegmentationModel>> {
        log::debug!("Loading model {}", artifact.display());
        self.loader.load(artifact)
    }

    /// Mean of each configured metric over one partition's samples.
    fn evaluate_partition(
        &self,
        model: &dyn SegmentationModel,
        partition: &Partition,
    ) -> Result<Vec<f64>> {
        let metrics = self.config.metrics();
        let classes = self.config.anatomy().catalog().class_count();
        let mut scores: Vec<Vec<f64>> = vec![Vec::with_capacity(partition.len()); metrics.len()];

        for id in partition.ids() {
            let sample = self.source.load(id)?;
            let output = model.predict(&sample)?;
            if output.dimensions() != sample.dimensions() {
                return Err(Error::DimensionMismatch {
                    expected: sample.dimensions(),
                    actual: output.dimensions(),
                });
            }

            let predicted = output.predict_labels();
            let confusion =
                ConfusionMatrix::from_masks(sample.mask.as_ref(), predicted.as_ref(), classes)?;
            for (metric, slot) in metrics.iter().zip(&mut scores) {
                let score = metric.score(&confusion);
                log::debug!("{} {id}: {metric} = {score:.4}", partition.key);
                slot.push(score);
            }
        }

        for (metric, values) in metrics.iter().zip(&scores) {
            if let Some(summary) = Summary::compute(values) {
                log::info!(
                    "{} {}: mean {:.4}, std {:.4}, min {:.4}, max {:.4} (n={})",
                    partition.key,
                    metric,
                    summary.mean,
                    summary.std_dev,
                    summary.min,
                    summary.max,
                    summary.count
                );
            }
        }

        Ok(scores.iter().map(|values| mean(values)).collect())
    }

    /// Write the report to `{dir}/{name}.json`, creating `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if [`Self::evaluate_bias`] has not completed.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let report = self.report.as_ref().ok_or_else(|| {
            Error::Config(format!("no completed evaluation to save for {}", self.name))
        })?;
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.json", self.name));
        report.save(&path)?;
        log::info!("Wrote {}", path.display());
        Ok(path)
    }
}

impl std::fmt::Debug for BiasEvaluationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BiasEvaluationPipeline")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("partitions", &self.partitions.len())
            .field("completed", &self.report.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use imgref::ImgVec;

    use super::*;
    use crate::cohort::CohortRecord;
    use crate::dataset::{InMemorySource, Sample};
    use crate::labels::Anatomy;
    use crate::metrics::{BiasMetric, SegmentationMetric};
    use crate::model::ClassScores;

    /// Predicts the class stored in each image pixel.
    struct EchoModel;

    impl SegmentationModel for EchoModel {
        fn predict(&self, sample: &Sample) -> Result<ClassScores> {
            let labels: Vec<u8> = sample.image.pixels().map(|v| v as u8).collect();
            let (width, height) = sample.dimensions();
            ClassScores::one_hot(&ImgVec::new(labels, width, height), 9)
        }
    }

    /// Two-class sample with `per_class` pixels of each class and `flips`
    /// mistakes each way, giving IoU `(n - f) / (n + f)` for both classes.
    fn subject(id: &str, per_class: usize, flips: usize) -> Sample {
        let mask: Vec<u8> = (0..2 * per_class).map(|i| u8::from(i >= per_class)).collect();
        let image: Vec<f32> = mask
            .iter()
            .enumerate()
            .map(|(i, &label)| {
                let flipped = if label == 0 { i < flips } else { i - per_class < flips };
                f32::from(if flipped { 1 - label } else { label })
            })
            .collect();
        Sample::new(
            id,
            ImgVec::new(image, 2 * per_class, 1),
            ImgVec::new(mask, 2 * per_class, 1),
        )
        .unwrap()
    }

    fn cohort() -> Cohort {
        let records = [("a1", "Male"), ("a2", "Male"), ("b1", "Female"), ("b2", "Female")]
            .iter()
            .map(|(id, sex)| CohortRecord::new(*id, [("P02SEX", *sex)]))
            .collect();
        Cohort::from_records(vec!["P02SEX".into()], records).unwrap()
    }

    fn source() -> InMemorySource {
        [
            subject("a1", 19, 1),
            subject("a2", 19, 1),
            subject("b1", 17, 3),
            subject("b2", 17, 3),
        ]
        .into_iter()
        .collect()
    }

    fn echo_loader(calls: Rc<Cell<usize>>) -> impl ModelLoader + 'static {
        move |artifact: &Path| -> Result<Box<dyn SegmentationModel>> {
            calls.set(calls.get() + 1);
            if artifact.to_str() == Some("missing.pt") {
                return Err(Error::Model {
                    model: artifact.display().to_string(),
                    message: "not found".to_string(),
                });
            }
            Ok(Box::new(EchoModel))
        }
    }

    fn config(experiments: Vec<(&str, ModelReference)>) -> EvalConfig {
        let mut builder = EvalConfig::builder()
            .anatomy(Anatomy::Knee)
            .protected_attribute("P02SEX");
        for (name, model) in experiments {
            builder = builder.experiment(name, model);
        }
        builder.build().unwrap()
    }

    fn per_group(keys: &[&str]) -> ModelReference {
        ModelReference::PerGroup(keys.iter().map(|k| (*k, format!("{k}.pt"))).collect())
    }

    #[test]
    fn test_end_to_end_scores() {
        let _ = env_logger::builder().is_test(true).try_init();
        let config = config(vec![("baseline", ModelReference::Uniform("base.pt".into()))]);
        let calls = Rc::new(Cell::new(0));
        let mut pipeline =
            BiasEvaluationPipeline::new(&cohort(), "run", config, source(), echo_loader(calls)).unwrap();

        let report = pipeline.evaluate_bias().unwrap();
        let record = report.get("baseline").unwrap();

        let iou_male = record.get("IoU_Male").unwrap();
        let iou_female = record.get("IoU_Female").unwrap();
        assert!((iou_male - 0.9).abs() < 1e-9);
        assert!((iou_female - 0.7).abs() < 1e-9);
        assert!((record.get("IoU_SER").unwrap() - 3.0).abs() < 1e-9);
        assert!((record.get("IoU_SD").unwrap() - 0.1).abs() < 1e-9);

        // Dice: 2*18/38 and 2*14/34
        assert!((record.get("Dice_Male").unwrap() - 36.0 / 38.0).abs() < 1e-9);
        assert!((record.get("Dice_Female").unwrap() - 28.0 / 34.0).abs() < 1e-9);
    }

    #[test]
    fn test_uniform_reference_covers_every_partition() {
        let config = config(vec![("baseline", ModelReference::Uniform("base.pt".into()))]);
        let mut pipeline = BiasEvaluationPipeline::new(
            &cohort(),
            "run",
            config,
            source(),
            echo_loader(Rc::new(Cell::new(0))),
        )
        .unwrap();

        let record = pipeline.evaluate_bias().unwrap().get("baseline").unwrap().clone();
        for metric in SegmentationMetric::all() {
            assert_eq!(record.partition_scores(*metric).count(), 2);
            for bias in BiasMetric::all() {
                assert!(record.bias(*metric, *bias).is_some());
            }
        }
        // k partitions * m metrics + bias metrics * m metrics
        assert_eq!(record.len(), 2 * 2 + 2 * 2);
    }

    #[test]
    fn test_per_group_reference_covers_named_partitions_only() {
        let config = config(vec![("group", per_group(&["Male"]))]);
        let mut pipeline = BiasEvaluationPipeline::new(
            &cohort(),
            "run",
            config,
            source(),
            echo_loader(Rc::new(Cell::new(0))),
        )
        .unwrap();

        let report = pipeline.evaluate_bias().unwrap();
        let record = report.get("group").unwrap();
        assert!(record.get("IoU_Male").is_some());
        assert!(record.get("IoU_Female").is_none());
        assert_eq!(record.get("IoU_SER"), Some(1.0));
        assert_eq!(record.get("IoU_SD"), Some(0.0));
    }

    #[test]
    fn test_loader_calls() {
        let calls = Rc::new(Cell::new(0));
        let config = config(vec![
            ("baseline", ModelReference::Uniform("base.pt".into())),
            ("group", per_group(&["Female", "Male"])),
        ]);
        let mut pipeline =
            BiasEvaluationPipeline::new(&cohort(), "run", config, source(), echo_loader(Rc::clone(&calls)))
                .unwrap();

        pipeline.evaluate_bias().unwrap();
        // one load for the uniform model, one per group
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_unknown_group_is_config_error() {
        let config = config(vec![("group", per_group(&["Male", "Unknown"]))]);
        let calls = Rc::new(Cell::new(0));
        let mut pipeline =
            BiasEvaluationPipeline::new(&cohort(), "run", config, source(), echo_loader(Rc::clone(&calls)))
                .unwrap();

        assert!(matches!(pipeline.evaluate_bias(), Err(Error::Config(_))));
        assert_eq!(calls.get(), 0);
        assert!(pipeline.report().is_none());
    }

    #[test]
    fn test_failure_leaves_no_partial_report() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(vec![
            ("baseline", ModelReference::Uniform("base.pt".into())),
            ("broken", ModelReference::Uniform("missing.pt".into())),
        ]);
        let mut pipeline = BiasEvaluationPipeline::new(
            &cohort(),
            "run",
            config,
            source(),
            echo_loader(Rc::new(Cell::new(0))),
        )
        .unwrap();

        assert!(matches!(pipeline.evaluate_bias(), Err(Error::Model { .. })));
        assert!(pipeline.report().is_none());
        assert!(pipeline.save(dir.path()).is_err());
        assert!(!dir.path().join("run.json").exists());
    }

    #[test]
    fn test_save_writes_run_json() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(vec![("baseline", ModelReference::Uniform("base.pt".into()))]);
        let mut pipeline = BiasEvaluationPipeline::new(
            &cohort(),
            "FairnessSex_Test",
            config,
            source(),
            echo_loader(Rc::new(Cell::new(0))),
        )
        .unwrap();
        pipeline.evaluate_bias().unwrap();

        let path = pipeline.save(dir.path().join("results")).unwrap();
        assert_eq!(path, dir.path().join("results").join("FairnessSex_Test.json"));
        let loaded = BiasReport::load(&path).unwrap();
        assert_eq!(Some(&loaded), pipeline.report());
    }

    #[test]
    fn test_missing_sample_aborts_run() {
        let records = vec![
            CohortRecord::new("a1", [("P02SEX", "Male")]),
            CohortRecord::new("zz", [("P02SEX", "Male")]),
        ];
        let cohort = Cohort::from_records(vec!["P02SEX".into()], records).unwrap();
        let config = config(vec![("baseline", ModelReference::Uniform("base.pt".into()))]);
        let mut pipeline =
            BiasEvaluationPipeline::new(&cohort, "run", config, source(), echo_loader(Rc::new(Cell::new(0))))
                .unwrap();

        assert!(matches!(pipeline.evaluate_bias(), Err(Error::ImageLoad { .. })));
    }

    #[test]
    fn test_excluded_subjects_are_not_partitioned() {
        let records = vec![
            CohortRecord::new("a1", [("P02SEX", "Male")]),
            CohortRecord::new("9025994", [("P02SEX", "Female")]),
        ];
        let cohort = Cohort::from_records(vec!["P02SEX".into()], records).unwrap();
        let config = config(vec![("baseline", ModelReference::Uniform("base.pt".into()))]);
        let pipeline =
            BiasEvaluationPipeline::new(&cohort, "run", config, source(), echo_loader(Rc::new(Cell::new(0))))
                .unwrap();

        assert_eq!(pipeline.partitions().len(), 1);
        assert_eq!(pipeline.partitions()[0].key, "Male");
    }

    #[test]
    fn test_group_named_like_bias_metric_is_rejected() {
        let records = vec![
            CohortRecord::new("a1", [("P02SEX", "Male")]),
            CohortRecord::new("b1", [("P02SEX", "SD")]),
        ];
        let cohort = Cohort::from_records(vec!["P02SEX".into()], records).unwrap();
        let config = config(vec![("baseline", ModelReference::Uniform("base.pt".into()))]);
        let result =
            BiasEvaluationPipeline::new(&cohort, "run", config, source(), echo_loader(Rc::new(Cell::new(0))));

        assert!(matches!(result, Err(Error::Cohort(msg)) if msg.contains("'SD'")));
    }

    #[test]
    fn test_group_models_load_in_config_order() {
        let loaded = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&loaded);
        let loader = move |artifact: &Path| -> Result<Box<dyn SegmentationModel>> {
            seen.borrow_mut().push(artifact.display().to_string());
            Ok(Box::new(EchoModel))
        };
        let config = config(vec![("group", per_group(&["Male", "Female"]))]);
        let mut pipeline = BiasEvaluationPipeline::new(&cohort(), "run", config, source(), loader).unwrap();
        pipeline.evaluate_bias().unwrap();

        assert_eq!(*loaded.borrow(), vec!["Male.pt", "Female.pt"]);
    }
}
