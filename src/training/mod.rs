//! Training orchestration.
//!
//! [`TrainingPipeline`] loads the train/valid/test split CSVs, batches the
//! training and validation ids, and drives a [`Trainer`] epoch by epoch,
//! keeping the snapshot with the best validation IoU. The network, optimizer,
//! and augmentation live behind the [`Trainer`] trait, which receives the
//! [`TrainingConfig`] before the first epoch.
//!
//! ## Example
//!
//! ```rust,ignore
//! use seg_fairness::training::{Sampling, TrainingConfig, TrainingPipeline};
//! use seg_fairness::Anatomy;
//!
//! let config = TrainingConfig::builder()
//!     .anatomy(Anatomy::Knee)
//!     .backbone("resnet18")
//!     .splits("splits/knee/knee_train_all.csv", "splits/knee/knee_valid_all.csv", "splits/knee/knee_test_all.csv")
//!     .outdir("results")
//!     .build()?;
//!
//! let sampling = Sampling::Stratified { column: "P02SEX".into() };
//! let mut pipeline = TrainingPipeline::new("KneeStratified_Gender_resnet18", config, sampling, my_trainer)?;
//! pipeline.run()?;
//! pipeline.save()?;
//! ```

mod sampler;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::cohort::Cohort;
use crate::error::{Error, Result};
use crate::labels::Anatomy;
use crate::metrics::SegmentationMetric;

pub use sampler::StratifiedSampler;

/// Metric that selects the best snapshot.
const SELECTION_METRIC: SegmentationMetric = SegmentationMetric::Iou;

/// Manifest written next to the saved snapshot.
pub const MANIFEST_FILE: &str = "training.json";

/// Training hyperparameters and data locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Anatomy being segmented; fixes the class count.
    pub anatomy: Anatomy,
    /// U-Net encoder backbone, e.g. `resnet18` or `efficientnet-b0`.
    pub backbone: String,
    /// Training split CSV.
    pub train_set: PathBuf,
    /// Validation split CSV.
    pub valid_set: PathBuf,
    /// Test split CSV.
    pub test_set: PathBuf,
    /// Root of the image store.
    pub imaging_root: PathBuf,
    /// Directory receiving one subdirectory per run.
    pub outdir: PathBuf,
    /// Number of epochs.
    pub epochs: usize,
    /// RNG seed.
    pub seed: u64,
    /// Square input size after resizing.
    pub image_size: usize,
    /// Training batch size.
    pub train_batch_size: usize,
    /// Validation batch size.
    pub eval_batch_size: usize,
    /// Optimizer learning rate.
    pub learning_rate: f64,
    /// Optimizer name.
    pub optimizer: String,
    /// Loss function name.
    pub loss: String,
    /// Input channels.
    pub in_channels: usize,
    /// Pretrained encoder weights.
    pub encoder_weights: Option<String>,
    /// Metrics reported per epoch.
    pub metrics: Vec<SegmentationMetric>,
}

impl TrainingConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> TrainingConfigBuilder {
        TrainingConfigBuilder::default()
    }

    /// Number of output classes.
    #[must_use]
    pub fn class_count(&self) -> usize {
        self.anatomy.catalog().class_count()
    }
}

/// Builder for [`TrainingConfig`].
#[derive(Debug, Default)]
pub struct TrainingConfigBuilder {
    anatomy: Option<Anatomy>,
    backbone: Option<String>,
    splits: Option<(PathBuf, PathBuf, PathBuf)>,
    imaging_root: Option<PathBuf>,
    outdir: Option<PathBuf>,
    epochs: Option<usize>,
    seed: Option<u64>,
    train_batch_size: Option<usize>,
    eval_batch_size: Option<usize>,
    learning_rate: Option<f64>,
    encoder_weights: Option<Option<String>>,
}

impl TrainingConfigBuilder {
    /// Set the anatomy.
    #[must_use]
    pub fn anatomy(mut self, anatomy: Anatomy) -> Self {
        self.anatomy = Some(anatomy);
        self
    }

    /// Set the encoder backbone.
    #[must_use]
    pub fn backbone(mut self, backbone: impl Into<String>) -> Self {
        self.backbone = Some(backbone.into());
        self
    }

    /// Set the train, validation, and test split CSVs.
    #[must_use]
    pub fn splits(
        mut self,
        train: impl Into<PathBuf>,
        valid: impl Into<PathBuf>,
        test: impl Into<PathBuf>,
    ) -> Self {
        self.splits = Some((train.into(), valid.into(), test.into()));
        self
    }

    /// Set the image store root.
    #[must_use]
    pub fn imaging_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.imaging_root = Some(path.into());
        self
    }

    /// Set the output directory.
    #[must_use]
    pub fn outdir(mut self, path: impl Into<PathBuf>) -> Self {
        self.outdir = Some(path.into());
        self
    }

    /// Set the number of epochs.
    #[must_use]
    pub fn epochs(mut self, epochs: usize) -> Self {
        self.epochs = Some(epochs);
        self
    }

    /// Set the RNG seed.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the training batch size.
    #[must_use]
    pub fn train_batch_size(mut self, size: usize) -> Self {
        self.train_batch_size = Some(size);
        self
    }

    /// Set the validation batch size.
    #[must_use]
    pub fn eval_batch_size(mut self, size: usize) -> Self {
        self.eval_batch_size = Some(size);
        self
    }

    /// Set the learning rate.
    #[must_use]
    pub fn learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = Some(lr);
        self
    }

    /// Set pretrained encoder weights (`None` trains from scratch).
    #[must_use]
    pub fn encoder_weights(mut self, weights: Option<String>) -> Self {
        self.encoder_weights = Some(weights);
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the anatomy, backbone, splits, or output
    /// directory is missing, or a size is zero.
    pub fn build(self) -> Result<TrainingConfig> {
        let missing = |field: &str| Error::Config(format!("training {field} is required"));
        let (train_set, valid_set, test_set) = self.splits.ok_or_else(|| missing("splits"))?;
        let config = TrainingConfig {
            anatomy: self.anatomy.ok_or_else(|| missing("anatomy"))?,
            backbone: self.backbone.ok_or_else(|| missing("backbone"))?,
            train_set,
            valid_set,
            test_set,
            imaging_root: self.imaging_root.unwrap_or_else(|| PathBuf::from(".")),
            outdir: self.outdir.ok_or_else(|| missing("outdir"))?,
            epochs: self.epochs.unwrap_or(50),
            seed: self.seed.unwrap_or(42),
            image_size: 224,
            train_batch_size: self.train_batch_size.unwrap_or(16),
            eval_batch_size: self.eval_batch_size.unwrap_or(16),
            learning_rate: self.learning_rate.unwrap_or(5e-4),
            optimizer: "adam".to_string(),
            loss: "cross_entropy".to_string(),
            in_channels: 1,
            encoder_weights: self
                .encoder_weights
                .unwrap_or_else(|| Some("imagenet".to_string())),
            metrics: SegmentationMetric::all().to_vec(),
        };
        if config.epochs == 0 || config.train_batch_size == 0 || config.eval_batch_size == 0 {
            return Err(Error::Config(
                "epochs and batch sizes must be positive".to_string(),
            ));
        }
        Ok(config)
    }
}

/// How training ids are grouped into batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Sampling {
    /// Fixed-size batches in split order.
    Sequential,
    /// Batches stratified on a cohort column.
    Stratified {
        /// Column to stratify on, e.g. `P02SEX`.
        column: String,
    },
}

/// Loss and metric values reported for one epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochLogs {
    /// Mean loss.
    pub loss: f64,
    /// Mean metric values by metric name (`"IoU"`, `"Dice"`).
    pub scores: BTreeMap<String, f64>,
}

impl EpochLogs {
    /// Value of a metric, if reported.
    #[must_use]
    pub fn score(&self, metric: SegmentationMetric) -> Option<f64> {
        self.scores.get(metric.name()).copied()
    }
}

/// Runs training and validation epochs for one model.
pub trait Trainer {
    /// Frozen copy of the model weights.
    type Snapshot;

    /// Build the model and optimizer from the run's hyperparameters.
    ///
    /// Called once by [`TrainingPipeline::new`], before any epoch.
    fn configure(&mut self, config: &TrainingConfig) -> Result<()>;

    /// Train one epoch over `batches` of subject ids.
    fn train_epoch(&mut self, batches: &[Vec<String>]) -> Result<EpochLogs>;

    /// Evaluate the current model on `batches` of validation ids.
    fn valid_epoch(&mut self, batches: &[Vec<String>]) -> Result<EpochLogs>;

    /// Copy the current weights.
    fn snapshot(&self) -> Self::Snapshot;

    /// Persist a snapshot to `path`.
    fn save_snapshot(&self, snapshot: &Self::Snapshot, path: &Path) -> Result<()>;
}

/// Per-epoch record kept by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Training logs.
    pub train: EpochLogs,
    /// Validation logs.
    pub valid: EpochLogs,
}

struct BestSnapshot<S> {
    epoch: usize,
    score: f64,
    snapshot: S,
}

/// Manifest describing a saved training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingManifest {
    /// Run name.
    pub name: String,
    /// Encoder backbone.
    pub backbone: String,
    /// Anatomy.
    pub anatomy: Anatomy,
    /// Batch sampling used.
    pub sampling: Sampling,
    /// Hyperparameters of the run.
    pub config: TrainingConfig,
    /// Epoch of the saved snapshot.
    pub best_epoch: usize,
    /// Validation IoU of the saved snapshot.
    pub best_score: f64,
    /// Epochs run.
    pub epochs: usize,
    /// Saved snapshot file.
    pub artifact: PathBuf,
    /// When the snapshot was saved.
    #[serde(with = "chrono_serde")]
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Epoch loop with best-snapshot retention.
pub struct TrainingPipeline<T: Trainer> {
    name: String,
    config: TrainingConfig,
    sampling: Sampling,
    trainer: T,
    train: Cohort,
    valid: Cohort,
    test: Cohort,
    save_dir: PathBuf,
    history: Vec<EpochRecord>,
    best: Option<BestSnapshot<T::Snapshot>>,
}

impl<T: Trainer> TrainingPipeline<T> {
    /// Load the split CSVs and create `{outdir}/{name}/`.
    ///
    /// # Errors
    ///
    /// Returns an error if a split cannot be loaded, the stratification column
    /// is missing from the training split, or the directory cannot be created.
    pub fn new(
        name: impl Into<String>,
        config: TrainingConfig,
        sampling: Sampling,
        mut trainer: T,
    ) -> Result<Self> {
        let name = name.into();
        if config.train_batch_size == 0 || config.eval_batch_size == 0 {
            return Err(Error::Config("batch sizes must be positive".to_string()));
        }
        let train = Cohort::load(&config.train_set)?;
        let valid = Cohort::load(&config.valid_set)?;
        let test = Cohort::load(&config.test_set)?;

        if let Sampling::Stratified { column } = &sampling {
            if !train.has_column(column) {
                return Err(Error::Training(format!(
                    "cannot stratify on '{column}': not a column of {}",
                    config.train_set.display()
                )));
            }
        }

        let save_dir = config.outdir.join(&name);
        std::fs::create_dir_all(&save_dir)?;
        trainer.configure(&config)?;
        log::info!(
            "{name}: {} train, {} valid, {} test subjects",
            train.len(),
            valid.len(),
            test.len()
        );

        Ok(Self {
            name,
            config,
            sampling,
            trainer,
            train,
            valid,
            test,
            save_dir,
            history: Vec::new(),
            best: None,
        })
    }

    /// Run name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory receiving the snapshot and manifest.
    #[must_use]
    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    /// Hyperparameters of the run.
    #[must_use]
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Held-out test split.
    #[must_use]
    pub fn test_split(&self) -> &Cohort {
        &self.test
    }

    /// Per-epoch logs of the last run.
    #[must_use]
    pub fn history(&self) -> &[EpochRecord] {
        &self.history
    }

    /// Epoch and validation IoU of the retained snapshot.
    #[must_use]
    pub fn best(&self) -> Option<(usize, f64)> {
        self.best.as_ref().map(|b| (b.epoch, b.score))
    }

    /// The trainer.
    pub fn trainer(&self) -> &T {
        &self.trainer
    }

    /// Training batches as subject ids.
    pub fn batches(&self) -> Result<Vec<Vec<String>>> {
        let ids: Vec<String> = self.train.ids().map(String::from).collect();
        match &self.sampling {
            Sampling::Sequential => Ok(ids
                .chunks(self.config.train_batch_size)
                .map(<[String]>::to_vec)
                .collect()),
            Sampling::Stratified { column } => {
                let labels: Vec<&str> = self
                    .train
                    .records()
                    .iter()
                    .map(|r| r.get(column).unwrap_or(""))
                    .collect();
                let sampler = StratifiedSampler::new(&labels, self.config.train_batch_size)?;
                Ok(sampler
                    .into_iter()
                    .map(|batch| batch.into_iter().map(|i| ids[i].clone()).collect())
                    .collect())
            }
        }
    }

    /// Validation ids in batches of `eval_batch_size`, shuffled by `rng`.
    fn valid_batches(&self, rng: &mut StdRng) -> Vec<Vec<String>> {
        let mut ids: Vec<String> = self.valid.ids().map(String::from).collect();
        ids.shuffle(rng);
        ids.chunks(self.config.eval_batch_size)
            .map(<[String]>::to_vec)
            .collect()
    }

    /// Train for the configured number of epochs.
    ///
    /// Validation ids are reshuffled every epoch with an RNG seeded from the
    /// config. After each epoch, the model is snapshotted if its validation IoU
    /// strictly exceeds the best so far (initially 0).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Training`] if the trainer fails or a validation epoch
    /// does not report IoU.
    pub fn run(&mut self) -> Result<()> {
        let batches = self.batches()?;
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        log::info!("{}: {} batches per epoch", self.name, batches.len());

        self.history.clear();
        self.best = None;
        let mut best_score = 0.0;

        for epoch in 1..=self.config.epochs {
            let train = self.trainer.train_epoch(&batches)?;
            let valid_batches = self.valid_batches(&mut rng);
            let valid = self.trainer.valid_epoch(&valid_batches)?;
            let score = valid.score(SELECTION_METRIC).ok_or_else(|| {
                Error::Training(format!(
                    "epoch {epoch}: validation did not report {SELECTION_METRIC}"
                ))
            })?;
            log::info!(
                "{} epoch {epoch}/{}: train loss {:.4}, valid loss {:.4}, valid {SELECTION_METRIC} {score:.4}",
                self.name,
                self.config.epochs,
                train.loss,
                valid.loss
            );

            if score > best_score {
                best_score = score;
                self.best = Some(BestSnapshot {
                    epoch,
                    score,
                    snapshot: self.trainer.snapshot(),
                });
                log::info!("{} epoch {epoch}: new best model", self.name);
            }
            self.history.push(EpochRecord {
                epoch,
                train,
                valid,
            });
        }
        Ok(())
    }

    /// Save the best snapshot to `{outdir}/{name}/unet_{backbone}.pt` and
    /// write the run manifest. Returns the snapshot path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Training`] if no snapshot was retained.
    pub fn save(&self) -> Result<PathBuf> {
        let best = self.best.as_ref().ok_or_else(|| {
            Error::Training(format!("{}: no snapshot to save; run() first", self.name))
        })?;

        let artifact = self
            .save_dir
            .join(format!("unet_{}.pt", self.config.backbone));
        self.trainer.save_snapshot(&best.snapshot, &artifact)?;

        let manifest = TrainingManifest {
            name: self.name.clone(),
            backbone: self.config.backbone.clone(),
            anatomy: self.config.anatomy,
            sampling: self.sampling.clone(),
            config: self.config.clone(),
            best_epoch: best.epoch,
            best_score: best.score,
            epochs: self.history.len(),
            artifact: artifact.clone(),
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_string_pretty(&manifest)?;
        std::fs::write(self.save_dir.join(MANIFEST_FILE), json)?;

        log::info!("Saved {} (epoch {})", artifact.display(), best.epoch);
        Ok(artifact)
    }
}

mod chrono_serde {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        dt.to_rfc3339().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::CohortRecord;

    /// Replays a fixed sequence of validation IoU values.
    struct ScriptedTrainer {
        scores: Vec<f64>,
        epoch: usize,
        learning_rate: Option<f64>,
        seen_batches: Vec<Vec<String>>,
        seen_valid: Vec<Vec<Vec<String>>>,
    }

    impl ScriptedTrainer {
        fn new(scores: &[f64]) -> Self {
            Self {
                scores: scores.to_vec(),
                epoch: 0,
                learning_rate: None,
                seen_batches: Vec::new(),
                seen_valid: Vec::new(),
            }
        }
    }

    impl Trainer for ScriptedTrainer {
        type Snapshot = usize;

        fn configure(&mut self, config: &TrainingConfig) -> Result<()> {
            self.learning_rate = Some(config.learning_rate);
            Ok(())
        }

        fn train_epoch(&mut self, batches: &[Vec<String>]) -> Result<EpochLogs> {
            self.epoch += 1;
            self.seen_batches = batches.to_vec();
            Ok(EpochLogs {
                loss: 1.0 / self.epoch as f64,
                scores: BTreeMap::new(),
            })
        }

        fn valid_epoch(&mut self, batches: &[Vec<String>]) -> Result<EpochLogs> {
            self.seen_valid.push(batches.to_vec());
            let mut scores = BTreeMap::new();
            scores.insert("IoU".to_string(), self.scores[self.epoch - 1]);
            Ok(EpochLogs { loss: 0.5, scores })
        }

        fn snapshot(&self) -> usize {
            self.epoch
        }

        fn save_snapshot(&self, snapshot: &usize, path: &Path) -> Result<()> {
            std::fs::write(path, format!("epoch {snapshot}"))?;
            Ok(())
        }
    }

    fn write_splits(dir: &Path) -> (PathBuf, PathBuf, PathBuf) {
        let split = |prefix: &str, n: usize| {
            let records = (0..n)
                .map(|i| {
                    let sex = if i % 4 == 0 { "Female" } else { "Male" };
                    CohortRecord::new(format!("{prefix}{i}"), [("P02SEX", sex)])
                })
                .collect();
            Cohort::from_records(vec!["P02SEX".into()], records).unwrap()
        };
        let paths = (
            dir.join("train.csv"),
            dir.join("valid.csv"),
            dir.join("test.csv"),
        );
        split("t", 16).save(&paths.0).unwrap();
        split("v", 4).save(&paths.1).unwrap();
        split("x", 4).save(&paths.2).unwrap();
        paths
    }

    fn config(dir: &Path, epochs: usize) -> TrainingConfig {
        let (train, valid, test) = write_splits(dir);
        TrainingConfig::builder()
            .anatomy(Anatomy::Knee)
            .backbone("resnet18")
            .splits(train, valid, test)
            .outdir(dir.join("out"))
            .epochs(epochs)
            .train_batch_size(4)
            .build()
            .unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = TrainingConfig::builder()
            .anatomy(Anatomy::Hip)
            .backbone("efficientnet-b0")
            .splits("a.csv", "b.csv", "c.csv")
            .outdir("out")
            .build()
            .unwrap();
        assert_eq!(config.epochs, 50);
        assert_eq!(config.seed, 42);
        assert_eq!(config.image_size, 224);
        assert_eq!(config.train_batch_size, 16);
        assert_eq!(config.eval_batch_size, 16);
        assert!((config.learning_rate - 5e-4).abs() < f64::EPSILON);
        assert_eq!(config.in_channels, 1);
        assert_eq!(config.encoder_weights.as_deref(), Some("imagenet"));
        assert_eq!(config.metrics, SegmentationMetric::all());
        assert_eq!(config.class_count(), 7);
    }

    #[test]
    fn test_config_requires_backbone() {
        let result = TrainingConfig::builder()
            .anatomy(Anatomy::Hip)
            .splits("a.csv", "b.csv", "c.csv")
            .outdir("out")
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_best_snapshot_requires_strict_improvement() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = ScriptedTrainer::new(&[0.5, 0.7, 0.7, 0.6]);
        let mut pipeline =
            TrainingPipeline::new("KneeBaseline_resnet18", config(dir.path(), 4), Sampling::Sequential, trainer)
                .unwrap();

        pipeline.run().unwrap();
        assert_eq!(pipeline.best(), Some((2, 0.7)));
        assert_eq!(pipeline.history().len(), 4);
    }

    #[test]
    fn test_zero_scores_keep_no_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = ScriptedTrainer::new(&[0.0, 0.0]);
        let mut pipeline =
            TrainingPipeline::new("run", config(dir.path(), 2), Sampling::Sequential, trainer).unwrap();

        pipeline.run().unwrap();
        assert_eq!(pipeline.best(), None);
        assert!(matches!(pipeline.save(), Err(Error::Training(_))));
    }

    #[test]
    fn test_save_writes_snapshot_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = ScriptedTrainer::new(&[0.2, 0.4, 0.3]);
        let mut pipeline =
            TrainingPipeline::new("KneeBaseline_resnet18", config(dir.path(), 3), Sampling::Sequential, trainer)
                .unwrap();
        assert!(pipeline.save_dir().is_dir());

        pipeline.run().unwrap();
        let artifact = pipeline.save().unwrap();

        assert_eq!(
            artifact,
            dir.path().join("out").join("KneeBaseline_resnet18").join("unet_resnet18.pt")
        );
        assert_eq!(std::fs::read_to_string(&artifact).unwrap(), "epoch 2");

        let manifest: TrainingManifest = serde_json::from_str(
            &std::fs::read_to_string(pipeline.save_dir().join(MANIFEST_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest.best_epoch, 2);
        assert_eq!(manifest.epochs, 3);
        assert_eq!(manifest.backbone, "resnet18");
        assert_eq!(&manifest.config, pipeline.config());
    }

    #[test]
    fn test_sequential_batches() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = TrainingPipeline::new(
            "run",
            config(dir.path(), 1),
            Sampling::Sequential,
            ScriptedTrainer::new(&[0.1]),
        )
        .unwrap();

        let batches = pipeline.batches().unwrap();
        assert_eq!(batches.len(), 4);
        assert_eq!(batches[0], vec!["t0", "t1", "t2", "t3"]);
    }

    #[test]
    fn test_stratified_batches_reach_trainer() {
        let dir = tempfile::tempdir().unwrap();
        let sampling = Sampling::Stratified {
            column: "P02SEX".to_string(),
        };
        let mut pipeline = TrainingPipeline::new(
            "run",
            config(dir.path(), 1),
            sampling,
            ScriptedTrainer::new(&[0.1]),
        )
        .unwrap();
        pipeline.run().unwrap();

        // 4 Female (t0, t4, t8, t12) spread one per batch
        let batches = &pipeline.trainer().seen_batches;
        assert_eq!(batches.len(), 4);
        for batch in batches {
            assert_eq!(batch.len(), 4);
            let females = batch.iter().filter(|id| ["t0", "t4", "t8", "t12"].contains(&id.as_str())).count();
            assert_eq!(females, 1);
        }
    }

    #[test]
    fn test_stratify_column_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let sampling = Sampling::Stratified {
            column: "V00AGE_GROUP".to_string(),
        };
        let result = TrainingPipeline::new(
            "run",
            config(dir.path(), 1),
            sampling,
            ScriptedTrainer::new(&[0.1]),
        );
        assert!(matches!(result, Err(Error::Training(_))));
    }

    #[test]
    fn test_trainer_is_configured_before_training() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), 1);
        config.learning_rate = 1e-3;
        let pipeline =
            TrainingPipeline::new("run", config, Sampling::Sequential, ScriptedTrainer::new(&[0.1])).unwrap();

        assert_eq!(pipeline.trainer().learning_rate, Some(1e-3));
        assert_eq!(pipeline.trainer().epoch, 0);
    }

    #[test]
    fn test_validation_batched_by_eval_batch_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), 2);
        config.eval_batch_size = 3;
        let mut pipeline =
            TrainingPipeline::new("run", config, Sampling::Sequential, ScriptedTrainer::new(&[0.1, 0.2]))
                .unwrap();
        pipeline.run().unwrap();

        let seen = &pipeline.trainer().seen_valid;
        assert_eq!(seen.len(), 2);
        for batches in seen {
            let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
            assert_eq!(sizes, vec![3, 1]);
            let mut ids: Vec<&str> = batches.iter().flatten().map(String::as_str).collect();
            ids.sort_unstable();
            assert_eq!(ids, vec!["v0", "v1", "v2", "v3"]);
        }
    }
}
