//! Seeded train/valid/test splits and attribute balancing.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use super::Cohort;
use super::demographics::{ProtectedAttribute, prepare_segmentation_cohort};
use crate::error::{Error, Result};
use crate::labels::Anatomy;

/// Default RNG seed for splits and balancing.
pub const DEFAULT_SEED: u64 = 42;

/// Share of subjects held out of training.
const HOLDOUT_FRACTION: f64 = 0.3;

/// Share of the held-out subjects used for testing.
const TEST_FRACTION: f64 = 0.5;

/// Disjoint training, validation, and test cohorts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSplit {
    /// Training subjects.
    pub train: Cohort,
    /// Validation subjects.
    pub valid: Cohort,
    /// Test subjects.
    pub test: Cohort,
}

/// Split a cohort into train, validation, and test sets by subject id.
///
/// `ceil(0.3 n)` subjects are held out, and `ceil(0.5 m)` of those go to
/// test. Each set keeps the cohort's row order.
///
/// # Errors
///
/// Returns [`Error::Cohort`] if any of the three sets would be empty.
pub fn train_valid_test_split(cohort: &Cohort, seed: u64) -> Result<DataSplit> {
    let mut rng = StdRng::seed_from_u64(seed);

    let mut ids: Vec<&str> = cohort.ids().collect();
    ids.shuffle(&mut rng);
    let (holdout, train) = ids.split_at(holdout_size(ids.len(), HOLDOUT_FRACTION));

    let mut holdout = holdout.to_vec();
    holdout.shuffle(&mut rng);
    let (test, valid) = holdout.split_at(holdout_size(holdout.len(), TEST_FRACTION));

    if train.is_empty() || valid.is_empty() || test.is_empty() {
        return Err(Error::Cohort(format!(
            "cannot split {} subjects into non-empty train/valid/test sets",
            cohort.len()
        )));
    }

    let select = |part: &[&str]| {
        let set: HashSet<&str> = part.iter().copied().collect();
        cohort.select_ids(&set)
    };
    Ok(DataSplit {
        train: select(train),
        valid: select(valid),
        test: select(test),
    })
}

fn holdout_size(n: usize, fraction: f64) -> usize {
    ((n as f64) * fraction).ceil() as usize
}

/// Downsample every group of `column` to the size of the smallest one.
///
/// Groups are sampled without replacement and concatenated in `values` order.
pub fn balance(cohort: &Cohort, column: &str, values: &[&str], seed: u64) -> Result<Cohort> {
    let groups: Vec<Cohort> = values.iter().map(|v| cohort.filter_eq(column, v)).collect();
    let target = groups.iter().map(Cohort::len).min().unwrap_or(0);
    if target == 0 {
        log::warn!("Balancing on {column}: at least one group is empty");
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let sampled: Vec<Cohort> = groups
        .iter()
        .map(|group| {
            let chosen: Vec<_> = group
                .records()
                .choose_multiple(&mut rng, target)
                .cloned()
                .collect();
            Cohort::from_records(group.columns().to_vec(), chosen)
        })
        .collect::<Result<_>>()?;

    let balanced = if sampled.is_empty() {
        cohort.retain(|_| false)
    } else {
        Cohort::concat(&sampled)?
    };
    log::info!(
        "Training set on {column} reduced from {} to {} balanced subjects",
        cohort.len(),
        balanced.len()
    );
    Ok(balanced)
}

/// Per-subgroup split files: `(file tag, optional attribute filter)`.
const SPLIT_GROUPS: &[(&str, Option<(ProtectedAttribute, &str)>)] = &[
    ("all", None),
    ("white", Some((ProtectedAttribute::Race, "White_Caucasian"))),
    ("black", Some((ProtectedAttribute::Race, "Black_AfricanAmerican"))),
    ("male", Some((ProtectedAttribute::Sex, "Male"))),
    ("female", Some((ProtectedAttribute::Sex, "Female"))),
    ("age_50_lower", Some((ProtectedAttribute::AgeGroup, "Age_50_Lower"))),
    ("age_51_64", Some((ProtectedAttribute::AgeGroup, "Age_51_64"))),
    ("age_65_79", Some((ProtectedAttribute::AgeGroup, "Age_65_79"))),
];

/// Balanced training files: `(file tag, attribute)`.
const BALANCED_GROUPS: &[(&str, ProtectedAttribute)] = &[
    ("race", ProtectedAttribute::Race),
    ("gender", ProtectedAttribute::Sex),
    ("age", ProtectedAttribute::AgeGroup),
];

/// Writer for the full set of experiment split files of one anatomy.
///
/// From a raw demographic export it writes, under `{outdir}/{anatomy}/`:
///
/// - `{anatomy}_segmentation.csv`, the normalized cohort
/// - `{anatomy}_{train,valid,test}_{group}.csv` for every subgroup
/// - `{anatomy}_{race,gender,age}_balanced.csv`, balanced from `train_all`
#[derive(Debug, Clone)]
pub struct StandardSplits {
    anatomy: Anatomy,
    outdir: PathBuf,
    seed: u64,
}

impl StandardSplits {
    /// Create a writer for `anatomy` rooted at `outdir`.
    pub fn new(anatomy: Anatomy, outdir: impl Into<PathBuf>) -> Self {
        Self {
            anatomy,
            outdir: outdir.into(),
            seed: DEFAULT_SEED,
        }
    }

    /// Set the RNG seed.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Directory the files are written to.
    #[must_use]
    pub fn anatomy_dir(&self) -> PathBuf {
        self.outdir.join(self.anatomy.to_string())
    }

    fn path(&self, stem: &str) -> PathBuf {
        self.anatomy_dir().join(format!("{}_{stem}.csv", self.anatomy))
    }

    /// Prepare the cohort and write every split file. Returns the paths written.
    ///
    /// # Errors
    ///
    /// Returns an error if the cohort cannot be prepared, a subgroup is too
    /// small to split, or a file cannot be written.
    pub fn write(&self, raw: &Cohort) -> Result<Vec<PathBuf>> {
        let prepared = prepare_segmentation_cohort(raw)?;
        let mut written = Vec::new();

        let segmentation = self.path("segmentation");
        prepared.save(&segmentation)?;
        written.push(segmentation);

        let cohort = prepared.without_excluded(self.anatomy);
        let mut train_all = None;

        for (tag, filter) in SPLIT_GROUPS {
            let subset = match filter {
                Some((attribute, value)) => cohort.filter_eq(attribute.column(), value),
                None => cohort.clone(),
            };
            let split = train_valid_test_split(&subset, self.seed)
                .map_err(|e| Error::Cohort(format!("{} split '{tag}': {e}", self.anatomy)))?;

            let parts = [
                ("train", &split.train),
                ("valid", &split.valid),
                ("test", &split.test),
            ];
            for (part, data) in parts {
                let path = self.path(&format!("{part}_{tag}"));
                data.save(&path)?;
                written.push(path);
            }
            log::info!(
                "{} {tag}: {} train, {} valid, {} test",
                self.anatomy,
                split.train.len(),
                split.valid.len(),
                split.test.len()
            );

            if filter.is_none() {
                train_all = Some(split.train);
            }
        }

        let train_all = train_all.ok_or_else(|| Error::Cohort("no baseline split".to_string()))?;
        for (tag, attribute) in BALANCED_GROUPS {
            let values: Vec<&str> = attribute.values().collect();
            let balanced = balance(&train_all, attribute.column(), &values, self.seed)?;
            let path = self.path(&format!("{tag}_balanced"));
            balanced.save(&path)?;
            written.push(path);
        }

        Ok(written)
    }
}

/// Write the standard split files for `anatomy` under `outdir`.
pub fn write_standard_splits(raw: &Cohort, anatomy: Anatomy, outdir: &Path) -> Result<Vec<PathBuf>> {
    StandardSplits::new(anatomy, outdir).write(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::CohortRecord;

    fn cohort_of(n: usize) -> Cohort {
        let records = (0..n)
            .map(|i| {
                let sex = if i % 2 == 0 { "Male" } else { "Female" };
                CohortRecord::new(format!("{}", 9_100_000 + i), [("P02SEX", sex)])
            })
            .collect();
        Cohort::from_records(vec!["P02SEX".into()], records).unwrap()
    }

    fn raw_export(n: usize) -> Cohort {
        let records = (0..n)
            .map(|i| {
                let sex = if i % 2 == 0 { "1: Male" } else { "2: Female" };
                let race = if (i / 2) % 2 == 0 {
                    "1: White or Caucasian"
                } else {
                    "2: Black or African American"
                };
                let age = ["45", "58", "71"][i % 3];
                CohortRecord::new(
                    format!("{}", 9_200_000 + i),
                    [("P02SEX", sex), ("P02RACE", race), ("V00AGE", age)],
                )
            })
            .collect();
        Cohort::from_records(
            vec!["P02SEX".into(), "P02RACE".into(), "V00AGE".into()],
            records,
        )
        .unwrap()
    }

    #[test]
    fn test_split_sizes() {
        let split = train_valid_test_split(&cohort_of(7), DEFAULT_SEED).unwrap();
        // holdout ceil(2.1) = 3, test ceil(1.5) = 2
        assert_eq!(split.train.len(), 4);
        assert_eq!(split.test.len(), 2);
        assert_eq!(split.valid.len(), 1);
    }

    #[test]
    fn test_split_is_disjoint_and_exhaustive() {
        let cohort = cohort_of(23);
        let split = train_valid_test_split(&cohort, 7).unwrap();
        let mut seen = HashSet::new();
        for part in [&split.train, &split.valid, &split.test] {
            for id in part.ids() {
                assert!(seen.insert(id.to_string()));
            }
        }
        assert_eq!(seen.len(), cohort.len());
    }

    #[test]
    fn test_split_is_deterministic() {
        let cohort = cohort_of(20);
        let a = train_valid_test_split(&cohort, DEFAULT_SEED).unwrap();
        let b = train_valid_test_split(&cohort, DEFAULT_SEED).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_split_too_small() {
        assert!(train_valid_test_split(&cohort_of(3), DEFAULT_SEED).is_err());
        assert!(train_valid_test_split(&cohort_of(4), DEFAULT_SEED).is_ok());
    }

    #[test]
    fn test_balance_equalizes_groups() {
        let mut records: Vec<CohortRecord> = (0..9)
            .map(|i| CohortRecord::new(format!("m{i}"), [("P02SEX", "Male")]))
            .collect();
        records.extend((0..4).map(|i| CohortRecord::new(format!("f{i}"), [("P02SEX", "Female")])));
        let cohort = Cohort::from_records(vec!["P02SEX".into()], records).unwrap();

        let balanced = balance(&cohort, "P02SEX", &["Male", "Female"], DEFAULT_SEED).unwrap();
        assert_eq!(balanced.len(), 8);
        assert_eq!(balanced.filter_eq("P02SEX", "Male").len(), 4);
        assert_eq!(balanced.filter_eq("P02SEX", "Female").len(), 4);
        // value order: males first
        assert_eq!(balanced.records()[0].get("P02SEX"), Some("Male"));
        assert_eq!(balanced.records()[7].get("P02SEX"), Some("Female"));
    }

    #[test]
    fn test_standard_splits_written() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_standard_splits(&raw_export(24), Anatomy::Knee, dir.path()).unwrap();
        assert_eq!(written.len(), 1 + 8 * 3 + 3);
        assert!(written.iter().all(|p| p.exists()));

        let knee_dir = dir.path().join("knee");
        let segmentation = Cohort::load(knee_dir.join("knee_segmentation.csv")).unwrap();
        assert_eq!(segmentation.len(), 24);
        assert!(segmentation.has_column("V00AGE_GROUP"));

        let total: usize = ["train", "valid", "test"]
            .iter()
            .map(|part| {
                Cohort::load(knee_dir.join(format!("knee_{part}_all.csv")))
                    .unwrap()
                    .len()
            })
            .sum();
        assert_eq!(total, 24);

        let male_train = Cohort::load(knee_dir.join("knee_train_male.csv")).unwrap();
        assert!(male_train.records().iter().all(|r| r.get("P02SEX") == Some("Male")));
    }
}
