//! Stratified batch sampling.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Batches that each hold roughly the cohort's proportion of every label.
///
/// With `k = n / batch_size` folds, samples of each label are dealt to folds
/// in dataset order so that fold sizes differ by at most one and every fold
/// keeps the label proportions. Each fold becomes one batch, with indices in
/// ascending order. The batches are the test folds of an unshuffled
/// stratified k-fold split.
#[derive(Debug, Clone)]
pub struct StratifiedSampler {
    batches: Vec<Vec<usize>>,
}

impl StratifiedSampler {
    /// Build batches over `labels` (one label per sample).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Training`] if `batch_size` is zero, fewer than two
    /// folds fit, or every label has fewer members than there are folds.
    pub fn new<S: AsRef<str>>(labels: &[S], batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::Training("batch size must be positive".to_string()));
        }
        let n_splits = labels.len() / batch_size;
        if n_splits < 2 {
            return Err(Error::Training(format!(
                "stratified sampling needs at least 2 batches, got {} samples with batch size {batch_size}",
                labels.len()
            )));
        }

        // encode labels by order of first appearance
        let mut codes: HashMap<&str, usize> = HashMap::new();
        let encoded: Vec<usize> = labels
            .iter()
            .map(|label| {
                let next = codes.len();
                *codes.entry(label.as_ref()).or_insert(next)
            })
            .collect();
        let n_classes = codes.len();

        let mut counts = vec![0usize; n_classes];
        for &code in &encoded {
            counts[code] += 1;
        }
        if counts.iter().all(|&c| c < n_splits) {
            return Err(Error::Training(format!(
                "{n_splits} batches exceed the members of every label"
            )));
        }
        if let Some(&smallest) = counts.iter().min() {
            if smallest < n_splits {
                log::warn!("Smallest label has {smallest} members, fewer than {n_splits} batches");
            }
        }

        // allocation[fold][class]: deal the label-sorted samples round robin
        let mut sorted = encoded.clone();
        sorted.sort_unstable();
        let mut allocation = vec![vec![0usize; n_classes]; n_splits];
        for (i, &code) in sorted.iter().enumerate() {
            allocation[i % n_splits][code] += 1;
        }

        // per class, the fold of each member in dataset order
        let mut class_folds: Vec<std::vec::IntoIter<usize>> = (0..n_classes)
            .map(|class| {
                (0..n_splits)
                    .flat_map(|fold| std::iter::repeat_n(fold, allocation[fold][class]))
                    .collect::<Vec<_>>()
                    .into_iter()
            })
            .collect();

        let mut batches = vec![Vec::new(); n_splits];
        for (index, &code) in encoded.iter().enumerate() {
            if let Some(fold) = class_folds[code].next() {
                batches[fold].push(index);
            }
        }

        Ok(Self { batches })
    }

    /// Number of batches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    /// Check if there are no batches.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Sample indices of each batch.
    #[must_use]
    pub fn batches(&self) -> &[Vec<usize>] {
        &self.batches
    }
}

impl IntoIterator for StratifiedSampler {
    type Item = Vec<usize>;
    type IntoIter = std::vec::IntoIter<Vec<usize>>;

    fn into_iter(self) -> Self::IntoIter {
        self.batches.into_iter()
    }
}
