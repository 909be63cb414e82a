//! Paired radiograph and annotation access by subject id.
//!
//! A [`SampleSource`] resolves a subject id to a [`Sample`]: a single-channel
//! image and an integer class-label mask of the same size. Two sources are
//! provided:
//!
//! - [`InMemorySource`]: samples held in memory, useful for tests and for
//!   callers that decode images themselves
//! - [`PngImageStore`]: `Images/{id}.png` and `Annotations/{id}.png` under a
//!   root directory

mod store;

use std::collections::HashMap;

use imgref::ImgVec;

use crate::error::{Error, Result};

pub use self::store::{PngImageStore, read_label_mask, read_radiograph, write_label_mask};

/// Single-channel radiograph intensities.
pub type Radiograph = ImgVec<f32>;

/// Per-pixel class ids.
pub type LabelMask = ImgVec<u8>;

/// One subject's image with its ground-truth annotation.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Subject identifier.
    pub id: String,
    /// Image intensities.
    pub image: Radiograph,
    /// Ground-truth class labels.
    pub mask: LabelMask,
}

impl Sample {
    /// Pair an image with its mask, checking that their sizes agree.
    pub fn new(id: impl Into<String>, image: Radiograph, mask: LabelMask) -> Result<Self> {
        if image.width() != mask.width() || image.height() != mask.height() {
            return Err(Error::DimensionMismatch {
                expected: (image.width(), image.height()),
                actual: (mask.width(), mask.height()),
            });
        }
        Ok(Self {
            id: id.into(),
            image,
            mask,
        })
    }

    /// Image dimensions (width, height).
    #[must_use]
    pub fn dimensions(&self) -> (usize, usize) {
        (self.image.width(), self.image.height())
    }
}

/// Loads samples by subject id.
pub trait SampleSource {
    /// Load the image and annotation for one subject.
    fn load(&self, id: &str) -> Result<Sample>;
}

/// Samples held in memory, keyed by subject id.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    samples: HashMap<String, Sample>,
}

impl InMemorySource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a sample.
    pub fn insert(&mut self, sample: Sample) -> &mut Self {
        self.samples.insert(sample.id.clone(), sample);
        self
    }

    /// Number of samples held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the source is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl FromIterator<Sample> for InMemorySource {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        let mut source = Self::new();
        for sample in iter {
            source.insert(sample);
        }
        source
    }
}

impl SampleSource for InMemorySource {
    fn load(&self, id: &str) -> Result<Sample> {
        self.samples
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ImageLoad {
                path: id.into(),
                reason: "subject not present in in-memory source".to_string(),
            })
    }
}
