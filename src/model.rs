//! Segmentation model interface.
//!
//! Models are opaque: a [`ModelLoader`] turns an artifact path into a
//! [`SegmentationModel`], and the model turns a [`Sample`] into per-class
//! scores. The evaluation pipeline only needs the scores.
//!
//! [`PredictionDirLoader`] is a backend for inference that already ran
//! elsewhere: the artifact is a directory of predicted label masks named
//! `{id}.png`.

use std::path::{Path, PathBuf};

use imgref::ImgVec;

use crate::dataset::{LabelMask, Sample, read_label_mask};
use crate::error::{Error, Result};

/// Largest class count whose ids fit in a `u8` label mask.
pub const MAX_CLASSES: usize = 256;

/// Raw per-class model output for one image, stored class-major
/// (`classes` planes of `width * height`).
#[derive(Debug, Clone, PartialEq)]
pub struct ClassScores {
    classes: usize,
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl ClassScores {
    /// Wrap class-major scores.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` does not hold exactly
    /// `classes * width * height` values, if `classes` is zero, or if
    /// `classes` exceeds [`MAX_CLASSES`].
    pub fn new(classes: usize, width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        if classes > MAX_CLASSES {
            return Err(Error::Model {
                model: "scores".to_string(),
                message: format!("{classes} classes do not fit in a u8 label mask"),
            });
        }
        if classes == 0 || data.len() != classes * width * height {
            return Err(Error::Model {
                model: "scores".to_string(),
                message: format!(
                    "expected {} x {} x {} scores, got {}",
                    classes,
                    width,
                    height,
                    data.len()
                ),
            });
        }
        Ok(Self {
            classes,
            width,
            height,
            data,
        })
    }

    /// One-hot scores from a label mask.
    ///
    /// # Errors
    ///
    /// Returns an error if the mask holds a label `>= classes`.
    pub fn one_hot(mask: &LabelMask, classes: usize) -> Result<Self> {
        let (width, height) = (mask.width(), mask.height());
        let plane = width * height;
        let mut data = vec![0.0f32; classes * plane];
        for (i, label) in mask.pixels().enumerate() {
            let class = usize::from(label);
            if class >= classes {
                return Err(Error::Model {
                    model: "one-hot".to_string(),
                    message: format!("label {label} outside catalog of {classes} classes"),
                });
            }
            data[class * plane + i] = 1.0;
        }
        Self::new(classes, width, height, data)
    }

    /// Number of classes.
    #[must_use]
    pub fn classes(&self) -> usize {
        self.classes
    }

    /// Spatial dimensions (width, height).
    #[must_use]
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Scores for a single class.
    #[must_use]
    pub fn plane(&self, class: usize) -> &[f32] {
        let plane = self.width * self.height;
        &self.data[class * plane..(class + 1) * plane]
    }

    /// Normalize to class probabilities per pixel.
    #[must_use]
    pub fn softmax(&self) -> Self {
        let plane = self.width * self.height;
        let mut out = vec![0.0f32; self.data.len()];
        for px in 0..plane {
            let max = (0..self.classes)
                .map(|c| self.data[c * plane + px])
                .fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0f32;
            for c in 0..self.classes {
                let e = (self.data[c * plane + px] - max).exp();
                out[c * plane + px] = e;
                sum += e;
            }
            for c in 0..self.classes {
                out[c * plane + px] /= sum;
            }
        }
        Self {
            classes: self.classes,
            width: self.width,
            height: self.height,
            data: out,
        }
    }

    /// Most likely class per pixel; ties go to the lowest class id.
    #[must_use]
    pub fn argmax(&self) -> LabelMask {
        let plane = self.width * self.height;
        let labels: Vec<u8> = (0..plane)
            .map(|px| {
                let mut best = 0;
                for c in 1..self.classes {
                    if self.data[c * plane + px] > self.data[best * plane + px] {
                        best = c;
                    }
                }
                best as u8
            })
            .collect();
        ImgVec::new(labels, self.width, self.height)
    }

    /// Predicted label mask: softmax over classes, then argmax.
    #[must_use]
    pub fn predict_labels(&self) -> LabelMask {
        self.softmax().argmax()
    }
}

/// A trained segmentation model.
pub trait SegmentationModel {
    /// Produce per-class scores for a sample's image.
    ///
    /// Implementations should only read `sample.image`; `sample.id` is
    /// available for backends that look up precomputed output.
    fn predict(&self, sample: &Sample) -> Result<ClassScores>;
}

/// Loads model artifacts by path.
pub trait ModelLoader {
    /// Load the model stored at `artifact`.
    fn load(&self, artifact: &Path) -> Result<Box<dyn SegmentationModel>>;
}

impl<F> ModelLoader for F
where
    F: Fn(&Path) -> Result<Box<dyn SegmentationModel>>,
{
    fn load(&self, artifact: &Path) -> Result<Box<dyn SegmentationModel>> {
        self(artifact)
    }
}

/// Loader for directories of precomputed predictions.
#[derive(Debug, Clone, Copy)]
pub struct PredictionDirLoader {
    classes: usize,
}

impl PredictionDirLoader {
    /// Loader producing scores over `classes` classes.
    #[must_use]
    pub fn new(classes: usize) -> Self {
        Self { classes }
    }
}

impl ModelLoader for PredictionDirLoader {
    fn load(&self, artifact: &Path) -> Result<Box<dyn SegmentationModel>> {
        if !artifact.is_dir() {
            return Err(Error::Model {
                model: artifact.display().to_string(),
                message: "prediction directory not found".to_string(),
            });
        }
        Ok(Box::new(PredictionDirModel {
            dir: artifact.to_path_buf(),
            classes: self.classes,
        }))
    }
}

/// Model whose output was computed offline and stored as `{id}.png` masks.
#[derive(Debug, Clone)]
pub struct PredictionDirModel {
    dir: PathBuf,
    classes: usize,
}

impl SegmentationModel for PredictionDirModel {
    fn predict(&self, sample: &Sample) -> Result<ClassScores> {
        let path = self.dir.join(format!("{}.png", sample.id));
        let mask = read_label_mask(&path)?;
        ClassScores::one_hot(&mask, self.classes).map_err(|e| Error::Model {
            model: self.dir.display().to_string(),
            message: format!("{}: {e}", path.display()),
        })
    }
}
