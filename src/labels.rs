//! Label catalogs for the segmented anatomies.
//!
//! Each anatomy has a fixed table mapping integer class ids (as they appear in
//! annotation masks) to structure names. Class 0 is always background.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const KNEE_CLASSES: &[&str] = &[
    "Background",
    "R Patella",
    "R Femur",
    "R Tibia",
    "R Fibula",
    "L Patella",
    "L Femur",
    "L Tibia",
    "L Fibula",
];

const HIP_CLASSES: &[&str] = &[
    "Background",
    "R Acetabulum",
    "L Acetabulum",
    "R Ilium, Ischium, and Pubis",
    "L Ilium, Ischium, and Pubis",
    "R Femur",
    "L Femur",
];

/// Skeletal region under segmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anatomy {
    /// Bilateral knee radiographs.
    Knee,
    /// Bilateral hip radiographs.
    Hip,
}

impl Anatomy {
    /// Get all anatomy variants.
    #[must_use]
    pub fn all() -> &'static [Self] {
        &[Self::Knee, Self::Hip]
    }

    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "knee" | "knees" => Some(Self::Knee),
            "hip" | "hips" | "pelvis" => Some(Self::Hip),
            _ => None,
        }
    }

    /// Capitalized name used in artifact and directory names ("Knee", "Hip").
    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            Self::Knee => "Knee",
            Self::Hip => "Hip",
        }
    }

    /// The label catalog for this anatomy.
    #[must_use]
    pub fn catalog(self) -> LabelCatalog {
        LabelCatalog::new(self)
    }

    /// Subject ids with known-bad imaging that are dropped before any grouping.
    #[must_use]
    pub fn excluded_subjects(self) -> &'static [&'static str] {
        match self {
            Self::Knee => &["9025994"],
            Self::Hip => &["9002116", "9025994"],
        }
    }
}

impl fmt::Display for Anatomy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Knee => write!(f, "knee"),
            Self::Hip => write!(f, "hip"),
        }
    }
}

/// Class id to structure name mapping for one anatomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelCatalog {
    anatomy: Anatomy,
    classes: &'static [&'static str],
}

impl LabelCatalog {
    /// Catalog for the given anatomy.
    #[must_use]
    pub fn new(anatomy: Anatomy) -> Self {
        let classes = match anatomy {
            Anatomy::Knee => KNEE_CLASSES,
            Anatomy::Hip => HIP_CLASSES,
        };
        Self { anatomy, classes }
    }

    /// Anatomy this catalog describes.
    #[must_use]
    pub fn anatomy(&self) -> Anatomy {
        self.anatomy
    }

    /// Number of classes, background included.
    #[must_use]
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Structure name for a class id.
    pub fn class_name(&self, id: u8) -> Result<&'static str> {
        self.classes
            .get(usize::from(id))
            .copied()
            .ok_or_else(|| Error::UnknownClass {
                anatomy: self.anatomy.to_string(),
                id,
            })
    }

    /// Iterate `(id, name)` pairs in id order.
    pub fn classes(&self) -> impl Iterator<Item = (u8, &'static str)> + '_ {
        self.classes
            .iter()
            .enumerate()
            .map(|(id, name)| (id as u8, *name))
    }
}
