//! Protected attributes and demographic value normalization.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::Cohort;
use crate::error::{Error, Result};

/// Raw age column.
pub const AGE_COLUMN: &str = "V00AGE";

/// Raw coded values and the normalized names used in partitions.
const VALUE_NAMES: &[(&str, &str)] = &[
    ("1: White or Caucasian", "White_Caucasian"),
    ("2: Black or African American", "Black_AfricanAmerican"),
    ("1: Male", "Male"),
    ("2: Female", "Female"),
];

/// Demographic column used to stratify a fairness evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectedAttribute {
    /// Self-reported sex (`P02SEX`).
    Sex,
    /// Self-reported race (`P02RACE`).
    Race,
    /// Derived baseline age group (`V00AGE_GROUP`).
    AgeGroup,
}

impl ProtectedAttribute {
    /// Get all attribute variants.
    #[must_use]
    pub fn all() -> &'static [Self] {
        &[Self::Sex, Self::Race, Self::AgeGroup]
    }

    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sex" | "gender" | "p02sex" => Some(Self::Sex),
            "race" | "p02race" => Some(Self::Race),
            "age" | "age_group" | "agegroup" | "v00age_group" => Some(Self::AgeGroup),
            _ => None,
        }
    }

    /// Cohort column holding this attribute.
    #[must_use]
    pub fn column(self) -> &'static str {
        match self {
            Self::Sex => "P02SEX",
            Self::Race => "P02RACE",
            Self::AgeGroup => "V00AGE_GROUP",
        }
    }

    /// Tag used in balanced/stratified experiment names.
    #[must_use]
    pub fn experiment_tag(self) -> &'static str {
        match self {
            Self::Sex => "Gender",
            Self::Race => "Race",
            Self::AgeGroup => "Age",
        }
    }

    /// Groups with their own trained model: `(partition value, name tag)`.
    #[must_use]
    pub fn groups(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Sex => &[("Male", "SexGroup_Male"), ("Female", "SexGroup_Female")],
            Self::Race => &[
                ("White_Caucasian", "RaceGroup_White"),
                ("Black_AfricanAmerican", "RaceGroup_Black"),
            ],
            Self::AgeGroup => &[
                ("Age_50_Lower", "AgeGroup_50_Lower"),
                ("Age_51_64", "AgeGroup_51_64"),
                ("Age_65_79", "AgeGroup_65_79"),
            ],
        }
    }

    /// Partition values, in the order balanced splits sample them.
    pub fn values(self) -> impl Iterator<Item = &'static str> {
        self.groups().iter().map(|(value, _)| *value)
    }
}

impl std::fmt::Display for ProtectedAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column())
    }
}

/// Baseline age bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgeGroup {
    /// 50 years or younger.
    #[serde(rename = "Age_50_Lower")]
    UpTo50,
    /// 51 to 64 years.
    #[serde(rename = "Age_51_64")]
    From51To64,
    /// 65 to 79 years.
    #[serde(rename = "Age_65_79")]
    From65To79,
}

impl AgeGroup {
    /// Bracket for an age in years; `None` above 79.
    #[must_use]
    pub fn from_age(age: f64) -> Option<Self> {
        if age <= 50.0 {
            Some(Self::UpTo50)
        } else if age <= 64.0 {
            Some(Self::From51To64)
        } else if age <= 79.0 {
            Some(Self::From65To79)
        } else {
            None
        }
    }

    /// Partition value for this bracket.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::UpTo50 => "Age_50_Lower",
            Self::From51To64 => "Age_51_64",
            Self::From65To79 => "Age_65_79",
        }
    }
}

/// Map a raw coded demographic value to its partition name.
///
/// Values without a mapping are returned unchanged.
#[must_use]
pub fn normalize_value(raw: &str) -> &str {
    VALUE_NAMES
        .iter()
        .find(|(code, _)| *code == raw)
        .map_or(raw, |(_, name)| name)
}

/// Turn a raw demographic export into the segmentation cohort.
///
/// Keeps `id`, `P02SEX`, `P02RACE`, `V00AGE`; normalizes coded values; adds
/// `V00AGE_GROUP`.
///
/// # Errors
///
/// Returns [`Error::Cohort`] for a missing or unparsable age, or an age
/// outside every bracket.
pub fn prepare_segmentation_cohort(raw: &Cohort) -> Result<Cohort> {
    let table: HashMap<&str, &str> = VALUE_NAMES.iter().copied().collect();
    let cohort = raw
        .select_columns(&[
            ProtectedAttribute::Sex.column(),
            ProtectedAttribute::Race.column(),
            AGE_COLUMN,
        ])
        .replace_values(&table);

    cohort.with_column(ProtectedAttribute::AgeGroup.column(), |record| {
        let raw_age = record.get(AGE_COLUMN).unwrap_or("").trim();
        let age: f64 = raw_age.parse().map_err(|_| {
            Error::Cohort(format!("subject {} has invalid age '{raw_age}'", record.id))
        })?;
        AgeGroup::from_age(age)
            .map(|g| g.label().to_string())
            .ok_or_else(|| Error::Cohort(format!("subject {} age {age} is above 79", record.id)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::CohortRecord;

    #[test]
    fn test_age_brackets() {
        assert_eq!(AgeGroup::from_age(45.0), Some(AgeGroup::UpTo50));
        assert_eq!(AgeGroup::from_age(50.0), Some(AgeGroup::UpTo50));
        assert_eq!(AgeGroup::from_age(51.0), Some(AgeGroup::From51To64));
        assert_eq!(AgeGroup::from_age(64.0), Some(AgeGroup::From51To64));
        assert_eq!(AgeGroup::from_age(65.0), Some(AgeGroup::From65To79));
        assert_eq!(AgeGroup::from_age(79.0), Some(AgeGroup::From65To79));
        assert_eq!(AgeGroup::from_age(80.0), None);
    }

    #[test]
    fn test_normalize_value() {
        assert_eq!(normalize_value("1: Male"), "Male");
        assert_eq!(normalize_value("2: Black or African American"), "Black_AfricanAmerican");
        assert_eq!(normalize_value("3: Asian"), "3: Asian");
    }

    #[test]
    fn test_prepare_segmentation_cohort() {
        let raw = Cohort::from_records(
            vec!["id".into(), "P02SEX".into(), "P02RACE".into(), "V00AGE".into(), "V00BMI".into()],
            vec![
                CohortRecord::new(
                    "1",
                    [
                        ("P02SEX", "1: Male"),
                        ("P02RACE", "1: White or Caucasian"),
                        ("V00AGE", "48"),
                        ("V00BMI", "27.1"),
                    ],
                ),
                CohortRecord::new(
                    "2",
                    [
                        ("P02SEX", "2: Female"),
                        ("P02RACE", "2: Black or African American"),
                        ("V00AGE", "70"),
                        ("V00BMI", "31.0"),
                    ],
                ),
            ],
        )
        .unwrap();

        let prepared = prepare_segmentation_cohort(&raw).unwrap();
        assert_eq!(
            prepared.columns(),
            &["id", "P02SEX", "P02RACE", "V00AGE", "V00AGE_GROUP"].map(String::from)
        );
        let first = &prepared.records()[0];
        assert_eq!(first.get("P02SEX"), Some("Male"));
        assert_eq!(first.get("P02RACE"), Some("White_Caucasian"));
        assert_eq!(first.get("V00AGE_GROUP"), Some("Age_50_Lower"));
        assert_eq!(first.get("V00BMI"), None);
        assert_eq!(prepared.records()[1].get("V00AGE_GROUP"), Some("Age_65_79"));
    }

    #[test]
    fn test_prepare_rejects_bad_age() {
        let raw = Cohort::from_records(
            vec!["V00AGE".into()],
            vec![CohortRecord::new("1", [("V00AGE", "unknown")])],
        )
        .unwrap();
        assert!(prepare_segmentation_cohort(&raw).is_err());
    }

    #[test]
    fn test_attribute_columns() {
        assert_eq!(ProtectedAttribute::Sex.column(), "P02SEX");
        assert_eq!(ProtectedAttribute::from_str_loose("age"), Some(ProtectedAttribute::AgeGroup));
        assert_eq!(ProtectedAttribute::AgeGroup.values().count(), 3);
    }
}
