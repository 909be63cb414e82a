//! Demographic cohorts and protected-attribute partitions.
//!
//! A [`Cohort`] is one row per subject read from a demographic CSV: an `id`
//! column plus attribute columns such as `P02SEX`, `P02RACE`, and
//! `V00AGE_GROUP`. Subject ids are unique within a cohort.
//!
//! ## Example
//!
//! ```rust,ignore
//! use seg_fairness::{Anatomy, Cohort};
//!
//! let cohort = Cohort::load("Knee_segmentation.csv")?
//!     .without_excluded(Anatomy::Knee);
//!
//! for partition in cohort.partition_by("P02SEX")? {
//!     println!("{}: {} subjects", partition.key, partition.len());
//! }
//! ```

pub mod demographics;
pub mod splits;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use crate::error::{Error, Result};
use crate::labels::Anatomy;

pub use demographics::{AgeGroup, ProtectedAttribute};
pub use splits::{
    DataSplit, StandardSplits, balance, train_valid_test_split, write_standard_splits,
};

/// Name of the subject identifier column.
pub const ID_COLUMN: &str = "id";

/// One subject's demographic row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortRecord {
    /// Subject identifier.
    pub id: String,
    /// Remaining columns by header name.
    pub attributes: BTreeMap<String, String>,
}

impl CohortRecord {
    /// Create a record from an id and `(column, value)` pairs.
    pub fn new<K, V>(id: impl Into<String>, attributes: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            id: id.into(),
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Value of an attribute column.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&str> {
        self.attributes.get(column).map(String::as_str)
    }
}

/// Subjects sharing one value of a protected attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// The attribute value, e.g. `"Male"` or `"Age_51_64"`.
    pub key: String,
    /// Records with that value, in cohort order.
    pub records: Vec<CohortRecord>,
}

impl Partition {
    /// Number of subjects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the partition is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Subject ids in cohort order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.id.as_str())
    }
}

/// A set of subjects with demographic attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cohort {
    columns: Vec<String>,
    records: Vec<CohortRecord>,
}

impl Cohort {
    /// Build a cohort from records.
    ///
    /// `columns` fixes the CSV column order when the cohort is saved; the id
    /// column is added at the front if missing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cohort`] if two records share an id.
    pub fn from_records(columns: Vec<String>, records: Vec<CohortRecord>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            if !seen.insert(record.id.as_str()) {
                return Err(Error::Cohort(format!("duplicate subject id {}", record.id)));
            }
        }

        let mut columns = columns;
        if !columns.iter().any(|c| c == ID_COLUMN) {
            columns.insert(0, ID_COLUMN.to_string());
        }

        Ok(Self { columns, records })
    }

    /// Load a cohort from a CSV file with an `id` column.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)?;

        let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();
        let id_idx = find_header_index(&headers, ID_COLUMN).ok_or_else(|| Error::CsvImport {
            line: 1,
            reason: format!("no '{ID_COLUMN}' column in {}", path.display()),
        })?;

        let mut records = Vec::new();
        for (line_num, row) in reader.records().enumerate() {
            let row = row.map_err(|e| Error::CsvImport {
                line: line_num + 2, // +2 for 1-based and header
                reason: e.to_string(),
            })?;

            let id = row.get(id_idx).unwrap_or("").trim().to_string();
            if id.is_empty() {
                return Err(Error::CsvImport {
                    line: line_num + 2,
                    reason: "empty subject id".to_string(),
                });
            }

            let attributes = headers
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != id_idx)
                .map(|(i, h)| (h.clone(), row.get(i).unwrap_or("").to_string()))
                .collect();
            records.push(CohortRecord { id, attributes });
        }

        let mut columns = headers;
        columns[id_idx] = ID_COLUMN.to_string();
        let cohort = Self::from_records(columns, records)?;
        log::debug!("Loaded {} subjects from {}", cohort.len(), path.display());
        Ok(cohort)
    }

    /// Save the cohort as CSV, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut wtr = csv::Writer::from_path(path)?;
        wtr.write_record(&self.columns)?;
        for record in &self.records {
            wtr.write_record(self.columns.iter().map(|c| {
                if c == ID_COLUMN {
                    record.id.as_str()
                } else {
                    record.get(c).unwrap_or("")
                }
            }))?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Column names in file order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Records in cohort order.
    #[must_use]
    pub fn records(&self) -> &[CohortRecord] {
        &self.records
    }

    /// Number of subjects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the cohort is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Subject ids in cohort order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.id.as_str())
    }

    /// Check whether the cohort has a column.
    #[must_use]
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Keep the records matching a predicate.
    #[must_use]
    pub fn retain(&self, mut keep: impl FnMut(&CohortRecord) -> bool) -> Self {
        Self {
            columns: self.columns.clone(),
            records: self.records.iter().filter(|r| keep(*r)).cloned().collect(),
        }
    }

    /// Drop the given subject ids.
    #[must_use]
    pub fn exclude(&self, ids: &[&str]) -> Self {
        let excluded: HashSet<&str> = ids.iter().copied().collect();
        let kept = self.retain(|r| !excluded.contains(r.id.as_str()));
        if kept.len() != self.len() {
            log::info!("Excluded {} subjects", self.len() - kept.len());
        }
        kept
    }

    /// Drop the anatomy's known-bad subjects.
    #[must_use]
    pub fn without_excluded(&self, anatomy: Anatomy) -> Self {
        self.exclude(anatomy.excluded_subjects())
    }

    /// Keep only records where `column == value`.
    #[must_use]
    pub fn filter_eq(&self, column: &str, value: &str) -> Self {
        self.retain(|r| r.get(column) == Some(value))
    }

    /// Keep only the records whose ids are in `ids`, in cohort order.
    #[must_use]
    pub fn select_ids(&self, ids: &HashSet<&str>) -> Self {
        self.retain(|r| ids.contains(r.id.as_str()))
    }

    /// Keep only the listed columns (the id column is always kept).
    #[must_use]
    pub fn select_columns(&self, columns: &[&str]) -> Self {
        let mut kept: Vec<String> = vec![ID_COLUMN.to_string()];
        kept.extend(
            columns
                .iter()
                .filter(|c| **c != ID_COLUMN && self.has_column(c))
                .map(|c| (*c).to_string()),
        );
        let records = self
            .records
            .iter()
            .map(|r| CohortRecord {
                id: r.id.clone(),
                attributes: r
                    .attributes
                    .iter()
                    .filter(|(k, _)| kept.contains(k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            })
            .collect();
        Self {
            columns: kept,
            records,
        }
    }

    /// Add or overwrite a column computed from each record.
    pub fn with_column(
        &self,
        column: &str,
        mut value: impl FnMut(&CohortRecord) -> Result<String>,
    ) -> Result<Self> {
        let mut columns = self.columns.clone();
        if !columns.iter().any(|c| c == column) {
            columns.push(column.to_string());
        }
        let records = self
            .records
            .iter()
            .map(|r| {
                let v = value(r)?;
                let mut record = r.clone();
                record.attributes.insert(column.to_string(), v);
                Ok(record)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { columns, records })
    }

    /// Replace attribute values using a lookup table, across all columns.
    #[must_use]
    pub fn replace_values(&self, table: &HashMap<&str, &str>) -> Self {
        let mut out = self.clone();
        for record in &mut out.records {
            for value in record.attributes.values_mut() {
                if let Some(&replacement) = table.get(value.as_str()) {
                    *value = replacement.to_string();
                }
            }
        }
        out
    }

    /// Concatenate cohorts with the same columns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cohort`] if the result would contain duplicate ids.
    pub fn concat(parts: &[Cohort]) -> Result<Self> {
        let columns = parts.first().map(|c| c.columns.clone()).unwrap_or_default();
        let records = parts.iter().flat_map(|c| c.records.iter().cloned()).collect();
        Self::from_records(columns, records)
    }

    /// Split the cohort by the distinct values of `column`.
    ///
    /// Partitions appear in order of each value's first occurrence, are
    /// disjoint, and together cover every record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cohort`] if the column is missing or a record has no
    /// value for it.
    pub fn partition_by(&self, column: &str) -> Result<Vec<Partition>> {
        if !self.has_column(column) {
            return Err(Error::Cohort(format!("no '{column}' column in cohort")));
        }

        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut partitions: Vec<Partition> = Vec::new();

        for record in &self.records {
            let value = match record.get(column) {
                Some(v) if !v.is_empty() => v,
                _ => {
                    return Err(Error::Cohort(format!(
                        "subject {} has no value for '{column}'",
                        record.id
                    )));
                }
            };
            let slot = *index.entry(value).or_insert_with(|| {
                partitions.push(Partition {
                    key: value.to_string(),
                    records: Vec::new(),
                });
                partitions.len() - 1
            });
            partitions[slot].records.push(record.clone());
        }

        Ok(partitions)
    }
}

/// Find a header index by name (case-insensitive).
fn find_header_index(headers: &[String], name: &str) -> Option<usize> {
    let name_lower = name.to_lowercase();
    headers.iter().position(|h| h.trim().to_lowercase() == name_lower)
}
