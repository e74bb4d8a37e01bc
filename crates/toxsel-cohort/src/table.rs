//! Column-oriented cohort tables
//!
//! A [`FeatureTable`] stores one row per observation together with the
//! [`PatientId`] that owns the row. Static data has one row per patient;
//! data derived from repeated measurements may have several. Every row
//! selection goes through the owning patient, so a patient's rows always
//! travel together.
//!
//! A [`CohortTable`] adds the raw toxicity grade columns that labels are
//! derived from. Grades never appear among the candidate features.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::{
    PatientId,
    feature::{CatalogError, FeatureCatalog, FeatureKind, FeatureSpec},
};

#[derive(Debug, derive_more::Display, derive_more::Error, derive_more::From)]
pub enum CohortError {
    #[display("column '{column}' has {actual} values but the table has {expected} rows")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },
    #[display("column '{name}' appears more than once")]
    DuplicateColumn { name: String },
    #[display("feature '{name}' is declared {kind:?} but holds text values")]
    KindMismatch { name: String, kind: FeatureKind },
    #[display("grade column '{name}' does not exist in the cohort")]
    UnknownGrade { name: String },
    #[display("the cohort has no grade columns to derive labels from")]
    NoGradeColumns,
    #[display("{_0}")]
    #[from]
    Catalog(CatalogError),
}

/// Values of one column; `None` marks a missing value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnValues {
    Numeric(Vec<Option<f64>>),
    Categorical(Vec<Option<String>>),
}

impl ColumnValues {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Numeric(values) => values.len(),
            Self::Categorical(values) => values.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct non-missing values.
    #[must_use]
    pub fn distinct_count(&self) -> usize {
        match self {
            Self::Numeric(values) => {
                let mut present = values
                    .iter()
                    .flatten()
                    .copied()
                    .filter(|v| !v.is_nan())
                    .collect::<Vec<_>>();
                present.sort_by(f64::total_cmp);
                present.dedup();
                present.len()
            }
            Self::Categorical(values) => values.iter().flatten().collect::<BTreeSet<_>>().len(),
        }
    }

    /// Keeps the given rows, in the given order.
    #[must_use]
    pub fn select(&self, rows: &[usize]) -> Self {
        match self {
            Self::Numeric(values) => Self::Numeric(rows.iter().map(|&r| values[r]).collect()),
            Self::Categorical(values) => {
                Self::Categorical(rows.iter().map(|&r| values[r].clone()).collect())
            }
        }
    }

    /// Renders numbers as category labels (`1.0` becomes `"1"`).
    #[must_use]
    pub fn into_categorical(self) -> Self {
        match self {
            Self::Numeric(values) => Self::Categorical(
                values
                    .into_iter()
                    .map(|v| v.filter(|v| !v.is_nan()).map(|v| v.to_string()))
                    .collect(),
            ),
            categorical @ Self::Categorical(_) => categorical,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureColumn {
    spec: FeatureSpec,
    values: ColumnValues,
}

impl FeatureColumn {
    /// Pairs a declared spec with its values.
    ///
    /// Categorical columns given as numbers are converted to text labels;
    /// numeric and ordinal columns must hold numbers.
    pub fn new(spec: FeatureSpec, values: ColumnValues) -> Result<Self, CohortError> {
        spec.validate()?;
        let values = match (spec.kind.is_numeric_storage(), values) {
            (true, values @ ColumnValues::Numeric(_)) => values,
            (true, ColumnValues::Categorical(values)) if values.iter().all(Option::is_none) => {
                ColumnValues::Numeric(vec![None; values.len()])
            }
            (true, ColumnValues::Categorical(_)) => {
                return Err(CohortError::KindMismatch {
                    name: spec.name,
                    kind: spec.kind,
                });
            }
            (false, values) => values.into_categorical(),
        };
        Ok(Self { spec, values })
    }

    #[must_use]
    pub fn numeric(spec: FeatureSpec, values: Vec<Option<f64>>) -> Self {
        debug_assert!(spec.kind.is_numeric_storage());
        Self {
            spec,
            values: ColumnValues::Numeric(values),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    #[must_use]
    pub fn spec(&self) -> &FeatureSpec {
        &self.spec
    }

    #[must_use]
    pub fn values(&self) -> &ColumnValues {
        &self.values
    }

    /// Same column with replaced values of identical storage.
    #[must_use]
    pub fn with_values(&self, values: ColumnValues) -> Self {
        Self {
            spec: self.spec.clone(),
            values,
        }
    }

    #[must_use]
    pub fn select(&self, rows: &[usize]) -> Self {
        self.with_values(self.values.select(rows))
    }
}

/// Rows of candidate features, each owned by one patient.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    row_patients: Vec<PatientId>,
    columns: Vec<FeatureColumn>,
}

impl FeatureTable {
    pub fn new(
        row_patients: Vec<PatientId>,
        columns: Vec<FeatureColumn>,
    ) -> Result<Self, CohortError> {
        let mut seen = HashSet::new();
        for column in &columns {
            if column.values.len() != row_patients.len() {
                return Err(CohortError::LengthMismatch {
                    column: column.name().to_owned(),
                    expected: row_patients.len(),
                    actual: column.values.len(),
                });
            }
            if !seen.insert(column.name()) {
                return Err(CohortError::DuplicateColumn {
                    name: column.name().to_owned(),
                });
            }
        }
        Ok(Self {
            row_patients,
            columns,
        })
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.row_patients.len()
    }

    #[must_use]
    pub fn row_patients(&self) -> &[PatientId] {
        &self.row_patients
    }

    #[must_use]
    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&FeatureColumn> {
        self.columns.iter().find(|column| column.name() == name)
    }

    /// Distinct patients owning at least one row.
    #[must_use]
    pub fn patients(&self) -> BTreeSet<PatientId> {
        self.row_patients.iter().cloned().collect()
    }

    /// Declared specs of the current columns.
    pub fn catalog(&self) -> Result<FeatureCatalog, CatalogError> {
        FeatureCatalog::new(self.columns.iter().map(|c| c.spec.clone()).collect())
    }

    /// Keeps every row whose owning patient satisfies `keep`.
    #[must_use]
    pub fn select_patients<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(&PatientId) -> bool,
    {
        let rows = self
            .row_patients
            .iter()
            .enumerate()
            .filter(|(_, patient)| keep(patient))
            .map(|(row, _)| row)
            .collect::<Vec<_>>();
        self.select_rows(&rows)
    }

    #[must_use]
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            row_patients: rows.iter().map(|&r| self.row_patients[r].clone()).collect(),
            columns: self.columns.iter().map(|c| c.select(rows)).collect(),
        }
    }

    /// Same rows with a different set of columns.
    pub fn with_columns(&self, columns: Vec<FeatureColumn>) -> Result<Self, CohortError> {
        Self::new(self.row_patients.clone(), columns)
    }

    /// Appends per-patient columns, broadcasting each patient's value to all of its rows.
    ///
    /// `per_patient` must hold at most one row per patient; patients absent from
    /// it receive missing values.
    pub fn join_patient_features(&self, per_patient: &FeatureTable) -> Result<Self, CohortError> {
        let index = per_patient
            .row_patients
            .iter()
            .enumerate()
            .map(|(row, patient)| (patient, row))
            .collect::<BTreeMap<_, _>>();

        let mut columns = self.columns.clone();
        for column in &per_patient.columns {
            let values = match &column.values {
                ColumnValues::Numeric(values) => ColumnValues::Numeric(
                    self.row_patients
                        .iter()
                        .map(|p| index.get(p).and_then(|&r| values[r]))
                        .collect(),
                ),
                ColumnValues::Categorical(values) => ColumnValues::Categorical(
                    self.row_patients
                        .iter()
                        .map(|p| index.get(p).and_then(|&r| values[r].clone()))
                        .collect(),
                ),
            };
            columns.push(column.with_values(values));
        }
        self.with_columns(columns)
    }
}

/// Raw toxicity grades of one toxicity type, with its binarization threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeColumn {
    pub name: String,
    pub threshold: f64,
    pub values: Vec<Option<f64>>,
}

/// Candidate features plus the raw grades labels are derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortTable {
    features: FeatureTable,
    grades: Vec<GradeColumn>,
}

impl CohortTable {
    pub fn new(features: FeatureTable, grades: Vec<GradeColumn>) -> Result<Self, CohortError> {
        if grades.is_empty() {
            return Err(CohortError::NoGradeColumns);
        }
        let mut seen = HashSet::new();
        for grade in &grades {
            if grade.values.len() != features.num_rows() {
                return Err(CohortError::LengthMismatch {
                    column: grade.name.clone(),
                    expected: features.num_rows(),
                    actual: grade.values.len(),
                });
            }
            if !seen.insert(grade.name.as_str()) || features.column(&grade.name).is_some() {
                return Err(CohortError::DuplicateColumn {
                    name: grade.name.clone(),
                });
            }
        }
        Ok(Self { features, grades })
    }

    #[must_use]
    pub fn features(&self) -> &FeatureTable {
        &self.features
    }

    #[must_use]
    pub fn grades(&self) -> &[GradeColumn] {
        &self.grades
    }

    #[must_use]
    pub fn grade(&self, name: &str) -> Option<&GradeColumn> {
        self.grades.iter().find(|g| g.name == name)
    }

    #[must_use]
    pub fn row_patients(&self) -> &[PatientId] {
        self.features.row_patients()
    }
}
