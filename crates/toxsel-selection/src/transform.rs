//! Leak-safe, fold-local column transforms
//!
//! A [`ColumnTransform`] holds no learned state. Calling
//! [`fit`](ColumnTransform::fit) on a fold's training rows produces a
//! [`FittedTransform`] that owns the learned parameters; applying it is a pure
//! function of those parameters and the rows being transformed.
//!
//! [`LeakSafeTransformStage`] chains transforms in declared order. Its fitted
//! counterpart, [`FittedStage`], is deliberately not `Clone`: each fold fits
//! its own and drops it when the fold ends.
//!
//! # Example
//!
//! ```
//! use toxsel_cohort::{
//!     PatientId,
//!     feature::{FeatureKind, FeatureSpec},
//!     table::{ColumnValues, FeatureColumn, FeatureTable},
//! };
//! use toxsel_selection::{config::TransformSpec, transform::LeakSafeTransformStage};
//!
//! let ids = ["a", "b", "c"].map(PatientId::from).to_vec();
//! let age = FeatureColumn::numeric(
//!     FeatureSpec::new("age", FeatureKind::Numeric),
//!     vec![Some(50.0), None, Some(70.0)],
//! );
//! let training = FeatureTable::new(ids, vec![age]).unwrap();
//!
//! let stage = LeakSafeTransformStage::from_specs(&[TransformSpec::Impute]);
//! let (_fitted, transformed) = stage.fit_transform(&training).unwrap();
//! assert_eq!(
//!     transformed.column("age").unwrap().values(),
//!     &ColumnValues::Numeric(vec![Some(50.0), Some(60.0), Some(70.0)])
//! );
//! ```

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use toxsel_cohort::{
    feature::FeatureKind,
    table::{CohortError, ColumnValues, FeatureTable},
};
use toxsel_stats::descriptive::DescriptiveStats;

use crate::config::TransformSpec;

#[derive(Debug, derive_more::Display, derive_more::Error, derive_more::From)]
pub enum TransformError {
    #[display("{transform} was fitted on column '{column}', which is absent from the rows")]
    #[from(ignore)]
    ColumnMissing {
        transform: &'static str,
        column: String,
    },
    #[display("{_0}")]
    Table(CohortError),
}

/// Unfitted transform specification.
pub trait ColumnTransform: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Learns parameters from the given rows only.
    fn fit(&self, rows: &FeatureTable) -> BoxedFittedTransform;
}

/// Learned parameters of one transform.
pub trait FittedTransform: fmt::Debug + Send {
    fn apply(&self, rows: &FeatureTable) -> Result<FeatureTable, TransformError>;

    /// Columns this transform removes.
    fn dropped_columns(&self) -> &[String] {
        &[]
    }
}

pub type BoxedColumnTransform = Box<dyn ColumnTransform>;
pub type BoxedFittedTransform = Box<dyn FittedTransform>;

#[derive(Debug, Clone, Copy, Default)]
pub struct DropConstant;

#[derive(Debug)]
struct FittedDropConstant {
    dropped: Vec<String>,
}

impl ColumnTransform for DropConstant {
    fn name(&self) -> &'static str {
        "drop_constant"
    }

    fn fit(&self, rows: &FeatureTable) -> BoxedFittedTransform {
        let dropped = rows
            .columns()
            .iter()
            .filter(|column| column.values().distinct_count() <= 1)
            .map(|column| column.name().to_owned())
            .collect();
        Box::new(FittedDropConstant { dropped })
    }
}

impl FittedTransform for FittedDropConstant {
    fn apply(&self, rows: &FeatureTable) -> Result<FeatureTable, TransformError> {
        let kept = rows
            .columns()
            .iter()
            .filter(|column| !self.dropped.iter().any(|d| d == column.name()))
            .cloned()
            .collect();
        Ok(rows.with_columns(kept)?)
    }

    fn dropped_columns(&self) -> &[String] {
        &self.dropped
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Impute;

#[derive(Debug, Clone, PartialEq)]
enum FillValue {
    Number(f64),
    Category(String),
}

#[derive(Debug)]
struct FittedImpute {
    fill: BTreeMap<String, FillValue>,
}

impl ColumnTransform for Impute {
    fn name(&self) -> &'static str {
        "impute"
    }

    fn fit(&self, rows: &FeatureTable) -> BoxedFittedTransform {
        let fill = rows
            .columns()
            .iter()
            .filter_map(|column| {
                let value = match (column.values(), column.spec().kind) {
                    (ColumnValues::Numeric(values), FeatureKind::Ordinal) => {
                        training_level_mode(values).map(FillValue::Number)
                    }
                    (ColumnValues::Numeric(values), _) => {
                        training_median(values).map(FillValue::Number)
                    }
                    (ColumnValues::Categorical(values), _) => {
                        training_mode(values).map(FillValue::Category)
                    }
                }?;
                Some((column.name().to_owned(), value))
            })
            .collect();
        Box::new(FittedImpute { fill })
    }
}

impl FittedTransform for FittedImpute {
    fn apply(&self, rows: &FeatureTable) -> Result<FeatureTable, TransformError> {
        let columns = rows
            .columns()
            .iter()
            .map(|column| {
                let values = match (column.values(), self.fill.get(column.name())) {
                    (ColumnValues::Numeric(values), Some(FillValue::Number(fill))) => {
                        ColumnValues::Numeric(
                            values
                                .iter()
                                .map(|v| Some(v.filter(|v| !v.is_nan()).unwrap_or(*fill)))
                                .collect(),
                        )
                    }
                    (ColumnValues::Categorical(values), Some(FillValue::Category(fill))) => {
                        ColumnValues::Categorical(
                            values
                                .iter()
                                .map(|v| Some(v.clone().unwrap_or_else(|| fill.clone())))
                                .collect(),
                        )
                    }
                    // all missing in training: nothing learned
                    (values, _) => values.clone(),
                };
                column.with_values(values)
            })
            .collect();
        Ok(rows.with_columns(columns)?)
    }
}

fn training_median(values: &[Option<f64>]) -> Option<f64> {
    DescriptiveStats::new(values.iter().flatten().copied().filter(|v| !v.is_nan()))
        .map(|stats| stats.median)
}

/// Most frequent ordinal level; ties go to the smallest level.
fn training_level_mode(values: &[Option<f64>]) -> Option<f64> {
    let mut present = values
        .iter()
        .flatten()
        .copied()
        .filter(|v| !v.is_nan())
        .collect::<Vec<_>>();
    present.sort_by(f64::total_cmp);
    present
        .chunk_by(|a, b| a == b)
        .fold(None::<(f64, usize)>, |best, run| match best {
            Some((_, best_count)) if best_count >= run.len() => best,
            _ => Some((run[0], run.len())),
        })
        .map(|(level, _)| level)
}

/// Most frequent category; ties go to the lexicographically smallest.
fn training_mode(values: &[Option<String>]) -> Option<String> {
    let mut counts = BTreeMap::<&str, usize>::new();
    for value in values.iter().flatten() {
        *counts.entry(value).or_default() += 1;
    }
    counts
        .into_iter()
        .fold(None::<(&str, usize)>, |best, (value, count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((value, count)),
        })
        .map(|(value, _)| value.to_owned())
}

#[derive(Debug, Clone, Default)]
pub struct BinarizeAtMedian {
    columns: BTreeSet<String>,
}

impl BinarizeAtMedian {
    #[must_use]
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug)]
struct FittedBinarize {
    cuts: BTreeMap<String, f64>,
}

impl ColumnTransform for BinarizeAtMedian {
    fn name(&self) -> &'static str {
        "binarize_at_median"
    }

    fn fit(&self, rows: &FeatureTable) -> BoxedFittedTransform {
        let cuts = rows
            .columns()
            .iter()
            .filter(|column| self.columns.contains(column.name()))
            .filter_map(|column| match column.values() {
                ColumnValues::Numeric(values) => {
                    training_median(values).map(|cut| (column.name().to_owned(), cut))
                }
                ColumnValues::Categorical(_) => None,
            })
            .collect::<BTreeMap<_, _>>();
        for (column, cut) in &cuts {
            log::debug!("binarize '{column}' at {cut}");
        }
        Box::new(FittedBinarize { cuts })
    }
}

impl FittedTransform for FittedBinarize {
    fn apply(&self, rows: &FeatureTable) -> Result<FeatureTable, TransformError> {
        let columns = rows
            .columns()
            .iter()
            .map(|column| match (column.values(), self.cuts.get(column.name())) {
                (ColumnValues::Numeric(values), Some(&cut)) => {
                    column.with_values(ColumnValues::Numeric(
                        values
                            .iter()
                            .map(|v| {
                                v.filter(|v| !v.is_nan())
                                    .map(|v| if v > cut { 1.0 } else { 0.0 })
                            })
                            .collect(),
                    ))
                }
                _ => column.clone(),
            })
            .collect::<Vec<_>>();
        if let Some(missing) = self
            .cuts
            .keys()
            .find(|name| rows.column(name).is_none())
        {
            return Err(TransformError::ColumnMissing {
                transform: "binarize_at_median",
                column: missing.clone(),
            });
        }
        Ok(rows.with_columns(columns)?)
    }
}

impl From<&TransformSpec> for BoxedColumnTransform {
    fn from(spec: &TransformSpec) -> Self {
        match spec {
            TransformSpec::DropConstant => Box::new(DropConstant),
            TransformSpec::Impute => Box::new(Impute),
            TransformSpec::BinarizeAtMedian { columns } => {
                Box::new(BinarizeAtMedian::new(columns.iter().cloned()))
            }
        }
    }
}

/// Ordered chain of unfitted transforms.
#[derive(Debug, Default)]
pub struct LeakSafeTransformStage {
    transforms: Vec<BoxedColumnTransform>,
}

impl LeakSafeTransformStage {
    #[must_use]
    pub fn new(transforms: Vec<BoxedColumnTransform>) -> Self {
        Self { transforms }
    }

    #[must_use]
    pub fn from_specs(specs: &[TransformSpec]) -> Self {
        Self::new(specs.iter().map(BoxedColumnTransform::from).collect())
    }

    /// Fits every transform on `training`, each on the previous one's output.
    ///
    /// Returns the fitted stage together with the transformed training rows.
    pub fn fit_transform(
        &self,
        training: &FeatureTable,
    ) -> Result<(FittedStage, FeatureTable), TransformError> {
        let mut current = training.clone();
        let mut fitted = Vec::with_capacity(self.transforms.len());
        for transform in &self.transforms {
            let state = transform.fit(&current);
            current = state.apply(&current)?;
            fitted.push(state);
        }
        Ok((FittedStage { fitted }, current))
    }
}

/// Learned parameters of a whole chain, owned by one fold.
#[derive(Debug)]
pub struct FittedStage {
    fitted: Vec<BoxedFittedTransform>,
}

impl FittedStage {
    /// Applies the learned parameters, in order, to other rows of the same schema.
    pub fn apply(&self, rows: &FeatureTable) -> Result<FeatureTable, TransformError> {
        let mut current = rows.clone();
        for state in &self.fitted {
            current = state.apply(&current)?;
        }
        Ok(current)
    }

    /// Names of every column removed by the chain.
    #[must_use]
    pub fn dropped_columns(&self) -> BTreeSet<&str> {
        self.fitted
            .iter()
            .flat_map(|state| state.dropped_columns())
            .map(String::as_str)
            .collect()
    }
}
