//! Cohort data model for patient-level feature selection.
//!
//! A cohort is a column-oriented table whose rows each belong to one patient.
//! This crate validates the table, derives one binary label per patient and
//! turns time series into per-patient static features. It knows nothing about
//! partitions or folds.
//!
//! # Modules
//!
//! - [`feature`]: Declared feature kinds and screening tests
//! - [`table`]: Feature, grade and cohort tables
//! - [`label`]: Worst-grade label aggregation ([`GroupAggregator`](label::GroupAggregator))
//! - [`window`]: Observation-window aggregation of time series
//! - [`diagnostics`]: Structured events for missing data
//! - [`input`]: The serialized cohort document
//!
//! # Examples
//!
//! ```
//! use toxsel_cohort::{
//!     Label, PatientId,
//!     diagnostics::Diagnostics,
//!     label::{GroupAggregator, LabelRule},
//!     table::{CohortTable, FeatureTable, GradeColumn},
//! };
//!
//! let ids = ["a", "a", "b"].map(PatientId::from).to_vec();
//! let features = FeatureTable::new(ids, vec![]).unwrap();
//! let grades = vec![GradeColumn {
//!     name: "crs".to_owned(),
//!     threshold: 2.0,
//!     values: vec![Some(1.0), Some(3.0), Some(2.0)],
//! }];
//! let cohort = CohortTable::new(features, grades).unwrap();
//!
//! let labels = GroupAggregator::new(LabelRule::AnyOf)
//!     .aggregate(&cohort, &mut Diagnostics::new())
//!     .unwrap();
//! assert_eq!(labels.get(&PatientId::from("a")), Some(Label::Positive));
//! assert_eq!(labels.get(&PatientId::from("b")), Some(Label::Negative));
//! ```

pub use self::patient::*;

pub mod diagnostics;
pub mod feature;
pub mod input;
pub mod label;
mod patient;
pub mod table;
pub mod window;
