//! Nested, leakage-free univariate feature selection.
//!
//! A [`SelectionPipeline`](pipeline::SelectionPipeline) labels the cohort,
//! partitions it by patient, and then screens every feature inside each inner
//! fold using only that fold's training rows:
//!
//! 1. [`transform`] fits imputation and filtering parameters per fold.
//! 2. [`screen`] runs one univariate test per feature.
//! 3. [`correct`] applies Benjamini–Hochberg at one or two FDR levels.
//! 4. [`stability`] counts how often each feature was selected across folds.
//!
//! The [`reference`] table is computed on the whole training partition for
//! plotting and is kept apart from every selection result.
//!
//! # Examples
//!
//! ```
//! use toxsel_cohort::{
//!     PatientId,
//!     feature::{FeatureKind, FeatureSpec},
//!     table::{CohortTable, FeatureColumn, FeatureTable, GradeColumn},
//! };
//! use toxsel_selection::{config::RunConfig, pipeline::SelectionPipeline};
//!
//! let ids = (0..30).map(|i| PatientId::new(format!("p{i:02}"))).collect();
//! let crp = (0..30)
//!     .map(|i| Some(if i % 3 == 0 { 80.0 + f64::from(i) } else { f64::from(i) }))
//!     .collect();
//! let features = FeatureTable::new(
//!     ids,
//!     vec![FeatureColumn::numeric(FeatureSpec::new("crp_max", FeatureKind::Numeric), crp)],
//! )
//! .unwrap();
//! let grades = vec![GradeColumn {
//!     name: "crs".to_owned(),
//!     threshold: 2.0,
//!     values: (0..30).map(|i| Some(if i % 3 == 0 { 3.0 } else { 0.0 })).collect(),
//! }];
//! let cohort = CohortTable::new(features, grades).unwrap();
//!
//! let config = RunConfig {
//!     n_folds: 3,
//!     ..RunConfig::default()
//! };
//! let report = SelectionPipeline::new(config).unwrap().run(&cohort).unwrap();
//! assert_eq!(report.folds.len(), 3);
//! assert_eq!(report.final_features, ["crp_max"]);
//! ```

pub mod config;
pub mod correct;
pub mod error;
pub mod pipeline;
pub mod reference;
pub mod screen;
pub mod stability;
pub mod transform;
