//! Patient-level stratified partitioning.
//!
//! Every decision here is made per patient, never per row: a patient's rows
//! always land on the same side of every split. The outer split reserves a test
//! set; the inner folds are built afterwards from the outer train side alone.
//!
//! All randomness comes from explicitly seeded [`rand_pcg::Pcg32`] generators,
//! and patients are visited in id order, so a partition is a pure function of
//! the labels, the parameters and the seed.
//!
//! # Examples
//!
//! ```
//! use std::collections::BTreeMap;
//! use toxsel_cohort::{Label, PatientId, label::PatientLabels};
//! use toxsel_partition::PartitionPlanner;
//!
//! let labels = PatientLabels::from_labels(
//!     (0..30)
//!         .map(|i| (PatientId::new(format!("p{i:02}")), if i % 3 == 0 { Label::Positive } else { Label::Negative }))
//!         .collect::<BTreeMap<_, _>>(),
//! );
//! let plan = PartitionPlanner::new(0.3, 3, 42).unwrap().plan(&labels).unwrap();
//! assert_eq!(plan.outer.train.len() + plan.outer.test.len(), 30);
//! assert_eq!(plan.folds.len(), 3);
//! ```

pub use self::{error::*, kfold::*, plan::*, split::*, verify::*};

mod error;
mod kfold;
mod plan;
mod split;
mod verify;
