use toxsel_cohort::{feature::CatalogError, table::CohortError};
use toxsel_partition::PartitionError;

use crate::{config::ConfigError, transform::TransformError};

/// Data failure confined to one fold.
#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum FoldError {
    #[display("fold {fold_index}: {source}")]
    Transform {
        fold_index: usize,
        source: TransformError,
    },
    #[display("fold {fold_index} has no training rows")]
    EmptyTraining { fold_index: usize },
    #[display("fold {fold_index} worker panicked")]
    Panicked { fold_index: usize },
}

impl FoldError {
    #[must_use]
    pub fn fold_index(&self) -> usize {
        match self {
            Self::Transform { fold_index, .. }
            | Self::EmptyTraining { fold_index }
            | Self::Panicked { fold_index } => *fold_index,
        }
    }
}

#[derive(Debug, derive_more::Display, derive_more::Error, derive_more::From)]
pub enum SelectionError {
    #[display("invalid configuration: {_0}")]
    #[from]
    Config(ConfigError),
    #[display("invalid cohort: {_0}")]
    #[from]
    Cohort(CohortError),
    #[display("invalid feature catalog: {_0}")]
    #[from]
    Catalog(CatalogError),
    #[display("{_0}")]
    #[from]
    Partition(PartitionError),
    #[display("aborting under fail-fast policy: {source}")]
    FoldFailed { source: FoldError },
    #[display("all {n_folds} folds failed")]
    AllFoldsFailed { n_folds: usize },
    #[display("transform fitted on the full training partition failed: {source}")]
    Holdout { source: TransformError },
}
