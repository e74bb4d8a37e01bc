use toxsel_cohort::{Label, PatientId};

/// Fatal partitioning failures.
///
/// No partial partition is ever returned alongside one of these.
#[derive(Debug, Clone, PartialEq, derive_more::Display, derive_more::Error)]
pub enum PartitionError {
    #[display("test fraction must lie in (0, 1), got {test_fraction}")]
    InvalidTestFraction { test_fraction: f64 },
    #[display("fold count must be at least 2, got {k}")]
    InvalidFoldCount { k: usize },
    #[display("class {label} has {count} patient(s), need >= {required} for {context}")]
    InsufficientClassSize {
        label: Label,
        count: usize,
        required: usize,
        context: String,
    },
    #[display(
        "{k} folds requested but minority class {minority_label} has only {minority_count} patient(s)"
    )]
    DegenerateFold {
        k: usize,
        minority_label: Label,
        minority_count: usize,
    },
    #[display("patient '{patient_id}' leaks across partitions: {detail}")]
    Leakage {
        patient_id: PatientId,
        detail: String,
    },
}
