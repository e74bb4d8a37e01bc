use std::collections::BTreeMap;

use serde::Serialize;
use toxsel_cohort::{Label, PatientId, label::PatientLabels};

use crate::{
    Fold, GroupStratifiedKFold, GroupStratifiedSplitter, OuterSplit, PartitionError,
    verify::verify_partition,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FoldSummary {
    pub index: usize,
    pub train_size: usize,
    pub validation_size: usize,
    pub train_positive: usize,
    pub validation_positive: usize,
}

/// Split metadata handed to the reporting side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionSummary {
    pub method: &'static str,
    pub seed: u64,
    pub test_fraction: f64,
    pub n_folds: usize,
    pub total_patients: usize,
    pub train_patients: usize,
    pub test_patients: usize,
    pub train_positive: usize,
    pub test_positive: usize,
    pub undefined_labels: usize,
    pub folds: Vec<FoldSummary>,
}

/// Outer split plus the inner folds of its train side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionPlan {
    pub outer: OuterSplit,
    pub folds: Vec<Fold>,
    pub summary: PartitionSummary,
}

/// Runs the outer split, then the inner k-fold on the outer train side only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartitionPlanner {
    splitter: GroupStratifiedSplitter,
    kfold: GroupStratifiedKFold,
    seed: u64,
}

impl PartitionPlanner {
    pub fn new(test_fraction: f64, n_folds: usize, seed: u64) -> Result<Self, PartitionError> {
        Ok(Self {
            splitter: GroupStratifiedSplitter::new(test_fraction, seed)?,
            kfold: GroupStratifiedKFold::new(n_folds, seed)?,
            seed,
        })
    }

    /// Partitions every patient with a defined label.
    ///
    /// Fails before building any fold when a class of the training side is
    /// smaller than the fold count, and verifies the finished partition.
    pub fn plan(&self, labels: &PatientLabels) -> Result<PartitionPlan, PartitionError> {
        let outer = self.splitter.split(labels.labels())?;
        let train_labels = labels.restrict(&outer.train);

        let k = self.kfold.n_folds();
        let (minority_label, minority_count) = GroupStratifiedKFold::minority(&train_labels);
        if minority_count < k {
            return Err(PartitionError::InsufficientClassSize {
                label: minority_label,
                count: minority_count,
                required: k,
                context: format!("{k}-fold stratification of the training partition"),
            });
        }

        let folds = self.kfold.split(&train_labels)?;
        verify_partition(labels.labels(), &outer, &folds)?;

        let summary = self.summarize(labels, &outer, &folds);
        log::info!(
            "partitioned {} patients into {} train / {} test, {} folds",
            summary.total_patients,
            summary.train_patients,
            summary.test_patients,
            summary.n_folds
        );
        Ok(PartitionPlan {
            outer,
            folds,
            summary,
        })
    }

    fn summarize(
        &self,
        labels: &PatientLabels,
        outer: &OuterSplit,
        folds: &[Fold],
    ) -> PartitionSummary {
        let positives = |patients: &[PatientId]| count_positive(labels.labels(), patients);
        PartitionSummary {
            method: "group_stratified",
            seed: self.seed,
            test_fraction: self.splitter.test_fraction(),
            n_folds: folds.len(),
            total_patients: labels.len(),
            train_patients: outer.train.len(),
            test_patients: outer.test.len(),
            train_positive: positives(&outer.train),
            test_positive: positives(&outer.test),
            undefined_labels: labels.undefined().len(),
            folds: folds
                .iter()
                .map(|fold| FoldSummary {
                    index: fold.index,
                    train_size: fold.train.len(),
                    validation_size: fold.validation.len(),
                    train_positive: positives(&fold.train),
                    validation_positive: positives(&fold.validation),
                })
                .collect(),
        }
    }
}

fn count_positive(labels: &BTreeMap<PatientId, Label>, patients: &[PatientId]) -> usize {
    patients
        .iter()
        .filter(|p| labels.get(*p).is_some_and(|l| l.is_positive()))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(negatives: usize, positives: usize) -> PatientLabels {
        PatientLabels::from_labels(
            (0..negatives + positives)
                .map(|i| {
                    let label = if i < negatives {
                        Label::Negative
                    } else {
                        Label::Positive
                    };
                    (PatientId::new(format!("p{i:02}")), label)
                })
                .collect(),
        )
    }

    #[test]
    fn test_small_training_minority_is_insufficient() {
        // 6 negative / 4 positive at 0.3 leaves 4 negative / 3 positive in training
        let err = PartitionPlanner::new(0.3, 5, 42)
            .unwrap()
            .plan(&labels(6, 4))
            .unwrap_err();
        assert_eq!(
            err,
            PartitionError::InsufficientClassSize {
                label: Label::Positive,
                count: 3,
                required: 5,
                context: "5-fold stratification of the training partition".to_owned(),
            }
        );
        assert_eq!(
            err.to_string(),
            "class 1 has 3 patient(s), need >= 5 for 5-fold stratification of the training partition"
        );
    }

    #[test]
    fn test_plan_properties() {
        let labels = labels(40, 20);
        let plan = PartitionPlanner::new(0.3, 5, 11)
            .unwrap()
            .plan(&labels)
            .unwrap();
        assert_eq!(plan.outer.train.len() + plan.outer.test.len(), 60);
        assert_eq!(plan.folds.len(), 5);
        for fold in &plan.folds {
            assert!(fold.validation.iter().all(|p| plan.outer.train.contains(p)));
            assert!(fold.train.iter().all(|p| plan.outer.train.contains(p)));
        }
        assert_eq!(plan.summary.test_positive, 6);
        assert_eq!(plan.summary.train_positive, 14);
        assert_eq!(
            plan.summary
                .folds
                .iter()
                .map(|f| f.validation_size)
                .sum::<usize>(),
            plan.outer.train.len()
        );
    }

    #[test]
    fn test_summary_serializes() {
        let plan = PartitionPlanner::new(0.25, 2, 1)
            .unwrap()
            .plan(&labels(8, 8))
            .unwrap();
        let json = serde_json::to_value(&plan.summary).unwrap();
        assert_eq!(json["method"], "group_stratified");
        assert_eq!(json["n_folds"], 2);
        assert_eq!(json["test_patients"], 4);
    }
}
