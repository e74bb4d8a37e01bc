use std::collections::BTreeMap;

use rand::{SeedableRng as _, seq::SliceRandom as _};
use rand_pcg::Pcg32;
use serde::Serialize;
use toxsel_cohort::{Label, PatientId};

use crate::{PartitionError, split::group_by_label};

/// One inner fold: validation patients and their training complement, both sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fold {
    /// Zero-based fold position.
    pub index: usize,
    pub train: Vec<PatientId>,
    pub validation: Vec<PatientId>,
}

/// Stratified k-fold over the training patients only.
///
/// Each class is shuffled with a generator seeded from `seed` and its patients
/// are dealt round-robin onto the folds, continuing where the previous class
/// stopped. Per class, fold counts differ by at most one, and fold sizes differ
/// by at most one overall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupStratifiedKFold {
    n_folds: usize,
    seed: u64,
}

impl GroupStratifiedKFold {
    pub fn new(n_folds: usize, seed: u64) -> Result<Self, PartitionError> {
        if n_folds < 2 {
            return Err(PartitionError::InvalidFoldCount { k: n_folds });
        }
        Ok(Self { n_folds, seed })
    }

    #[must_use]
    pub fn n_folds(&self) -> usize {
        self.n_folds
    }

    /// Minority class and its size among the given patients.
    #[must_use]
    pub fn minority(labels: &BTreeMap<PatientId, Label>) -> (Label, usize) {
        let classes = group_by_label(labels);
        Label::ALL
            .into_iter()
            .map(|label| (label, classes[label.as_index()].len()))
            .min_by_key(|&(_, count)| count)
            .unwrap_or((Label::Positive, 0))
    }

    /// Builds `k` folds whose validation sets partition `train_labels`.
    ///
    /// The caller must pass only training patients; the folds never see anything else.
    pub fn split(
        &self,
        train_labels: &BTreeMap<PatientId, Label>,
    ) -> Result<Vec<Fold>, PartitionError> {
        let (minority_label, minority_count) = Self::minority(train_labels);
        if minority_count < self.n_folds {
            return Err(PartitionError::DegenerateFold {
                k: self.n_folds,
                minority_label,
                minority_count,
            });
        }

        let mut rng = Pcg32::seed_from_u64(self.seed);
        let mut validation = vec![vec![]; self.n_folds];
        let mut next = 0;
        for mut members in group_by_label(train_labels) {
            members.shuffle(&mut rng);
            for patient in members {
                validation[next % self.n_folds].push(patient);
                next += 1;
            }
        }

        let folds = validation
            .into_iter()
            .enumerate()
            .map(|(index, mut validation)| {
                validation.sort_unstable();
                let train = train_labels
                    .keys()
                    .filter(|p| validation.binary_search(*p).is_err())
                    .cloned()
                    .collect();
                Fold {
                    index,
                    train,
                    validation,
                }
            })
            .collect::<Vec<_>>();

        for fold in &folds {
            log::debug!(
                "fold {}: {} train / {} validation patients",
                fold.index,
                fold.train.len(),
                fold.validation.len()
            );
        }
        Ok(folds)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn cohort(negatives: usize, positives: usize) -> BTreeMap<PatientId, Label> {
        (0..negatives + positives)
            .map(|i| {
                let label = if i < negatives {
                    Label::Negative
                } else {
                    Label::Positive
                };
                (PatientId::new(format!("t{i:03}")), label)
            })
            .collect()
    }

    #[test]
    fn test_requires_two_folds() {
        assert_eq!(
            GroupStratifiedKFold::new(1, 0),
            Err(PartitionError::InvalidFoldCount { k: 1 })
        );
    }

    #[test]
    fn test_validation_sets_partition_training() {
        let labels = cohort(23, 9);
        for seed in 0..10 {
            let folds = GroupStratifiedKFold::new(4, seed)
                .unwrap()
                .split(&labels)
                .unwrap();
            assert_eq!(folds.len(), 4);
            let mut seen = BTreeSet::new();
            for fold in &folds {
                for patient in &fold.validation {
                    assert!(seen.insert(patient.clone()), "{patient} in two folds");
                    assert!(labels.contains_key(patient));
                }
                assert_eq!(fold.train.len() + fold.validation.len(), labels.len());
                assert!(fold.train.iter().all(|p| !fold.validation.contains(p)));
            }
            assert_eq!(seen.len(), labels.len());
        }
    }

    #[test]
    fn test_folds_are_stratified() {
        let labels = cohort(23, 9);
        let folds = GroupStratifiedKFold::new(4, 5)
            .unwrap()
            .split(&labels)
            .unwrap();
        for fold in &folds {
            let positives = fold
                .validation
                .iter()
                .filter(|p| labels[*p] == Label::Positive)
                .count();
            assert!((2..=3).contains(&positives));
            assert_eq!(fold.validation.len(), 8);
        }
    }

    #[test]
    fn test_k_above_minority_is_degenerate() {
        let err = GroupStratifiedKFold::new(5, 0)
            .unwrap()
            .split(&cohort(4, 3))
            .unwrap_err();
        assert_eq!(
            err,
            PartitionError::DegenerateFold {
                k: 5,
                minority_label: Label::Positive,
                minority_count: 3,
            }
        );
    }

    #[test]
    fn test_deterministic_for_seed() {
        let labels = cohort(15, 10);
        let kfold = GroupStratifiedKFold::new(5, 42).unwrap();
        assert_eq!(kfold.split(&labels).unwrap(), kfold.split(&labels).unwrap());
    }
}
