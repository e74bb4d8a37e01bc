use std::collections::BTreeMap;

use rand::{SeedableRng as _, seq::SliceRandom as _};
use rand_pcg::Pcg32;
use serde::Serialize;
use toxsel_cohort::{Label, PatientId};

use crate::PartitionError;

/// Side of the outer partition a patient belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Train,
    Test,
}

/// Outer train/test partition of patient ids, each side sorted by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OuterSplit {
    pub train: Vec<PatientId>,
    pub test: Vec<PatientId>,
}

impl OuterSplit {
    /// Side of the given patient, `None` if it was never partitioned.
    #[must_use]
    pub fn side(&self, patient_id: &PatientId) -> Option<Side> {
        if self.train.binary_search(patient_id).is_ok() {
            Some(Side::Train)
        } else if self.test.binary_search(patient_id).is_ok() {
            Some(Side::Test)
        } else {
            None
        }
    }

    /// Patient-to-side mapping; every row of a patient inherits its entry.
    #[must_use]
    pub fn assignments(&self) -> BTreeMap<PatientId, Side> {
        self.train
            .iter()
            .map(|p| (p.clone(), Side::Train))
            .chain(self.test.iter().map(|p| (p.clone(), Side::Test)))
            .collect()
    }
}

/// Stratified train/test split at patient granularity.
///
/// Patients are grouped by label and each class is shuffled independently
/// with a generator seeded from `seed`; the first `round(n_c * test_fraction)`
/// patients of class `c` go to the test side. Each class keeps at least one
/// patient on both sides, so a class with fewer than two patients cannot be
/// stratified and is rejected.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use toxsel_cohort::{Label, PatientId};
/// use toxsel_partition::GroupStratifiedSplitter;
///
/// let labels = (0..10)
///     .map(|i| (PatientId::new(format!("p{i:02}")), if i < 4 { Label::Positive } else { Label::Negative }))
///     .collect::<BTreeMap<_, _>>();
/// let split = GroupStratifiedSplitter::new(0.3, 42).unwrap().split(&labels).unwrap();
/// assert_eq!(split.test.len(), 3);
/// assert_eq!(split.train.len(), 7);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupStratifiedSplitter {
    test_fraction: f64,
    seed: u64,
}

impl GroupStratifiedSplitter {
    pub fn new(test_fraction: f64, seed: u64) -> Result<Self, PartitionError> {
        if test_fraction > 0.0 && test_fraction < 1.0 {
            Ok(Self {
                test_fraction,
                seed,
            })
        } else {
            Err(PartitionError::InvalidTestFraction { test_fraction })
        }
    }

    #[must_use]
    pub fn test_fraction(&self) -> f64 {
        self.test_fraction
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Splits the labeled patients; a pure function of `(labels, test_fraction, seed)`.
    pub fn split(&self, labels: &BTreeMap<PatientId, Label>) -> Result<OuterSplit, PartitionError> {
        let classes = group_by_label(labels);
        for (label, members) in Label::ALL.iter().zip(&classes) {
            if members.len() < 2 {
                return Err(PartitionError::InsufficientClassSize {
                    label: *label,
                    count: members.len(),
                    required: 2,
                    context: "a stratified train/test split".to_owned(),
                });
            }
        }

        let mut rng = Pcg32::seed_from_u64(self.seed);
        let mut train = vec![];
        let mut test = vec![];
        for mut members in classes {
            members.shuffle(&mut rng);
            let n_test = self.test_count(members.len());
            test.extend(members.drain(..n_test));
            train.extend(members);
        }
        train.sort_unstable();
        test.sort_unstable();

        log::info!(
            "outer split (seed {}): {} train / {} test patients",
            self.seed,
            train.len(),
            test.len()
        );
        Ok(OuterSplit { train, test })
    }

    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    fn test_count(&self, class_size: usize) -> usize {
        let n_test = (class_size as f64 * self.test_fraction).round() as usize;
        n_test.clamp(1, class_size - 1)
    }
}

/// Patient ids per class, indexed by [`Label::as_index`], each sorted by id.
pub(crate) fn group_by_label(labels: &BTreeMap<PatientId, Label>) -> [Vec<PatientId>; 2] {
    let mut classes = [vec![], vec![]];
    for (patient, label) in labels {
        classes[label.as_index()].push(patient.clone());
    }
    classes
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
                (PatientId::new(format!("p{i:03}")), label)
            })
            .collect()
    }

    #[test]
    fn test_rejects_invalid_fraction() {
        assert!(GroupStratifiedSplitter::new(0.0, 1).is_err());
        assert!(GroupStratifiedSplitter::new(1.0, 1).is_err());
        assert!(GroupStratifiedSplitter::new(0.5, 1).is_ok());
    }

    #[test]
    fn test_disjoint_and_covering() {
        let labels = cohort(37, 13);
        for seed in 0..20 {
            let split = GroupStratifiedSplitter::new(0.25, seed)
                .unwrap()
                .split(&labels)
                .unwrap();
            let train = split.train.iter().collect::<BTreeSet<_>>();
            let test = split.test.iter().collect::<BTreeSet<_>>();
            assert!(train.is_disjoint(&test));
            assert_eq!(train.len() + test.len(), labels.len());
            let assignments = split.assignments();
            assert_eq!(assignments.len(), labels.len());
            assert!(labels.keys().all(|p| split.side(p) == assignments.get(p).copied()));
            assert!(split.test.iter().all(|p| assignments[p] == Side::Test));
        }
    }

    #[test]
    fn test_class_proportions_preserved() {
        let labels = cohort(60, 20);
        let split = GroupStratifiedSplitter::new(0.3, 7)
            .unwrap()
            .split(&labels)
            .unwrap();
        let test_positives = split
            .test
            .iter()
            .filter(|p| labels[*p] == Label::Positive)
            .count();
        assert_eq!(split.test.len(), 24);
        assert_eq!(test_positives, 6);
    }

    #[test]
    fn test_deterministic_for_seed() {
        let labels = cohort(30, 12);
        let splitter = GroupStratifiedSplitter::new(0.3, 42).unwrap();
        assert_eq!(splitter.split(&labels).unwrap(), splitter.split(&labels).unwrap());
        let other = GroupStratifiedSplitter::new(0.3, 43).unwrap();
        assert_ne!(splitter.split(&labels).unwrap(), other.split(&labels).unwrap());
    }

    #[test]
    fn test_single_member_class_is_rejected() {
        let err = GroupStratifiedSplitter::new(0.3, 0)
            .unwrap()
            .split(&cohort(9, 1))
            .unwrap_err();
        assert_eq!(
            err,
            PartitionError::InsufficientClassSize {
                label: Label::Positive,
                count: 1,
                required: 2,
                context: "a stratified train/test split".to_owned(),
            }
        );
        assert_eq!(
            err.to_string(),
            "class 1 has 1 patient(s), need >= 2 for a stratified train/test split"
        );
    }

    #[test]
    fn test_tiny_class_keeps_one_on_each_side() {
        let labels = cohort(20, 2);
        let split = GroupStratifiedSplitter::new(0.1, 3)
            .unwrap()
            .split(&labels)
            .unwrap();
        let positives_in_test = split
            .test
            .iter()
            .filter(|p| labels[*p] == Label::Positive)
            .count();
        assert_eq!(positives_in_test, 1);
    }
}
