use std::collections::{BTreeMap, BTreeSet};

use toxsel_cohort::{Label, PatientId};

use crate::{Fold, OuterSplit, PartitionError};

/// Checks the patient-level partition properties and names the first violating patient.
///
/// - train and test are disjoint and together cover exactly the labeled patients
/// - every fold's validation set lies inside the outer train side
/// - every fold's train and validation sets are disjoint and cover the outer train side
/// - every outer train patient is validated in exactly one fold
pub fn verify_partition(
    labels: &BTreeMap<PatientId, Label>,
    outer: &OuterSplit,
    folds: &[Fold],
) -> Result<(), PartitionError> {
    let train = unique(&outer.train, "listed twice in the outer train side")?;
    let test = unique(&outer.test, "listed twice in the outer test side")?;

    if let Some(patient) = train.intersection(&test).next() {
        return leak(patient, "assigned to both train and test");
    }
    if let Some(patient) = labels
        .keys()
        .find(|p| !train.contains(p) && !test.contains(p))
    {
        return leak(patient, "labeled but assigned to neither side");
    }
    if let Some(patient) = train.union(&test).find(|p| !labels.contains_key(**p)) {
        return leak(patient, "partitioned without a defined label");
    }

    let mut validated = BTreeMap::<&PatientId, usize>::new();
    for fold in folds {
        let context = |what: &str| format!("{what} in fold {}", fold.index);
        let fold_train = unique(&fold.train, &context("listed twice in the train set"))?;
        let validation = unique(&fold.validation, &context("listed twice in the validation set"))?;

        if let Some(patient) = validation.iter().find(|p| test.contains(*p)) {
            return leak(patient, &context("test patient used for validation"));
        }
        if let Some(patient) = fold_train.iter().find(|p| test.contains(*p)) {
            return leak(patient, &context("test patient used for training"));
        }
        if let Some(patient) = fold_train.intersection(&validation).next() {
            return leak(patient, &context("both trained on and validated"));
        }
        if let Some(patient) = train
            .iter()
            .find(|p| !fold_train.contains(*p) && !validation.contains(*p))
        {
            return leak(patient, &context("outer train patient missing"));
        }
        if let Some(patient) = fold_train.iter().find(|p| !train.contains(*p)) {
            return leak(patient, &context("unknown patient"));
        }
        if let Some(patient) = validation.iter().find(|p| !train.contains(*p)) {
            return leak(patient, &context("unknown patient"));
        }
        for patient in validation {
            *validated.entry(patient).or_default() += 1;
        }
    }

    if !folds.is_empty() {
        for patient in &train {
            match validated.get(patient).copied() {
                Some(1) => {}
                Some(n) => return leak(patient, &format!("validated in {n} folds")),
                None => return leak(patient, "never validated in any fold"),
            }
        }
    }
    Ok(())
}

fn unique<'a>(
    patients: &'a [PatientId],
    detail: &str,
) -> Result<BTreeSet<&'a PatientId>, PartitionError> {
    let mut set = BTreeSet::new();
    for patient in patients {
        if !set.insert(patient) {
            return leak(patient, detail);
        }
    }
    Ok(set)
}

fn leak<T>(patient_id: &PatientId, detail: &str) -> Result<T, PartitionError> {
    Err(PartitionError::Leakage {
        patient_id: patient_id.clone(),
        detail: detail.to_owned(),
    })
}
