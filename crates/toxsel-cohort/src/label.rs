//! Per-patient label derivation
//!
//! [`GroupAggregator`] collapses a multi-row cohort into one binary label per
//! patient. For every grade column the patient's worst (maximum) non-missing
//! grade is compared with that column's threshold. Labels are computed once,
//! on the whole cohort, before any partitioning.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{
    Label, PatientId,
    diagnostics::{DiagnosticEvent, Diagnostics, ReasonCode, Stage},
    table::{CohortError, CohortTable, GradeColumn},
};

/// Which grade columns contribute to the label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum LabelRule {
    /// Positive if any toxicity type with a valid grade is positive.
    #[default]
    AnyOf,
    /// Only the named grade column is used.
    Single { grade: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GradeCounts {
    pub negative: usize,
    pub positive: usize,
    pub missing: usize,
}

impl GradeCounts {
    fn record(&mut self, label: Option<Label>) {
        match label {
            Some(Label::Negative) => self.negative += 1,
            Some(Label::Positive) => self.positive += 1,
            None => self.missing += 1,
        }
    }
}

/// Label counts per grade column and for the combined rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabelSummary {
    pub per_grade: BTreeMap<String, GradeCounts>,
    pub combined: GradeCounts,
}

/// Output of [`GroupAggregator::aggregate`].
#[derive(Debug, Clone, PartialEq)]
pub struct PatientLabels {
    labels: BTreeMap<PatientId, Label>,
    undefined: Vec<PatientId>,
    summary: LabelSummary,
}

impl PatientLabels {
    /// Builds labels directly, e.g. from an upstream labeling step.
    #[must_use]
    pub fn from_labels(labels: BTreeMap<PatientId, Label>) -> Self {
        let mut combined = GradeCounts::default();
        for label in labels.values() {
            combined.record(Some(*label));
        }
        Self {
            labels,
            undefined: vec![],
            summary: LabelSummary {
                per_grade: BTreeMap::new(),
                combined,
            },
        }
    }

    /// Patients with a defined label, ordered by id.
    #[must_use]
    pub fn labels(&self) -> &BTreeMap<PatientId, Label> {
        &self.labels
    }

    #[must_use]
    pub fn get(&self, patient_id: &PatientId) -> Option<Label> {
        self.labels.get(patient_id).copied()
    }

    /// Patients without any valid grade observation; never partitioned.
    #[must_use]
    pub fn undefined(&self) -> &[PatientId] {
        &self.undefined
    }

    #[must_use]
    pub fn summary(&self) -> &LabelSummary {
        &self.summary
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Restricts the labels to the given patients.
    #[must_use]
    pub fn restrict<'a, I>(&self, patients: I) -> BTreeMap<PatientId, Label>
    where
        I: IntoIterator<Item = &'a PatientId>,
    {
        patients
            .into_iter()
            .filter_map(|p| self.labels.get(p).map(|l| (p.clone(), *l)))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct GroupAggregator {
    rule: LabelRule,
}

impl GroupAggregator {
    #[must_use]
    pub fn new(rule: LabelRule) -> Self {
        Self { rule }
    }

    #[must_use]
    pub fn rule(&self) -> &LabelRule {
        &self.rule
    }

    /// Derives one label per patient.
    ///
    /// Patients with no valid grade in any contributing column are returned in
    /// [`PatientLabels::undefined`] and reported as `value_missing` events.
    pub fn aggregate(
        &self,
        cohort: &CohortTable,
        diagnostics: &mut Diagnostics,
    ) -> Result<PatientLabels, CohortError> {
        let grades = match &self.rule {
            LabelRule::AnyOf => cohort.grades().iter().collect::<Vec<_>>(),
            LabelRule::Single { grade } => {
                vec![
                    cohort
                        .grade(grade)
                        .ok_or_else(|| CohortError::UnknownGrade {
                            name: grade.clone(),
                        })?,
                ]
            }
        };

        let patients = cohort
            .row_patients()
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>();
        let worst = grades
            .iter()
            .map(|grade| worst_grades(cohort.row_patients(), grade))
            .collect::<Vec<_>>();

        let mut labels = BTreeMap::new();
        let mut undefined = vec![];
        let mut summary = LabelSummary::default();
        for patient in patients {
            let mut combined = None;
            for (grade, worst) in grades.iter().zip(&worst) {
                let label = worst
                    .get(&patient)
                    .map(|&g| Label::from_grade(g, grade.threshold));
                summary
                    .per_grade
                    .entry(grade.name.clone())
                    .or_default()
                    .record(label);
                combined = match (combined, label) {
                    (Some(Label::Positive), _) | (_, Some(Label::Positive)) => {
                        Some(Label::Positive)
                    }
                    (Some(Label::Negative), _) | (_, Some(Label::Negative)) => {
                        Some(Label::Negative)
                    }
                    (None, None) => None,
                };
            }
            summary.combined.record(combined);
            match combined {
                Some(label) => {
                    labels.insert(patient, label);
                }
                None => {
                    diagnostics.push(
                        DiagnosticEvent::new(
                            ReasonCode::ValueMissing,
                            Stage::Labeling,
                            "no valid grade observation; label undefined",
                        )
                        .patient(&patient),
                    );
                    undefined.push(patient);
                }
            }
        }

        if !undefined.is_empty() {
            log::warn!(
                "{} patient(s) have an undefined label and are excluded from splitting",
                undefined.len()
            );
        }
        log::info!(
            "labeled {} patients: {} negative, {} positive",
            labels.len(),
            summary.combined.negative,
            summary.combined.positive
        );

        Ok(PatientLabels {
            labels,
            undefined,
            summary,
        })
    }
}

fn worst_grades(row_patients: &[PatientId], grade: &GradeColumn) -> BTreeMap<PatientId, f64> {
    let mut worst = BTreeMap::<PatientId, f64>::new();
    for (patient, value) in row_patients.iter().zip(&grade.values) {
        let Some(value) = value.filter(|v| !v.is_nan()) else {
            continue;
        };
        worst
            .entry(patient.clone())
            .and_modify(|w| *w = w.max(value))
            .or_insert(value);
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::FeatureTable;

    fn cohort(rows: &[(&str, Option<f64>, Option<f64>)]) -> CohortTable {
        let ids = rows.iter().map(|r| PatientId::from(r.0)).collect::<Vec<_>>();
        let features = FeatureTable::new(ids, vec![]).unwrap();
        let grades = vec![
            GradeColumn {
                name: "crs".to_owned(),
                threshold: 2.0,
                values: rows.iter().map(|r| r.1).collect(),
            },
            GradeColumn {
                name: "icans".to_owned(),
                threshold: 1.0,
                values: rows.iter().map(|r| r.2).collect(),
            },
        ];
        CohortTable::new(features, grades).unwrap()
    }

    #[test]
    fn test_worst_grade_over_rows() {
        let cohort = cohort(&[
            ("a", Some(1.0), None),
            ("a", Some(3.0), None),
            ("b", Some(2.0), Some(0.0)),
        ]);
        let mut diagnostics = Diagnostics::new();
        let labels = GroupAggregator::new(LabelRule::Single {
            grade: "crs".to_owned(),
        })
        .aggregate(&cohort, &mut diagnostics)
        .unwrap();
        assert_eq!(labels.get(&"a".into()), Some(Label::Positive));
        // grade equal to the threshold stays negative
        assert_eq!(labels.get(&"b".into()), Some(Label::Negative));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_any_of_is_logical_or() {
        let cohort = cohort(&[("a", Some(1.0), Some(2.0)), ("b", None, Some(0.0))]);
        let labels = GroupAggregator::default()
            .aggregate(&cohort, &mut Diagnostics::new())
            .unwrap();
        assert_eq!(labels.get(&"a".into()), Some(Label::Positive));
        assert_eq!(labels.get(&"b".into()), Some(Label::Negative));
        assert_eq!(labels.summary().per_grade["crs"].missing, 1);
    }

    #[test]
    fn test_undefined_patients_are_reported() {
        let cohort = cohort(&[("a", None, None), ("a", None, None), ("b", Some(4.0), None)]);
        let mut diagnostics = Diagnostics::new();
        let labels = GroupAggregator::default()
            .aggregate(&cohort, &mut diagnostics)
            .unwrap();
        assert_eq!(labels.undefined(), &[PatientId::from("a")]);
        assert_eq!(labels.len(), 1);
        assert_eq!(labels.summary().combined.missing, 1);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics.iter().next().unwrap().reason,
            ReasonCode::ValueMissing
        );
    }

    #[test]
    fn test_unknown_grade_rejected() {
        let cohort = cohort(&[("a", Some(1.0), None)]);
        let err = GroupAggregator::new(LabelRule::Single {
            grade: "nope".to_owned(),
        })
        .aggregate(&cohort, &mut Diagnostics::new())
        .unwrap_err();
        assert!(matches!(err, CohortError::UnknownGrade { .. }));
    }

    #[test]
    fn test_rule_deserializes() {
        let rule: LabelRule =
            serde_json::from_str(r#"{"rule":"single","grade":"crs"}"#).unwrap();
        assert_eq!(
            rule,
            LabelRule::Single {
                grade: "crs".to_owned()
            }
        );
    }
}
