//! End-to-end selection run
//!
//! Labels are derived once on the whole cohort, the patients are partitioned,
//! and every inner fold then runs transform, screening and correction on its
//! own training rows in a scoped worker thread. The folds share nothing but a
//! read-only borrow of the training partition; their results are joined in
//! fold order before stability scores are computed.

use std::{
    collections::{BTreeMap, BTreeSet},
    thread,
};

use serde::Serialize;
use toxsel_cohort::{
    Label, PatientId,
    diagnostics::{DiagnosticEvent, Diagnostics, ReasonCode, Stage},
    label::{GroupAggregator, LabelSummary, PatientLabels},
    table::{CohortTable, FeatureTable},
};
use toxsel_partition::{Fold, PartitionPlan, PartitionPlanner, Side};
use toxsel_stats::fdr::BenjaminiHochberg;

use crate::{
    config::{ConfigError, FailurePolicy, RunConfig},
    correct::{FeatureScoreRecord, MultipleTestingCorrector},
    error::{FoldError, SelectionError},
    reference::{ReferenceOnlyTable, ReferencePass},
    screen::{Degeneracy, UnivariateFeatureScreener},
    stability::{StabilitySelector, StabilityTable},
    transform::LeakSafeTransformStage,
};

/// Outcome of one completed fold.
#[derive(Debug, Clone, Serialize)]
pub struct FoldResult {
    pub fold_index: usize,
    pub train_patients: usize,
    pub validation_patients: usize,
    pub dropped_columns: Vec<String>,
    pub selected_count: usize,
    #[serde(skip)]
    pub records: Vec<FeatureScoreRecord>,
    /// Validation rows transformed with the fold's own parameters.
    #[serde(skip)]
    pub validation: FeatureTable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FoldFailure {
    pub fold_index: usize,
    pub reason: String,
}

/// Parameters learned on the full training partition and applied to the test set.
#[derive(Debug, Clone, Serialize)]
pub struct HoldoutTransform {
    pub dropped_columns: Vec<String>,
    pub train_rows: usize,
    pub test_rows: usize,
    #[serde(skip)]
    pub train: FeatureTable,
    #[serde(skip)]
    pub test: FeatureTable,
}

/// Everything a selection run produces.
#[derive(Debug, Clone, Serialize)]
pub struct SelectionReport {
    pub config: RunConfig,
    pub labels: LabelSummary,
    pub undefined_patients: Vec<PatientId>,
    pub partition: PartitionPlan,
    pub folds: Vec<FoldResult>,
    pub failed_folds: Vec<FoldFailure>,
    pub stability: StabilityTable,
    pub final_features: Vec<String>,
    pub fold_diagnostics: Vec<FeatureScoreRecord>,
    #[serde(rename = "reference_only_not_for_modeling")]
    pub reference: ReferenceOnlyTable,
    pub holdout: HoldoutTransform,
    pub diagnostics: Diagnostics,
}

/// Labels and partition, without any screening.
#[derive(Debug, Clone)]
pub struct PartitionOutcome {
    pub labels: PatientLabels,
    pub plan: PartitionPlan,
    pub diagnostics: Diagnostics,
}

#[derive(Debug)]
pub struct SelectionPipeline {
    config: RunConfig,
    stage: LeakSafeTransformStage,
    corrector: MultipleTestingCorrector,
}

impl SelectionPipeline {
    pub fn new(config: RunConfig) -> Result<Self, SelectionError> {
        config.validate()?;
        let stage = LeakSafeTransformStage::from_specs(&config.transforms);
        let to_level = |q| {
            BenjaminiHochberg::new(q).map_err(|_| ConfigError::OutOfRange {
                name: "fdr level",
                value: q,
            })
        };
        let corrector = MultipleTestingCorrector::new(
            to_level(config.fdr_q)?,
            config.sensitivity_q.map(to_level).transpose()?,
        );
        Ok(Self {
            config,
            stage,
            corrector,
        })
    }

    /// Replaces the transform chain built from the configuration.
    #[must_use]
    pub fn with_stage(mut self, stage: LeakSafeTransformStage) -> Self {
        self.stage = stage;
        self
    }

    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Derives labels and partitions the cohort.
    pub fn partition(&self, cohort: &CohortTable) -> Result<PartitionOutcome, SelectionError> {
        let mut diagnostics = Diagnostics::new();
        let labels = GroupAggregator::new(self.config.label_rule.clone())
            .aggregate(cohort, &mut diagnostics)?;
        let plan = PartitionPlanner::new(
            self.config.test_fraction,
            self.config.n_folds,
            self.config.seed,
        )?
        .plan(&labels)?;
        Ok(PartitionOutcome {
            labels,
            plan,
            diagnostics,
        })
    }

    /// Runs the full nested selection.
    pub fn run(&self, cohort: &CohortTable) -> Result<SelectionReport, SelectionError> {
        let catalog = cohort.features().catalog()?;
        self.config.validate_for(&catalog)?;

        let PartitionOutcome {
            labels,
            plan,
            mut diagnostics,
        } = self.partition(cohort)?;

        let side_rows = |side: Side| {
            cohort
                .features()
                .select_patients(|p| plan.outer.side(p) == Some(side))
        };
        let training_rows = side_rows(Side::Train);
        let train_labels = labels.restrict(&plan.outer.train);

        let screener = UnivariateFeatureScreener::new(&catalog);
        let outcomes = self.run_folds(&plan.folds, &training_rows, &train_labels, screener);

        let mut folds = vec![];
        let mut failed_folds = vec![];
        for outcome in outcomes {
            match outcome {
                Ok(result) => folds.push(result),
                Err(err) => {
                    if self.config.failure_policy == FailurePolicy::FailFast {
                        return Err(SelectionError::FoldFailed { source: err });
                    }
                    log::warn!("{err}; continuing without this fold");
                    diagnostics.push(
                        DiagnosticEvent::new(ReasonCode::ProcessingError, Stage::Fold, err.to_string())
                            .fold(err.fold_index()),
                    );
                    failed_folds.push(FoldFailure {
                        fold_index: err.fold_index(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        if folds.is_empty() {
            return Err(SelectionError::AllFoldsFailed {
                n_folds: plan.folds.len(),
            });
        }

        let fold_diagnostics = folds
            .iter()
            .flat_map(|fold| fold.records.iter().cloned())
            .collect::<Vec<_>>();
        record_degeneracies(&fold_diagnostics, &mut diagnostics);

        let selector = StabilitySelector::new(self.config.stability_threshold);
        let stability = selector.aggregate(&fold_diagnostics, folds.len());
        let final_features = selector.select(&stability);
        log::info!(
            "{} of {} features reach stability {} over {} completed fold(s)",
            final_features.len(),
            catalog.len(),
            self.config.stability_threshold,
            folds.len()
        );

        let test_rows = side_rows(Side::Test);
        let (fitted, train) = self
            .stage
            .fit_transform(&training_rows)
            .map_err(|source| SelectionError::Holdout { source })?;
        let test = fitted
            .apply(&test_rows)
            .map_err(|source| SelectionError::Holdout { source })?;
        for column in fitted.dropped_columns() {
            diagnostics.push(
                DiagnosticEvent::new(
                    ReasonCode::ColumnMissing,
                    Stage::Transform,
                    "column dropped by transform fitted on the full training partition",
                )
                .feature(column),
            );
        }
        let holdout = HoldoutTransform {
            dropped_columns: sorted_names(fitted.dropped_columns()),
            train_rows: train.num_rows(),
            test_rows: test.num_rows(),
            train,
            test,
        };
        let reference = ReferencePass::new(screener).run(&holdout.train, &train_labels);

        Ok(SelectionReport {
            config: self.config.clone(),
            labels: labels.summary().clone(),
            undefined_patients: labels.undefined().to_vec(),
            partition: plan,
            folds,
            failed_folds,
            stability,
            final_features,
            fold_diagnostics,
            reference,
            holdout,
            diagnostics,
        })
    }

    /// Fans the folds out to scoped workers and joins them in fold order.
    fn run_folds(
        &self,
        folds: &[Fold],
        training_rows: &FeatureTable,
        train_labels: &BTreeMap<PatientId, Label>,
        screener: UnivariateFeatureScreener<'_>,
    ) -> Vec<Result<FoldResult, FoldError>> {
        thread::scope(|s| {
            let handles = folds
                .iter()
                .map(|fold| {
                    let handle =
                        s.spawn(move || self.run_fold(fold, training_rows, train_labels, screener));
                    (fold.index, handle)
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|(fold_index, handle)| {
                    handle
                        .join()
                        .unwrap_or(Err(FoldError::Panicked { fold_index }))
                })
                .collect()
        })
    }

    fn run_fold(
        &self,
        fold: &Fold,
        training_rows: &FeatureTable,
        train_labels: &BTreeMap<PatientId, Label>,
        screener: UnivariateFeatureScreener<'_>,
    ) -> Result<FoldResult, FoldError> {
        let fold_index = fold.index;
        let in_fold = |patients: &[PatientId]| {
            training_rows.select_patients(|p| patients.binary_search(p).is_ok())
        };
        let train_rows = in_fold(&fold.train);
        if train_rows.num_rows() == 0 {
            return Err(FoldError::EmptyTraining { fold_index });
        }
        let validation_rows = in_fold(&fold.validation);

        let transform_error = |source| FoldError::Transform { fold_index, source };
        let (fitted, train) = self.stage.fit_transform(&train_rows).map_err(transform_error)?;
        let validation = fitted.apply(&validation_rows).map_err(transform_error)?;

        let fold_labels = train_labels
            .iter()
            .filter(|(p, _)| fold.train.binary_search(*p).is_ok())
            .map(|(p, l)| (p.clone(), *l))
            .collect::<BTreeMap<_, _>>();
        let scores = screener.screen(&train, &fold_labels);
        let records = self.corrector.correct(fold_index, scores);
        let selected_count = records.iter().filter(|r| r.selected).count();

        log::debug!(
            "fold {fold_index}: {} training rows, {} validation rows, {selected_count} selected",
            train.num_rows(),
            validation.num_rows()
        );
        Ok(FoldResult {
            fold_index,
            train_patients: fold.train.len(),
            validation_patients: fold.validation.len(),
            dropped_columns: sorted_names(fitted.dropped_columns()),
            selected_count,
            records,
            validation,
        })
    }
}

fn sorted_names(names: BTreeSet<&str>) -> Vec<String> {
    names.into_iter().map(str::to_owned).collect()
}

fn record_degeneracies(records: &[FeatureScoreRecord], diagnostics: &mut Diagnostics) {
    let mut degenerate = 0;
    for record in records {
        let Some(degeneracy) = record.degeneracy else {
            continue;
        };
        let (reason, stage, detail) = match degeneracy {
            Degeneracy::AllMissing => (
                ReasonCode::ValueMissing,
                Stage::Screening,
                "all values missing in fold training rows",
            ),
            Degeneracy::DroppedByTransform => (
                ReasonCode::ColumnMissing,
                Stage::Transform,
                "column dropped by fold transform",
            ),
            Degeneracy::ZeroVariance => (
                ReasonCode::ProcessingError,
                Stage::Screening,
                "zero variance in fold training rows",
            ),
            Degeneracy::SingleClass => (
                ReasonCode::ProcessingError,
                Stage::Screening,
                "only one label class observed",
            ),
        };
        diagnostics.push(
            DiagnosticEvent::new(reason, stage, detail)
                .feature(record.feature_name.as_str())
                .fold(record.fold_index),
        );
        degenerate += 1;
    }
    if degenerate > 0 {
        log::warn!("{degenerate} feature/fold pair(s) could not be tested and were recorded as NaN");
    }
}

#[cfg(test)]
mod tests {
    use toxsel_cohort::{
        feature::{FeatureKind, FeatureSpec},
        table::{ColumnValues, FeatureColumn, GradeColumn},
    };
    use toxsel_partition::PartitionError;

    use super::*;
    use crate::transform::{BoxedFittedTransform, ColumnTransform, FittedTransform, TransformError};

    const PATIENTS: usize = 40;

    fn is_positive(i: usize) -> bool {
        i % 4 == 0
    }

    #[expect(clippy::cast_precision_loss)]
    fn base_columns() -> Vec<FeatureColumn> {
        let signal = (0..PATIENTS)
            .map(|i| Some(if is_positive(i) { 10.0 } else { 0.0 } + (i % 3) as f64))
            .collect();
        let noise = (0..PATIENTS).map(|i| Some((i * 7 % 11) as f64)).collect();
        let sex = (0..PATIENTS)
            .map(|i| Some(if i % 2 == 0 { "f" } else { "m" }.to_owned()))
            .collect();
        vec![
            FeatureColumn::numeric(FeatureSpec::new("signal", FeatureKind::Numeric), signal),
            FeatureColumn::numeric(FeatureSpec::new("noise", FeatureKind::Numeric), noise),
            FeatureColumn::new(
                FeatureSpec::new("sex", FeatureKind::Categorical),
                ColumnValues::Categorical(sex),
            )
            .unwrap(),
        ]
    }

    /// 40 labeled patients (10 positive) plus one without any grade.
    fn cohort(extra: Vec<FeatureColumn>) -> CohortTable {
        let mut ids = (0..PATIENTS)
            .map(|i| PatientId::new(format!("p{i:02}")))
            .collect::<Vec<_>>();
        ids.push(PatientId::from("unlabeled"));
        let mut grades = (0..PATIENTS)
            .map(|i| Some(if is_positive(i) { 3.0 } else { 1.0 }))
            .collect::<Vec<_>>();
        grades.push(None);

        let columns = base_columns()
            .into_iter()
            .chain(extra)
            .map(|column| {
                let mut values = column.values().clone();
                match &mut values {
                    ColumnValues::Numeric(v) => v.push(None),
                    ColumnValues::Categorical(v) => v.push(None),
                }
                column.with_values(values)
            })
            .collect();
        let features = FeatureTable::new(ids, columns).unwrap();
        let grades = vec![GradeColumn {
            name: "crs".to_owned(),
            threshold: 2.0,
            values: grades,
        }];
        CohortTable::new(features, grades).unwrap()
    }

    fn pipeline() -> SelectionPipeline {
        SelectionPipeline::new(RunConfig::default()).unwrap()
    }

    #[test]
    fn test_insufficient_training_minority() {
        // 6 negative / 4 positive, 0.3 test fraction, 5 folds
        let ids = (0..10).map(|i| PatientId::new(format!("q{i}"))).collect();
        let features = FeatureTable::new(ids, vec![]).unwrap();
        let grades = vec![GradeColumn {
            name: "crs".to_owned(),
            threshold: 2.0,
            values: (0..10).map(|i| Some(if i < 4 { 4.0 } else { 0.0 })).collect(),
        }];
        let cohort = CohortTable::new(features, grades).unwrap();
        let err = pipeline().run(&cohort).unwrap_err();
        assert!(matches!(
            err,
            SelectionError::Partition(PartitionError::InsufficientClassSize {
                label: Label::Positive,
                count: 3,
                required: 5,
                ..
            })
        ));
    }

    #[test]
    fn test_run_properties() {
        let report = pipeline().run(&cohort(vec![])).unwrap();

        assert_eq!(report.undefined_patients, [PatientId::from("unlabeled")]);
        assert_eq!(report.partition.outer.train.len() + report.partition.outer.test.len(), 40);
        assert_eq!(report.folds.len(), 5);
        assert!(report.failed_folds.is_empty());
        assert_eq!(report.fold_diagnostics.len(), 5 * 3);

        for record in &report.fold_diagnostics {
            assert!(record.selected_sensitivity.is_some());
            if record.selected {
                assert_eq!(record.selected_sensitivity, Some(true));
            }
        }
        let signal = report
            .stability
            .records()
            .iter()
            .find(|r| r.feature_name == "signal")
            .unwrap();
        assert_eq!(signal.selected_fold_count, 5);
        assert_eq!(signal.stability_score, 1.0);
        assert!(report.final_features.contains(&"signal".to_owned()));

        // the holdout transform never sees test rows while fitting
        let outer = &report.partition.outer;
        assert!(
            report
                .holdout
                .train
                .row_patients()
                .iter()
                .all(|p| outer.side(p) == Some(Side::Train))
        );
        assert!(
            report
                .holdout
                .test
                .row_patients()
                .iter()
                .all(|p| outer.side(p) == Some(Side::Test))
        );
        assert_eq!(report.holdout.test_rows, report.partition.outer.test.len());
        assert_eq!(report.reference.records.len(), 3);
    }

    #[test]
    fn test_locally_constant_feature_is_nan_in_that_fold_only() {
        let plan = pipeline().partition(&cohort(vec![])).unwrap().plan;
        let fold_2 = &plan.folds[2];
        // 7 for every training patient of fold 2, varying for everyone else
        #[expect(clippy::cast_precision_loss)]
        let values = (0..PATIENTS)
            .map(|i| {
                let id = PatientId::new(format!("p{i:02}"));
                Some(if fold_2.train.contains(&id) { 7.0 } else { i as f64 })
            })
            .collect();
        let column = FeatureColumn::numeric(FeatureSpec::new("flat", FeatureKind::Numeric), values);

        let report = pipeline().run(&cohort(vec![column])).unwrap();
        assert_eq!(report.partition, plan);
        for record in report.fold_diagnostics.iter().filter(|r| r.feature_name == "flat") {
            if record.fold_index == 2 {
                assert!(record.p_value.is_nan());
                assert!(!record.selected);
                assert_eq!(record.degeneracy, Some(Degeneracy::DroppedByTransform));
            } else {
                assert!(!record.p_value.is_nan());
                assert_eq!(record.degeneracy, None);
            }
        }
        assert_eq!(report.folds[2].dropped_columns, ["flat"]);
        assert!(
            report
                .diagnostics
                .iter()
                .any(|e| e.feature.as_deref() == Some("flat")
                    && e.fold_index == Some(2)
                    && e.stage == Stage::Transform
                    && e.reason == ReasonCode::ColumnMissing)
        );
        // the full training partition still varies, so the holdout keeps it
        assert!(report.holdout.dropped_columns.is_empty());
    }

    #[test]
    fn test_reruns_are_identical() {
        let cohort = cohort(vec![]);
        let first = pipeline().run(&cohort).unwrap();
        let second = pipeline().run(&cohort).unwrap();
        assert_eq!(first.partition, second.partition);
        assert_eq!(first.fold_diagnostics, second.fold_diagnostics);
        assert_eq!(
            serde_json::to_string(&first.stability).unwrap(),
            serde_json::to_string(&second.stability).unwrap()
        );
    }

    #[derive(Debug)]
    struct RequirePatient(PatientId);

    #[derive(Debug)]
    struct FittedRequirePatient {
        patient: PatientId,
        present: bool,
    }

    impl ColumnTransform for RequirePatient {
        fn name(&self) -> &'static str {
            "require_patient"
        }

        fn fit(&self, rows: &FeatureTable) -> BoxedFittedTransform {
            Box::new(FittedRequirePatient {
                patient: self.0.clone(),
                present: rows.row_patients().contains(&self.0),
            })
        }
    }

    impl FittedTransform for FittedRequirePatient {
        fn apply(&self, rows: &FeatureTable) -> Result<FeatureTable, TransformError> {
            if self.present {
                Ok(rows.clone())
            } else {
                Err(TransformError::ColumnMissing {
                    transform: "require_patient",
                    column: self.patient.to_string(),
                })
            }
        }
    }

    fn failing_pipeline(policy: FailurePolicy, cohort: &CohortTable) -> SelectionPipeline {
        let plan = pipeline().partition(cohort).unwrap().plan;
        // only fold 1 trains without this patient
        let patient = plan.folds[1].validation[0].clone();
        SelectionPipeline::new(RunConfig {
            failure_policy: policy,
            ..RunConfig::default()
        })
        .unwrap()
        .with_stage(LeakSafeTransformStage::new(vec![Box::new(RequirePatient(
            patient,
        ))]))
    }

    #[test]
    fn test_failed_fold_shrinks_denominator() {
        let cohort = cohort(vec![]);
        let report = failing_pipeline(FailurePolicy::Continue, &cohort)
            .run(&cohort)
            .unwrap();
        assert_eq!(report.folds.len(), 4);
        assert_eq!(report.failed_folds.len(), 1);
        assert_eq!(report.failed_folds[0].fold_index, 1);
        assert!(report.stability.records().iter().all(|r| r.total_folds == 4));
        assert!(report.fold_diagnostics.iter().all(|r| r.fold_index != 1));
    }

    #[test]
    fn test_fail_fast_aborts() {
        let cohort = cohort(vec![]);
        let err = failing_pipeline(FailurePolicy::FailFast, &cohort)
            .run(&cohort)
            .unwrap_err();
        assert!(matches!(
            err,
            SelectionError::FoldFailed {
                source: FoldError::Transform { fold_index: 1, .. }
            }
        ));
    }

    #[test]
    fn test_report_shape() {
        let report = pipeline().run(&cohort(vec![])).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("reference_only_not_for_modeling").is_some());
        assert!(json["fold_diagnostics"][0].get("selected_at_q1").is_some());
        assert!(json["fold_diagnostics"][0].get("selected_at_q2").is_some());
        assert_eq!(json["stability"].as_array().unwrap().len(), 3);
    }
}
