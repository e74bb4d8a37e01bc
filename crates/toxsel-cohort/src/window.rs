//! Observation-window aggregation of time series
//!
//! Repeated laboratory measurements are summarized into one row of static
//! features per patient. Every summary uses only the patient's own rows inside
//! the [`ObservationWindow`], so the aggregation is row-local and may run
//! before the cohort is partitioned.
//!
//! For a variable `crp` the produced columns are `crp_count`, `crp_mean`,
//! `crp_median`, `crp_std`, `crp_min`, `crp_max`, `crp_slope`, `crp_auc`,
//! `crp_time_to_peak` and `crp_last_value`, followed by the patient-level
//! `total_nonmiss_measurements` and `days_with_any_measurements`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use toxsel_stats::descriptive::DescriptiveStats;

use crate::{
    PatientId,
    diagnostics::{DiagnosticEvent, Diagnostics, ReasonCode, Stage},
    feature::{FeatureKind, FeatureSpec},
    table::{CohortError, FeatureColumn, FeatureTable},
};

/// Inclusive day range relative to the reference day (day 0).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObservationWindow {
    pub start: f64,
    pub end: f64,
}

impl Default for ObservationWindow {
    fn default() -> Self {
        Self {
            start: -15.0,
            end: 2.0,
        }
    }
}

impl ObservationWindow {
    #[must_use]
    pub fn contains(&self, day: f64) -> bool {
        day >= self.start && day <= self.end
    }
}

/// One measurement day of a patient's series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRow {
    pub day: f64,
    #[serde(flatten)]
    pub values: BTreeMap<String, Option<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeSeries {
    pub rows: Vec<SeriesRow>,
}

/// Summary of one variable's non-missing values inside the window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SeriesSummary {
    pub count: usize,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub slope: Option<f64>,
    pub auc: Option<f64>,
    pub time_to_peak: Option<f64>,
    pub last_value: Option<f64>,
}

const SUMMARY_FIELDS: [&str; 10] = [
    "count",
    "mean",
    "median",
    "std",
    "min",
    "max",
    "slope",
    "auc",
    "time_to_peak",
    "last_value",
];

impl SeriesSummary {
    /// Summarizes `(day, value)` points; the points need not be sorted.
    #[must_use]
    pub fn from_points(points: &[(f64, f64)]) -> Self {
        let mut points = points.to_vec();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));

        let Some(stats) = DescriptiveStats::new(points.iter().map(|p| p.1)) else {
            return Self::default();
        };

        let time_to_peak = points
            .iter()
            .fold(None::<(f64, f64)>, |peak, &(day, value)| match peak {
                Some((_, best)) if best >= value => peak,
                _ => Some((day, value)),
            })
            .map(|(day, _)| day);

        Self {
            count: stats.count,
            mean: Some(stats.mean),
            median: Some(stats.median),
            std: Some(stats.std_dev),
            min: Some(stats.min),
            max: Some(stats.max),
            slope: least_squares_slope(&points),
            auc: trapezoid(&points),
            time_to_peak,
            last_value: points.last().map(|p| p.1),
        }
    }

    #[expect(clippy::cast_precision_loss)]
    fn fields(&self) -> [Option<f64>; 10] {
        [
            Some(self.count as f64),
            self.mean,
            self.median,
            self.std,
            self.min,
            self.max,
            self.slope,
            self.auc,
            self.time_to_peak,
            self.last_value,
        ]
    }
}

#[expect(clippy::cast_precision_loss)]
fn least_squares_slope(points: &[(f64, f64)]) -> Option<f64> {
    let n = points.len() as f64;
    let mean_day = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_value = points.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx = points.iter().map(|p| (p.0 - mean_day).powi(2)).sum::<f64>();
    if points.len() < 2 || sxx <= 0.0 {
        return None;
    }
    let sxy = points
        .iter()
        .map(|p| (p.0 - mean_day) * (p.1 - mean_value))
        .sum::<f64>();
    Some(sxy / sxx)
}

fn trapezoid(points: &[(f64, f64)]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }
    Some(
        points
            .windows(2)
            .map(|w| (w[1].0 - w[0].0) * (w[0].1 + w[1].1) / 2.0)
            .sum(),
    )
}

fn has_value(row: &SeriesRow, var: &str) -> bool {
    row.values
        .get(var)
        .copied()
        .flatten()
        .is_some_and(|v| !v.is_nan())
}

/// Turns per-patient time series into one row of static features per patient.
#[derive(Debug, Clone)]
pub struct WindowAggregator {
    window: ObservationWindow,
    variables: Vec<String>,
}

impl WindowAggregator {
    #[must_use]
    pub fn new(window: ObservationWindow, variables: Vec<String>) -> Self {
        Self { window, variables }
    }

    /// Names of the produced columns, in output order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.variables
            .iter()
            .flat_map(|var| SUMMARY_FIELDS.iter().map(move |f| format!("{var}_{f}")))
            .chain([
                "total_nonmiss_measurements".to_owned(),
                "days_with_any_measurements".to_owned(),
            ])
            .collect()
    }

    /// Aggregates the series of every listed patient, in id order.
    ///
    /// A patient without a series gets a `file_missing` event, a series with no
    /// rows in the window a `window_empty` event; their features are all missing.
    #[expect(clippy::cast_precision_loss)]
    pub fn aggregate(
        &self,
        patients: &BTreeSet<PatientId>,
        series: &BTreeMap<PatientId, TimeSeries>,
        diagnostics: &mut Diagnostics,
    ) -> Result<FeatureTable, CohortError> {
        let names = self.column_names();
        let mut columns = vec![Vec::with_capacity(patients.len()); names.len()];

        for patient in patients {
            let Some(ts) = series.get(patient) else {
                diagnostics.push(
                    DiagnosticEvent::new(
                        ReasonCode::FileMissing,
                        Stage::WindowAggregation,
                        "no time series for patient",
                    )
                    .patient(patient),
                );
                columns.iter_mut().for_each(|c| c.push(None));
                continue;
            };

            let rows = ts
                .rows
                .iter()
                .filter(|row| self.window.contains(row.day))
                .collect::<Vec<_>>();
            if rows.is_empty() {
                diagnostics.push(
                    DiagnosticEvent::new(
                        ReasonCode::WindowEmpty,
                        Stage::WindowAggregation,
                        format!(
                            "no rows within days {}..={}",
                            self.window.start, self.window.end
                        ),
                    )
                    .patient(patient),
                );
                columns.iter_mut().for_each(|c| c.push(None));
                continue;
            }

            let mut column = columns.iter_mut();
            for var in &self.variables {
                if !ts.rows.iter().any(|row| row.values.contains_key(var)) {
                    diagnostics.push(
                        DiagnosticEvent::new(
                            ReasonCode::ColumnMissing,
                            Stage::WindowAggregation,
                            "variable absent from series",
                        )
                        .patient(patient)
                        .feature(var.as_str()),
                    );
                }
                let points = rows
                    .iter()
                    .filter_map(|row| {
                        let value = row.values.get(var).copied().flatten()?;
                        (!value.is_nan()).then_some((row.day, value))
                    })
                    .collect::<Vec<_>>();
                if points.is_empty() {
                    diagnostics.push(
                        DiagnosticEvent::new(
                            ReasonCode::ValueMissing,
                            Stage::WindowAggregation,
                            "no values within the observation window",
                        )
                        .patient(patient)
                        .feature(var.as_str()),
                    );
                }
                let summary = SeriesSummary::from_points(&points);
                for value in summary.fields() {
                    if let Some(c) = column.next() {
                        c.push(value);
                    }
                }
            }

            let total = rows
                .iter()
                .map(|row| self.variables.iter().filter(|v| has_value(row, v)).count())
                .sum::<usize>();
            let days = rows
                .iter()
                .filter(|row| self.variables.iter().any(|v| has_value(row, v)))
                .map(|row| row.day.to_bits())
                .collect::<BTreeSet<_>>()
                .len();
            for value in [total, days] {
                if let Some(c) = column.next() {
                    c.push(Some(value as f64));
                }
            }
        }

        let columns = names
            .into_iter()
            .zip(columns)
            .map(|(name, values)| {
                FeatureColumn::numeric(FeatureSpec::new(name, FeatureKind::Numeric), values)
            })
            .collect();
        let table = FeatureTable::new(patients.iter().cloned().collect(), columns)?;
        log::info!(
            "aggregated {} variable(s) for {} patient(s) over days {}..={}",
            self.variables.len(),
            patients.len(),
            self.window.start,
            self.window.end
        );
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ColumnValues;

    fn row(day: f64, values: &[(&str, Option<f64>)]) -> SeriesRow {
        SeriesRow {
            day,
            values: values
                .iter()
                .map(|(k, v)| ((*k).to_owned(), *v))
                .collect(),
        }
    }

    fn column<'a>(table: &'a FeatureTable, name: &str) -> &'a [Option<f64>] {
        match table.column(name).unwrap().values() {
            ColumnValues::Numeric(values) => values,
            ColumnValues::Categorical(_) => panic!("expected numeric column"),
        }
    }

    #[test]
    fn test_summary_of_points() {
        let summary = SeriesSummary::from_points(&[(2.0, 4.0), (0.0, 2.0), (1.0, 6.0)]);
        assert_eq!(summary.count, 3);
        assert_eq!(summary.mean, Some(4.0));
        assert_eq!(summary.median, Some(4.0));
        assert_eq!(summary.slope, Some(1.0));
        // (1 * (2 + 6) / 2) + (1 * (6 + 4) / 2)
        assert_eq!(summary.auc, Some(9.0));
        assert_eq!(summary.time_to_peak, Some(1.0));
        assert_eq!(summary.last_value, Some(4.0));
    }

    #[test]
    fn test_single_point_has_no_slope_or_auc() {
        let summary = SeriesSummary::from_points(&[(0.0, 5.0)]);
        assert_eq!(summary.std, Some(0.0));
        assert_eq!(summary.slope, None);
        assert_eq!(summary.auc, None);
        assert_eq!(SeriesSummary::from_points(&[(1.0, 2.0), (1.0, 3.0)]).slope, None);
    }

    #[test]
    fn test_aggregate_window_and_events() {
        let patients = ["a", "b", "c"].into_iter().map(PatientId::from).collect();
        let mut series = BTreeMap::new();
        series.insert(
            PatientId::from("a"),
            TimeSeries {
                rows: vec![
                    row(-20.0, &[("crp", Some(100.0))]),
                    row(-1.0, &[("crp", Some(10.0))]),
                    row(1.0, &[("crp", Some(30.0))]),
                    row(2.0, &[("crp", None)]),
                ],
            },
        );
        series.insert(
            PatientId::from("b"),
            TimeSeries {
                rows: vec![row(5.0, &[("crp", Some(1.0))])],
            },
        );

        let aggregator = WindowAggregator::new(ObservationWindow::default(), vec!["crp".into()]);
        let mut diagnostics = Diagnostics::new();
        let table = aggregator
            .aggregate(&patients, &series, &mut diagnostics)
            .unwrap();

        assert_eq!(table.num_rows(), 3);
        assert_eq!(column(&table, "crp_count"), &[Some(2.0), None, None]);
        assert_eq!(column(&table, "crp_max"), &[Some(30.0), None, None]);
        assert_eq!(column(&table, "crp_slope"), &[Some(10.0), None, None]);
        assert_eq!(
            column(&table, "days_with_any_measurements"),
            &[Some(2.0), None, None]
        );

        let counts = diagnostics.count_by_reason();
        assert_eq!(counts[&ReasonCode::WindowEmpty], 1);
        assert_eq!(counts[&ReasonCode::FileMissing], 1);
    }

    #[test]
    fn test_repeated_day_counts_once() {
        let patients = BTreeSet::from([PatientId::from("a")]);
        let series = BTreeMap::from([(
            PatientId::from("a"),
            TimeSeries {
                rows: vec![
                    row(0.0, &[("crp", Some(1.0))]),
                    row(0.0, &[("crp", Some(2.0))]),
                    row(1.0, &[("crp", Some(3.0))]),
                ],
            },
        )]);
        let table = WindowAggregator::new(ObservationWindow::default(), vec!["crp".into()])
            .aggregate(&patients, &series, &mut Diagnostics::new())
            .unwrap();
        assert_eq!(column(&table, "total_nonmiss_measurements"), &[Some(3.0)]);
        assert_eq!(column(&table, "days_with_any_measurements"), &[Some(2.0)]);
    }
}
