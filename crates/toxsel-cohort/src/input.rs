//! Serialized cohort input
//!
//! The ingestion side hands over a column-oriented JSON document:
//!
//! ```json
//! {
//!   "patient_ids": ["P1", "P2"],
//!   "grades": [{ "name": "crs", "threshold": 2, "values": [3, 1] }],
//!   "features": [
//!     { "name": "age", "kind": "numeric", "values": [61, 48] },
//!     { "name": "sex", "kind": "categorical", "values": ["f", "m"] }
//!   ],
//!   "dynamic": {
//!     "variables": ["crp"],
//!     "series": { "P1": [{ "day": -1, "crp": 12.5 }] }
//!   }
//! }
//! ```
//!
//! Every feature declares its kind; the test defaults to the kind's default.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::{
    PatientId,
    diagnostics::Diagnostics,
    feature::{FeatureKind, FeatureSpec, TestKind},
    table::{CohortError, CohortTable, ColumnValues, FeatureColumn, FeatureTable, GradeColumn},
    window::{ObservationWindow, TimeSeries, WindowAggregator},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureColumnInput {
    pub name: String,
    pub kind: FeatureKind,
    #[serde(default)]
    pub test: Option<TestKind>,
    pub values: ColumnValues,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DynamicInput {
    #[serde(default)]
    pub window: ObservationWindow,
    pub variables: Vec<String>,
    pub series: BTreeMap<PatientId, TimeSeries>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CohortInput {
    pub patient_ids: Vec<PatientId>,
    pub grades: Vec<GradeColumn>,
    #[serde(default)]
    pub features: Vec<FeatureColumnInput>,
    #[serde(default)]
    pub dynamic: Option<DynamicInput>,
}

impl CohortInput {
    /// Validates the columns and appends window-aggregated dynamic features.
    pub fn into_cohort(self, diagnostics: &mut Diagnostics) -> Result<CohortTable, CohortError> {
        let columns = self
            .features
            .into_iter()
            .map(|input| {
                let mut spec = FeatureSpec::new(input.name, input.kind);
                if let Some(test) = input.test {
                    spec = spec.with_test(test)?;
                }
                FeatureColumn::new(spec, input.values)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut features = FeatureTable::new(self.patient_ids, columns)?;

        if let Some(dynamic) = self.dynamic {
            let aggregator = WindowAggregator::new(dynamic.window, dynamic.variables);
            let per_patient =
                aggregator.aggregate(&features.patients(), &dynamic.series, diagnostics)?;
            features = features.join_patient_features(&per_patient)?;
        }

        CohortTable::new(features, self.grades)
    }
}
