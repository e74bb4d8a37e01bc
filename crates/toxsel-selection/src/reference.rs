//! Reference pass over the whole training partition
//!
//! The reference table screens every feature once on the entire training
//! partition, without fold structure. It never sees the test partition, but it
//! mixes information that no single fold has on its own, so it exists for
//! visualization only: it must never be used to choose features for modeling.
//!
//! The types here carry no selection flag and cannot be fed to the
//! [`StabilitySelector`](crate::stability::StabilitySelector).

use std::collections::BTreeMap;

use serde::Serialize;
use toxsel_cohort::{Label, PatientId, feature::TestKind, table::FeatureTable};
use toxsel_stats::fdr::adjusted_p_values;

use crate::screen::{Degeneracy, UnivariateFeatureScreener, serialize_p_value};

pub const REFERENCE_PURPOSE: &str =
    "visualization only; computed on the full training partition without folds, never use for feature selection";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceRecord {
    pub feature_name: String,
    pub test_kind: TestKind,
    #[serde(serialize_with = "serialize_p_value")]
    pub p_value: f64,
    #[serde(serialize_with = "serialize_p_value")]
    pub adjusted_p_value: f64,
    pub degeneracy: Option<Degeneracy>,
}

/// Reference-only statistics; not a source of selected features.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceOnlyTable {
    pub purpose: &'static str,
    pub training_rows: usize,
    pub records: Vec<ReferenceRecord>,
}

#[derive(Debug, Clone, Copy)]
pub struct ReferencePass<'a> {
    screener: UnivariateFeatureScreener<'a>,
}

impl<'a> ReferencePass<'a> {
    #[must_use]
    pub fn new(screener: UnivariateFeatureScreener<'a>) -> Self {
        Self { screener }
    }

    /// Screens already-transformed training rows.
    #[must_use]
    pub fn run(
        &self,
        training: &FeatureTable,
        labels: &BTreeMap<PatientId, Label>,
    ) -> ReferenceOnlyTable {
        let scores = self.screener.screen(training, labels);
        let adjusted = adjusted_p_values(&scores.iter().map(|s| s.p_value).collect::<Vec<_>>());
        let records = scores
            .into_iter()
            .zip(adjusted)
            .map(|(score, adjusted_p_value)| ReferenceRecord {
                feature_name: score.feature_name,
                test_kind: score.test_kind,
                p_value: score.p_value,
                adjusted_p_value,
                degeneracy: score.degeneracy,
            })
            .collect();
        ReferenceOnlyTable {
            purpose: REFERENCE_PURPOSE,
            training_rows: training.num_rows(),
            records,
        }
    }
}

#[cfg(test)]
mod tests {
    use toxsel_cohort::{
        feature::{FeatureKind, FeatureSpec},
        table::FeatureColumn,
    };

    use super::*;

    #[test]
    fn test_reference_table_has_no_selection() {
        let ids = (0..6).map(|i| PatientId::new(format!("p{i}"))).collect::<Vec<_>>();
        let labels = ids
            .iter()
            .cloned()
            .zip([0, 0, 0, 1, 1, 1].map(|l| if l == 1 { Label::Positive } else { Label::Negative }))
            .collect();
        let column = FeatureColumn::numeric(
            FeatureSpec::new("crp", FeatureKind::Numeric),
            [1.0, 2.0, 3.0, 4.0, 5.0, 6.0].map(Some).to_vec(),
        );
        let table = FeatureTable::new(ids, vec![column]).unwrap();
        let catalog = table.catalog().unwrap();
        let reference = ReferencePass::new(UnivariateFeatureScreener::new(&catalog)).run(&table, &labels);

        assert_eq!(reference.training_rows, 6);
        assert_eq!(reference.records.len(), 1);
        let json = serde_json::to_value(&reference).unwrap();
        assert!(json["purpose"].as_str().unwrap().contains("never use for feature selection"));
        assert!(json["records"][0].get("selected").is_none());
    }
}
