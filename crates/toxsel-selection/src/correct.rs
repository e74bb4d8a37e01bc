use serde::Serialize;
use toxsel_cohort::feature::TestKind;
use toxsel_stats::fdr::{BenjaminiHochberg, adjusted_p_values};

use crate::screen::{Degeneracy, FeatureScore, serialize_p_value};

/// Final per-fold record of one feature; immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureScoreRecord {
    pub fold_index: usize,
    pub feature_name: String,
    #[serde(serialize_with = "serialize_p_value")]
    pub p_value: f64,
    #[serde(serialize_with = "serialize_p_value")]
    pub adjusted_p_value: f64,
    pub test_kind: TestKind,
    /// Selected at the primary level `q1`.
    #[serde(rename = "selected_at_q1")]
    pub selected: bool,
    /// Selected at the looser sensitivity level `q2`, when configured.
    #[serde(rename = "selected_at_q2")]
    pub selected_sensitivity: Option<bool>,
    pub degeneracy: Option<Degeneracy>,
}

/// Benjamini–Hochberg selection at a primary and an optional looser level.
///
/// Both levels are evaluated over the same p-values; nothing is re-screened.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultipleTestingCorrector {
    primary: BenjaminiHochberg,
    sensitivity: Option<BenjaminiHochberg>,
}

impl MultipleTestingCorrector {
    #[must_use]
    pub fn new(primary: BenjaminiHochberg, sensitivity: Option<BenjaminiHochberg>) -> Self {
        Self {
            primary,
            sensitivity,
        }
    }

    #[must_use]
    pub fn primary_q(&self) -> f64 {
        self.primary.q()
    }

    #[must_use]
    pub fn sensitivity_q(&self) -> Option<f64> {
        self.sensitivity.map(|bh| bh.q())
    }

    /// Turns one fold's raw scores into records, preserving their order.
    #[must_use]
    pub fn correct(&self, fold_index: usize, scores: Vec<FeatureScore>) -> Vec<FeatureScoreRecord> {
        let p_values = scores.iter().map(|s| s.p_value).collect::<Vec<_>>();
        let selected = self.primary.select(&p_values);
        let sensitivity = self.sensitivity.map(|bh| bh.select(&p_values));
        let adjusted = adjusted_p_values(&p_values);

        scores
            .into_iter()
            .enumerate()
            .map(|(i, score)| FeatureScoreRecord {
                fold_index,
                feature_name: score.feature_name,
                p_value: score.p_value,
                adjusted_p_value: adjusted[i],
                test_kind: score.test_kind,
                selected: selected[i],
                selected_sensitivity: sensitivity.as_ref().map(|s| s[i]),
                degeneracy: score.degeneracy,
            })
            .collect()
    }
}

impl Default for MultipleTestingCorrector {
    fn default() -> Self {
        Self {
            primary: BenjaminiHochberg::default(),
            sensitivity: None,
        }
    }
}
