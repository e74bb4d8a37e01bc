use std::collections::BTreeMap;

use serde::Serialize;

use crate::correct::FeatureScoreRecord;

/// Cross-fold selection frequency of one feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StabilityRecord {
    pub feature_name: String,
    pub selected_fold_count: usize,
    pub total_folds: usize,
    pub stability_score: f64,
}

/// Stability records sorted by descending score, ties by feature name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StabilityTable {
    records: Vec<StabilityRecord>,
}

impl StabilityTable {
    #[must_use]
    pub fn records(&self) -> &[StabilityRecord] {
        &self.records
    }

    /// Number of folds that selected each feature.
    #[must_use]
    pub fn selection_counts(&self) -> BTreeMap<&str, usize> {
        self.records
            .iter()
            .map(|r| (r.feature_name.as_str(), r.selected_fold_count))
            .collect()
    }

    /// Features whose stability score is at or above `threshold`, in table order.
    #[must_use]
    pub fn features_at(&self, threshold: f64) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.stability_score >= threshold)
            .map(|r| r.feature_name.clone())
            .collect()
    }
}

/// Aggregates per-fold selection flags into stability scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilitySelector {
    threshold: f64,
}

impl Default for StabilitySelector {
    fn default() -> Self {
        Self { threshold: 0.6 }
    }
}

impl StabilitySelector {
    #[must_use]
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Builds the stability table from the records of all completed folds.
    ///
    /// `completed_folds` is the denominator; failed folds contribute neither
    /// records nor to the count.
    #[expect(clippy::cast_precision_loss)]
    #[must_use]
    pub fn aggregate(
        &self,
        records: &[FeatureScoreRecord],
        completed_folds: usize,
    ) -> StabilityTable {
        let mut counts = BTreeMap::<&str, usize>::new();
        for record in records {
            *counts.entry(&record.feature_name).or_default() += usize::from(record.selected);
        }

        let mut records = counts
            .into_iter()
            .map(|(name, count)| StabilityRecord {
                feature_name: name.to_owned(),
                selected_fold_count: count,
                total_folds: completed_folds,
                stability_score: if completed_folds == 0 {
                    0.0
                } else {
                    count as f64 / completed_folds as f64
                },
            })
            .collect::<Vec<_>>();
        records.sort_by(|a, b| {
            b.stability_score
                .total_cmp(&a.stability_score)
                .then_with(|| a.feature_name.cmp(&b.feature_name))
        });
        StabilityTable { records }
    }

    /// Final recommended feature set at the configured threshold.
    #[must_use]
    pub fn select(&self, table: &StabilityTable) -> Vec<String> {
        table.features_at(self.threshold)
    }
}
