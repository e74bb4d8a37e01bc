use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use toxsel_cohort::{
    Label, PatientId,
    feature::{FeatureCatalog, FeatureSpec, TestKind},
    table::{ColumnValues, FeatureTable},
};
use toxsel_stats::{contingency::ContingencyTable, rank::mann_whitney_u};

/// Why a feature could not be tested within one fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Degeneracy {
    /// One distinct value among the tested rows.
    ZeroVariance,
    /// No non-missing value among the tested rows.
    AllMissing,
    /// All tested rows share one label.
    SingleClass,
    /// Removed by a fitted transform before screening.
    DroppedByTransform,
}

/// Raw screening result of one feature in one fold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureScore {
    pub feature_name: String,
    pub test_kind: TestKind,
    #[serde(serialize_with = "serialize_p_value")]
    pub p_value: f64,
    pub statistic: Option<f64>,
    pub degeneracy: Option<Degeneracy>,
}

impl FeatureScore {
    fn degenerate(spec: &FeatureSpec, degeneracy: Degeneracy) -> Self {
        Self {
            feature_name: spec.name.clone(),
            test_kind: spec.test,
            p_value: f64::NAN,
            statistic: None,
            degeneracy: Some(degeneracy),
        }
    }

    fn tested(spec: &FeatureSpec, statistic: f64, p_value: f64) -> Self {
        Self {
            feature_name: spec.name.clone(),
            test_kind: spec.test,
            p_value,
            statistic: Some(statistic),
            degeneracy: None,
        }
    }
}

/// `NaN` p-values serialize as `null`.
pub(crate) fn serialize_p_value<S>(p_value: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if p_value.is_nan() {
        serializer.serialize_none()
    } else {
        serializer.serialize_some(p_value)
    }
}

/// Univariate association test of every declared feature against the label.
///
/// The test applied to a feature is the one declared in the catalog; it never
/// depends on the rows being screened.
#[derive(Debug, Clone, Copy)]
pub struct UnivariateFeatureScreener<'a> {
    catalog: &'a FeatureCatalog,
}

impl<'a> UnivariateFeatureScreener<'a> {
    #[must_use]
    pub fn new(catalog: &'a FeatureCatalog) -> Self {
        Self { catalog }
    }

    /// Screens the rows of one fold, one result per declared feature in catalog order.
    ///
    /// Rows whose patient has no entry in `labels` are ignored.
    #[must_use]
    pub fn screen(
        &self,
        rows: &FeatureTable,
        labels: &BTreeMap<PatientId, Label>,
    ) -> Vec<FeatureScore> {
        let row_labels = rows
            .row_patients()
            .iter()
            .map(|p| labels.get(p).copied())
            .collect::<Vec<_>>();
        self.catalog
            .iter()
            .map(|spec| match rows.column(&spec.name) {
                None => FeatureScore::degenerate(spec, Degeneracy::DroppedByTransform),
                Some(column) => screen_column(spec, column.values(), &row_labels),
            })
            .collect()
    }
}

fn screen_column(spec: &FeatureSpec, values: &ColumnValues, labels: &[Option<Label>]) -> FeatureScore {
    match spec.test {
        TestKind::MannWhitneyU => {
            let ColumnValues::Numeric(values) = values else {
                return FeatureScore::degenerate(spec, Degeneracy::AllMissing);
            };
            let mut groups = [vec![], vec![]];
            for (value, label) in values.iter().zip(labels) {
                if let (Some(value), Some(label)) = (value, label)
                    && !value.is_nan()
                {
                    groups[label.as_index()].push(*value);
                }
            }
            if let Some(degeneracy) = check_groups(
                groups.iter().map(Vec::len),
                groups.iter().flatten().map(|v| v.to_bits()),
            ) {
                return FeatureScore::degenerate(spec, degeneracy);
            }
            match mann_whitney_u(&groups[0], &groups[1]) {
                Some(result) => FeatureScore::tested(spec, result.u_statistic, result.p_value),
                None => FeatureScore::degenerate(spec, Degeneracy::ZeroVariance),
            }
        }
        TestKind::ChiSquare => {
            let categories = match values {
                ColumnValues::Numeric(values) => values
                    .iter()
                    .map(|v| v.filter(|v| !v.is_nan()).map(|v| v.to_string()))
                    .collect::<Vec<_>>(),
                ColumnValues::Categorical(values) => values.clone(),
            };
            let observations = categories
                .iter()
                .zip(labels)
                .filter_map(|(category, label)| Some((category.as_deref()?, (*label)?)))
                .collect::<Vec<_>>();
            let mut counts = [0, 0];
            for (_, label) in &observations {
                counts[label.as_index()] += 1;
            }
            if let Some(degeneracy) =
                check_groups(counts.into_iter(), observations.iter().map(|(c, _)| *c))
            {
                return FeatureScore::degenerate(spec, degeneracy);
            }
            let table = ContingencyTable::from_observations(
                observations
                    .iter()
                    .map(|(category, label)| (*category, label.is_positive())),
            );
            match table.chi_square() {
                Some(result) => FeatureScore::tested(spec, result.statistic, result.p_value),
                None => FeatureScore::degenerate(spec, Degeneracy::ZeroVariance),
            }
        }
    }
}

/// Classifies an untestable sample from its class sizes and its values.
fn check_groups<V>(
    class_sizes: impl Iterator<Item = usize>,
    mut values: impl Iterator<Item = V>,
) -> Option<Degeneracy>
where
    V: PartialEq,
{
    let class_sizes = class_sizes.collect::<Vec<_>>();
    let Some(first) = values.next() else {
        return Some(Degeneracy::AllMissing);
    };
    if values.all(|v| v == first) {
        return Some(Degeneracy::ZeroVariance);
    }
    if class_sizes.contains(&0) {
        return Some(Degeneracy::SingleClass);
    }
    None
}

#[cfg(test)]
mod tests {
    use toxsel_cohort::{
        feature::FeatureKind,
        table::{FeatureColumn, FeatureTable},
    };

    use super::*;

    fn setup(columns: Vec<FeatureColumn>, labels: &[Label]) -> (FeatureTable, BTreeMap<PatientId, Label>) {
        let ids = (0..labels.len())
            .map(|i| PatientId::new(format!("p{i}")))
            .collect::<Vec<_>>();
        let table = FeatureTable::new(ids.clone(), columns).unwrap();
        (table, ids.into_iter().zip(labels.iter().copied()).collect())
    }

    fn numeric(name: &str, values: &[Option<f64>]) -> FeatureColumn {
        FeatureColumn::numeric(FeatureSpec::new(name, FeatureKind::Numeric), values.to_vec())
    }

    const N: Label = Label::Negative;
    const P: Label = Label::Positive;

    #[test]
    fn test_separated_feature_is_significant() {
        let values = (1..=10).map(|v| Some(f64::from(v))).collect::<Vec<_>>();
        let (table, labels) = setup(
            vec![numeric("ldh", &values)],
            &[N, N, N, N, N, P, P, P, P, P],
        );
        let catalog = table.catalog().unwrap();
        let scores = UnivariateFeatureScreener::new(&catalog).screen(&table, &labels);
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].test_kind, TestKind::MannWhitneyU);
        assert!((scores[0].p_value - 0.012_186).abs() < 1e-5);
        assert_eq!(scores[0].degeneracy, None);
    }

    #[test]
    fn test_constant_feature_is_nan_not_error() {
        let (table, labels) = setup(
            vec![numeric("flat", &[Some(7.0), Some(7.0), None, Some(7.0)])],
            &[N, P, P, N],
        );
        let catalog = table.catalog().unwrap();
        let scores = UnivariateFeatureScreener::new(&catalog).screen(&table, &labels);
        assert!(scores[0].p_value.is_nan());
        assert_eq!(scores[0].degeneracy, Some(Degeneracy::ZeroVariance));
    }

    #[test]
    fn test_degeneracy_kinds() {
        let (table, labels) = setup(
            vec![
                numeric("missing", &[None, None, None, None]),
                numeric("one_class", &[Some(1.0), Some(2.0), None, None]),
            ],
            &[N, N, P, P],
        );
        let catalog = FeatureCatalog::new(vec![
            FeatureSpec::new("missing", FeatureKind::Numeric),
            FeatureSpec::new("one_class", FeatureKind::Numeric),
            FeatureSpec::new("dropped", FeatureKind::Numeric),
        ])
        .unwrap();
        let scores = UnivariateFeatureScreener::new(&catalog).screen(&table, &labels);
        let kinds = scores.iter().map(|s| s.degeneracy).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            [
                Some(Degeneracy::AllMissing),
                Some(Degeneracy::SingleClass),
                Some(Degeneracy::DroppedByTransform)
            ]
        );
    }

    #[test]
    fn test_ordinal_screened_as_categories() {
        let spec = FeatureSpec::new("stage", FeatureKind::Ordinal)
            .with_test(TestKind::ChiSquare)
            .unwrap();
        let values = [1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0, 2.0]
            .map(Some)
            .to_vec();
        let (table, labels) = setup(
            vec![FeatureColumn::numeric(spec.clone(), values)],
            &[N, N, N, N, N, P, P, P, P, P],
        );
        let catalog = FeatureCatalog::new(vec![spec]).unwrap();
        let scores = UnivariateFeatureScreener::new(&catalog).screen(&table, &labels);
        assert_eq!(scores[0].test_kind, TestKind::ChiSquare);
        // Yates-corrected statistic of a perfectly separated 5/5 table is 6.4
        assert!((scores[0].statistic.unwrap() - 6.4).abs() < 1e-12);
        assert!(scores[0].p_value < 0.05);
    }

    #[test]
    fn test_nan_p_value_serializes_as_null() {
        let score = FeatureScore::degenerate(
            &FeatureSpec::new("x", FeatureKind::Numeric),
            Degeneracy::ZeroVariance,
        );
        let json = serde_json::to_value(&score).unwrap();
        assert!(json["p_value"].is_null());
        assert_eq!(json["degeneracy"], "zero_variance");
    }
}
