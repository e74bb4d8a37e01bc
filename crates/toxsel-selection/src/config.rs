//! Immutable run context
//!
//! A [`RunConfig`] is built once, validated, and then passed by reference to
//! every stage. Nothing reads configuration from process-wide state.

use serde::{Deserialize, Serialize};
use toxsel_cohort::{feature::FeatureCatalog, label::LabelRule};

/// What happens to the run when one fold fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Drop the fold's contribution and shrink the stability denominator.
    #[default]
    Continue,
    /// Abort the whole run on the first failed fold.
    FailFast,
}

/// A fold-local transform, fitted on training rows only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformSpec {
    /// Drop columns with at most one distinct non-missing value.
    DropConstant,
    /// Fill missing values with the training median (numeric) or mode (categorical).
    Impute,
    /// Map `value > training median` to 1 and everything else to 0.
    BinarizeAtMedian { columns: Vec<String> },
}

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum ConfigError {
    #[display("{name} must lie in (0, 1), got {value}")]
    OutOfRange { name: &'static str, value: f64 },
    #[display("n_folds must be at least 2, got {n_folds}")]
    TooFewFolds { n_folds: usize },
    #[display("stability_threshold must lie in [0, 1], got {value}")]
    InvalidStabilityThreshold { value: f64 },
    #[display("sensitivity_q ({sensitivity_q}) must be looser than fdr_q ({fdr_q})")]
    SensitivityNotLooser { fdr_q: f64, sensitivity_q: f64 },
    #[display("binarize_at_median column '{column}' is not a declared feature")]
    UnknownColumn { column: String },
    #[display("binarize_at_median column '{column}' is not numeric")]
    NonNumericColumn { column: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub seed: u64,
    pub test_fraction: f64,
    pub n_folds: usize,
    pub fdr_q: f64,
    pub sensitivity_q: Option<f64>,
    pub stability_threshold: f64,
    pub failure_policy: FailurePolicy,
    pub transforms: Vec<TransformSpec>,
    pub label_rule: LabelRule,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            test_fraction: 0.3,
            n_folds: 5,
            fdr_q: 0.05,
            sensitivity_q: Some(0.10),
            stability_threshold: 0.6,
            failure_policy: FailurePolicy::Continue,
            transforms: vec![TransformSpec::DropConstant, TransformSpec::Impute],
            label_rule: LabelRule::AnyOf,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let open_unit = |name, value: f64| {
            if value > 0.0 && value < 1.0 {
                Ok(())
            } else {
                Err(ConfigError::OutOfRange { name, value })
            }
        };
        open_unit("test_fraction", self.test_fraction)?;
        open_unit("fdr_q", self.fdr_q)?;
        if let Some(sensitivity_q) = self.sensitivity_q {
            open_unit("sensitivity_q", sensitivity_q)?;
            if sensitivity_q < self.fdr_q {
                return Err(ConfigError::SensitivityNotLooser {
                    fdr_q: self.fdr_q,
                    sensitivity_q,
                });
            }
        }
        if self.n_folds < 2 {
            return Err(ConfigError::TooFewFolds {
                n_folds: self.n_folds,
            });
        }
        if !(0.0..=1.0).contains(&self.stability_threshold) {
            return Err(ConfigError::InvalidStabilityThreshold {
                value: self.stability_threshold,
            });
        }
        Ok(())
    }

    /// Checks transform columns against the declared features.
    pub fn validate_for(&self, catalog: &FeatureCatalog) -> Result<(), ConfigError> {
        self.validate()?;
        for transform in &self.transforms {
            let TransformSpec::BinarizeAtMedian { columns } = transform else {
                continue;
            };
            for column in columns {
                let spec = catalog
                    .get(column)
                    .ok_or_else(|| ConfigError::UnknownColumn {
                        column: column.clone(),
                    })?;
                if !spec.kind.is_numeric_storage() {
                    return Err(ConfigError::NonNumericColumn {
                        column: column.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use toxsel_cohort::feature::{FeatureKind, FeatureSpec};

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.n_folds, 5);
        assert_eq!(config.sensitivity_q, Some(0.10));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RunConfig = serde_json::from_str(
            r#"{"seed": 7, "transforms": [{"kind": "binarize_at_median", "columns": ["age"]}]}"#,
        )
        .unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.fdr_q, 0.05);
        assert_eq!(
            config.transforms,
            [TransformSpec::BinarizeAtMedian {
                columns: vec!["age".to_owned()]
            }]
        );
    }

    #[test]
    fn test_rejects_bad_ranges() {
        let bad = [
            RunConfig {
                fdr_q: 1.0,
                ..RunConfig::default()
            },
            RunConfig {
                n_folds: 1,
                ..RunConfig::default()
            },
            RunConfig {
                sensitivity_q: Some(0.01),
                ..RunConfig::default()
            },
            RunConfig {
                stability_threshold: 1.5,
                ..RunConfig::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }

    #[test]
    fn test_binarize_column_must_be_numeric() {
        let catalog = FeatureCatalog::new(vec![
            FeatureSpec::new("age", FeatureKind::Numeric),
            FeatureSpec::new("sex", FeatureKind::Categorical),
        ])
        .unwrap();
        let config = RunConfig {
            transforms: vec![TransformSpec::BinarizeAtMedian {
                columns: vec!["sex".to_owned()],
            }],
            ..RunConfig::default()
        };
        assert!(matches!(
            config.validate_for(&catalog),
            Err(ConfigError::NonNumericColumn { .. })
        ));
    }
}
