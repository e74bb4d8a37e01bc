//! Declared feature catalog
//!
//! Each candidate feature carries a declared [`FeatureKind`] and the
//! [`TestKind`] used to screen it. Both are fixed when the catalog is built,
//! so the same feature is tested the same way in every fold and in the
//! reference pass. Nothing is inferred from column names or values.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Measurement scale of a feature column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Numeric,
    Ordinal,
    Categorical,
}

/// Univariate association test applied to a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    /// Two-sided Mann–Whitney U rank test between label classes.
    MannWhitneyU,
    /// Pearson chi-square test on the category × label table.
    ChiSquare,
}

impl FeatureKind {
    /// Test used when a spec does not override it.
    #[must_use]
    pub fn default_test(self) -> TestKind {
        match self {
            Self::Numeric | Self::Ordinal => TestKind::MannWhitneyU,
            Self::Categorical => TestKind::ChiSquare,
        }
    }

    #[must_use]
    pub fn supports(self, test: TestKind) -> bool {
        match test {
            TestKind::MannWhitneyU => matches!(self, Self::Numeric | Self::Ordinal),
            // ordinal scores may also be tested as unordered levels
            TestKind::ChiSquare => matches!(self, Self::Categorical | Self::Ordinal),
        }
    }

    /// Whether values of this kind are stored as numbers.
    #[must_use]
    pub fn is_numeric_storage(self) -> bool {
        matches!(self, Self::Numeric | Self::Ordinal)
    }
}

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum CatalogError {
    #[display("feature '{name}' is declared more than once")]
    DuplicateFeature { name: String },
    #[display("feature '{name}' is {kind:?} and cannot be screened with {test:?}")]
    IncompatibleTest {
        name: String,
        kind: FeatureKind,
        test: TestKind,
    },
}

/// Declared type and test of one feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    pub kind: FeatureKind,
    pub test: TestKind,
}

impl FeatureSpec {
    /// Declares a feature screened with the default test for its kind.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FeatureKind) -> Self {
        Self {
            name: name.into(),
            kind,
            test: kind.default_test(),
        }
    }

    /// Overrides the declared test.
    pub fn with_test(mut self, test: TestKind) -> Result<Self, CatalogError> {
        if !self.kind.supports(test) {
            return Err(CatalogError::IncompatibleTest {
                name: self.name,
                kind: self.kind,
                test,
            });
        }
        self.test = test;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.kind.supports(self.test) {
            Ok(())
        } else {
            Err(CatalogError::IncompatibleTest {
                name: self.name.clone(),
                kind: self.kind,
                test: self.test,
            })
        }
    }
}

/// Ordered table of `{feature_name → {kind, test}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeatureCatalog {
    specs: Vec<FeatureSpec>,
}

impl FeatureCatalog {
    pub fn new(specs: Vec<FeatureSpec>) -> Result<Self, CatalogError> {
        let mut seen = BTreeSet::new();
        for spec in &specs {
            spec.validate()?;
            if !seen.insert(spec.name.as_str()) {
                return Err(CatalogError::DuplicateFeature {
                    name: spec.name.clone(),
                });
            }
        }
        Ok(Self { specs })
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FeatureSpec> {
        self.specs.iter().find(|spec| spec.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureSpec> + '_ {
        self.specs.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
