use serde::{Deserialize, Serialize};

/// Stable patient identifier shared by every table and pipeline stage.
///
/// Identifiers order lexicographically; every stage that iterates over
/// patients does so in this order so that results never depend on input order.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
)]
#[serde(transparent)]
pub struct PatientId(String);

impl PatientId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PatientId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Binary toxicity label derived from raw grades.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::IsVariant,
)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    /// Worst grade at or below the threshold.
    Negative,
    /// Worst grade strictly above the threshold.
    Positive,
}

impl Label {
    pub const ALL: [Self; 2] = [Self::Negative, Self::Positive];

    /// Applies the boundary rule: `grade > threshold` is positive, `grade <= threshold` is negative.
    #[must_use]
    pub fn from_grade(grade: f64, threshold: f64) -> Self {
        if grade > threshold {
            Self::Positive
        } else {
            Self::Negative
        }
    }

    /// Class index used in messages and tables (`0` or `1`).
    #[must_use]
    pub fn as_index(self) -> usize {
        match self {
            Self::Negative => 0,
            Self::Positive => 1,
        }
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_index())
    }
}
