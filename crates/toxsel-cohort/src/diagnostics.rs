//! Structured diagnostic events
//!
//! Stages never print free-form "why is this empty" messages. Each recoverable
//! data problem becomes a [`DiagnosticEvent`] with a reason from a closed set,
//! collected in a [`Diagnostics`] list that is returned alongside the results.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::PatientId;

/// Closed set of reasons a value, series or result is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// The source for a patient (e.g. its time series) is absent.
    FileMissing,
    /// A series has no rows inside the observation window.
    WindowEmpty,
    /// A declared column is absent.
    ColumnMissing,
    /// A value, or every value of a column, is missing.
    ValueMissing,
    /// A computation failed for this unit of work.
    ProcessingError,
}

/// Pipeline stage that emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Labeling,
    WindowAggregation,
    Transform,
    Screening,
    Fold,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticEvent {
    pub reason: ReasonCode,
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<PatientId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fold_index: Option<usize>,
    pub detail: String,
}

impl DiagnosticEvent {
    #[must_use]
    pub fn new(reason: ReasonCode, stage: Stage, detail: impl Into<String>) -> Self {
        Self {
            reason,
            stage,
            patient_id: None,
            feature: None,
            fold_index: None,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn patient(mut self, patient_id: &PatientId) -> Self {
        self.patient_id = Some(patient_id.clone());
        self
    }

    #[must_use]
    pub fn feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    #[must_use]
    pub fn fold(mut self, fold_index: usize) -> Self {
        self.fold_index = Some(fold_index);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics {
    events: Vec<DiagnosticEvent>,
}

impl Diagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: DiagnosticEvent) {
        self.events.push(event);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.events.extend(other.events);
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiagnosticEvent> + '_ {
        self.events.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events per reason code.
    #[must_use]
    pub fn count_by_reason(&self) -> BTreeMap<ReasonCode, usize> {
        let mut counts = BTreeMap::new();
        for event in &self.events {
            *counts.entry(event.reason).or_insert(0) += 1;
        }
        counts
    }
}
