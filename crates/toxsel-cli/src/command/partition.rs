use std::collections::BTreeMap;

use anyhow::Context as _;
use serde::Serialize;
use toxsel_cohort::{PatientId, diagnostics::Diagnostics, label::LabelSummary};
use toxsel_partition::{PartitionPlan, Side};
use toxsel_selection::{config::RunConfig, pipeline::SelectionPipeline};

use super::RunArg;
use crate::util::{self, Output, RunMetadata};

#[derive(Debug, Clone, clap::Args)]
pub(crate) struct PartitionArg {
    #[clap(flatten)]
    pub(crate) run: RunArg,
}

#[derive(Debug, Serialize)]
struct PartitionReport<'a> {
    metadata: RunMetadata,
    config: &'a RunConfig,
    labels: &'a LabelSummary,
    undefined_patients: &'a [PatientId],
    partition: &'a PartitionPlan,
    assignments: BTreeMap<PatientId, Side>,
    diagnostics: Diagnostics,
}

pub fn run(arg: &PartitionArg) -> anyhow::Result<()> {
    let config = arg.run.load_config()?;
    let (cohort, mut diagnostics) = util::read_cohort_file(&arg.run.cohort_file)?;

    let pipeline = SelectionPipeline::new(config)?;
    let outcome = pipeline
        .partition(&cohort)
        .with_context(|| format!("Failed to partition {}", arg.run.cohort_file.display()))?;
    diagnostics.extend(outcome.diagnostics);

    let summary = &outcome.plan.summary;
    log::info!(
        "partitioned {} patients: {} train, {} test, {} fold(s)",
        summary.total_patients,
        summary.train_patients,
        summary.test_patients,
        summary.n_folds
    );

    let report = PartitionReport {
        metadata: RunMetadata::new("partition"),
        config: pipeline.config(),
        labels: outcome.labels.summary(),
        undefined_patients: outcome.labels.undefined(),
        partition: &outcome.plan,
        assignments: outcome.plan.outer.assignments(),
        diagnostics,
    };
    Output::save_json(&report, arg.run.output.clone())
}
