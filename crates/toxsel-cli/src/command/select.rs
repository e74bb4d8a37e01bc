use anyhow::Context as _;
use serde::Serialize;
use toxsel_selection::pipeline::{SelectionPipeline, SelectionReport};

use super::RunArg;
use crate::util::{self, Output, RunMetadata};

#[derive(Debug, Clone, clap::Args)]
pub(crate) struct SelectArg {
    #[clap(flatten)]
    pub(crate) run: RunArg,
}

#[derive(Debug, Serialize)]
struct SelectOutput {
    metadata: RunMetadata,
    #[serde(flatten)]
    report: SelectionReport,
}

pub fn run(arg: &SelectArg) -> anyhow::Result<()> {
    let config = arg.run.load_config()?;
    let (cohort, mut diagnostics) = util::read_cohort_file(&arg.run.cohort_file)?;

    let mut report = SelectionPipeline::new(config)?
        .run(&cohort)
        .with_context(|| format!("Feature selection failed for {}", arg.run.cohort_file.display()))?;
    diagnostics.extend(report.diagnostics);
    report.diagnostics = diagnostics;

    log::info!(
        "{} fold(s) completed, {} failed; final features: [{}]",
        report.folds.len(),
        report.failed_folds.len(),
        report.final_features.join(", ")
    );

    let output = SelectOutput {
        metadata: RunMetadata::new("select"),
        report,
    };
    Output::save_json(&output, arg.run.output.clone())
}
