use std::path::PathBuf;

use clap::{Parser, Subcommand};
use toxsel_selection::config::{FailurePolicy, RunConfig};

use self::{partition::PartitionArg, select::SelectArg};
use crate::util;

mod partition;
mod select;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct CommandArgs {
    /// Log debug output (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Clone, Subcommand)]
enum Mode {
    /// Label patients and build the outer split and inner folds
    Partition(#[clap(flatten)] PartitionArg),
    /// Run nested feature screening and stability selection
    Select(#[clap(flatten)] SelectArg),
}

/// Inputs and overrides shared by every subcommand.
#[derive(Debug, Clone, clap::Args)]
pub(crate) struct RunArg {
    /// Cohort JSON file
    cohort_file: PathBuf,
    /// Run configuration JSON file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Output file path
    #[arg(long)]
    output: Option<PathBuf>,
    /// Override the random seed
    #[arg(long)]
    seed: Option<u64>,
    /// Override the number of inner folds
    #[arg(long)]
    folds: Option<usize>,
    /// Override the test fraction of the outer split
    #[arg(long)]
    test_fraction: Option<f64>,
    /// Override the primary FDR level
    #[arg(long)]
    fdr_q: Option<f64>,
    /// Override the looser sensitivity FDR level
    #[arg(long)]
    sensitivity_q: Option<f64>,
    /// Override the stability threshold
    #[arg(long)]
    stability_threshold: Option<f64>,
    /// Abort on the first failed fold
    #[arg(long)]
    fail_fast: bool,
}

impl RunArg {
    fn load_config(&self) -> anyhow::Result<RunConfig> {
        let mut config = util::read_config_file(self.config.as_ref())?;
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(folds) = self.folds {
            config.n_folds = folds;
        }
        if let Some(test_fraction) = self.test_fraction {
            config.test_fraction = test_fraction;
        }
        if let Some(fdr_q) = self.fdr_q {
            config.fdr_q = fdr_q;
        }
        if let Some(sensitivity_q) = self.sensitivity_q {
            config.sensitivity_q = Some(sensitivity_q);
        }
        if let Some(threshold) = self.stability_threshold {
            config.stability_threshold = threshold;
        }
        if self.fail_fast {
            config.failure_policy = FailurePolicy::FailFast;
        }
        config.validate()?;
        Ok(config)
    }
}

pub fn run() -> anyhow::Result<()> {
    let args = CommandArgs::parse();
    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .init();

    match args.mode {
        Mode::Partition(arg) => partition::run(&arg)?,
        Mode::Select(arg) => select::run(&arg)?,
    }
    Ok(())
}
