use std::{
    fs::File,
    io::{self, BufWriter, StdoutLock, Write as _},
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use toxsel_cohort::{diagnostics::Diagnostics, input::CohortInput, table::CohortTable};
use toxsel_selection::config::RunConfig;

#[derive(Debug)]
pub enum Output {
    Stdout {
        writer: StdoutLock<'static>,
    },
    File {
        writer: BufWriter<File>,
        path: PathBuf,
    },
}

impl Output {
    pub fn save_json<T>(value: &T, output_path: Option<PathBuf>) -> anyhow::Result<()>
    where
        T: Serialize,
    {
        let mut output = Output::from_output_path(output_path)?;
        output.write_json(value)?;
        log::info!("report written to {}", output.display_path());
        Ok(())
    }

    pub fn from_output_path(output_path: Option<PathBuf>) -> anyhow::Result<Self> {
        match output_path {
            Some(path) => Output::open(path),
            None => Ok(Output::stdout()),
        }
    }

    pub fn stdout() -> Self {
        Output::Stdout {
            writer: io::stdout().lock(),
        }
    }

    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let file = File::create(&path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        Ok(Output::File {
            writer: BufWriter::new(file),
            path,
        })
    }

    pub fn display_path(&self) -> String {
        match self {
            Output::Stdout { .. } => "stdout".to_string(),
            Output::File { path, .. } => path.display().to_string(),
        }
    }

    pub fn write_json<T>(&mut self, value: T) -> anyhow::Result<()>
    where
        T: Serialize,
    {
        serde_json::to_writer_pretty(&mut *self, &value)
            .with_context(|| format!("Failed to write JSON to {}", self.display_path()))?;
        writeln!(&mut *self).with_context(|| {
            format!(
                "Failed to write newline after JSON to {}",
                self.display_path()
            )
        })?;
        self.flush()
            .with_context(|| format!("Failed to flush output to {}", self.display_path()))?;
        Ok(())
    }
}

impl io::Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Output::Stdout { writer } => writer.write(buf),
            Output::File { writer, .. } => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Output::Stdout { writer } => writer.flush(),
            Output::File { writer, .. } => writer.flush(),
        }
    }
}

pub fn read_json_file<T, P>(file_kind: &str, path: P) -> anyhow::Result<T>
where
    T: serde::de::DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open {} file: {}", file_kind, path.display()))?;

    let reader = io::BufReader::new(file);
    let value = serde_json::from_reader(reader).with_context(|| {
        format!(
            "Failed to parse {} JSON file: {}",
            file_kind,
            path.display()
        )
    })?;

    Ok(value)
}

/// Read a cohort file and build the validated cohort table
///
/// Window aggregation of dynamic variables happens here; its diagnostic
/// events are returned alongside the table.
pub fn read_cohort_file<P>(path: P) -> anyhow::Result<(CohortTable, Diagnostics)>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let input: CohortInput = read_json_file("cohort", path)?;
    let mut diagnostics = Diagnostics::new();
    let cohort = input
        .into_cohort(&mut diagnostics)
        .with_context(|| format!("Invalid cohort in {}", path.display()))?;
    log::info!(
        "loaded {} rows, {} feature(s) and {} grade column(s) from {}",
        cohort.row_patients().len(),
        cohort.features().columns().len(),
        cohort.grades().len(),
        path.display()
    );
    Ok((cohort, diagnostics))
}

pub fn read_config_file<P>(path: Option<P>) -> anyhow::Result<RunConfig>
where
    P: AsRef<Path>,
{
    match path {
        Some(path) => read_json_file("config", path),
        None => Ok(RunConfig::default()),
    }
}

/// Provenance stamped on every report.
#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    pub tool: &'static str,
    pub version: &'static str,
    pub command: &'static str,
    pub generated_at: DateTime<Utc>,
}

impl RunMetadata {
    pub fn new(command: &'static str) -> Self {
        Self {
            tool: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            command,
            generated_at: Utc::now(),
        }
    }
}
