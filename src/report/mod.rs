//! Report rendering and sinks.

pub mod generator;

pub use generator::{generate_json_report, generate_markdown_report};

use crate::cli::OutputFormat;
use crate::models::Report;
use anyhow::{Context, Result};
use std::io::Write;
use std::path::PathBuf;

/// Accepts the finalized report and persists or prints it.
pub trait ReportSink {
    fn emit(&self, report: &Report) -> Result<()>;
}

fn render(report: &Report, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => generate_json_report(report),
        OutputFormat::Markdown => Ok(generate_markdown_report(report)),
    }
}

/// Writes the report to a file.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
    format: OutputFormat,
}

impl FileSink {
    pub fn new(path: PathBuf, format: OutputFormat) -> Self {
        Self { path, format }
    }
}

impl ReportSink for FileSink {
    fn emit(&self, report: &Report) -> Result<()> {
        let content = render(report, self.format)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write report to {}", self.path.display()))
    }
}

/// Prints the report to stdout.
#[derive(Debug, Clone)]
pub struct StdoutSink {
    format: OutputFormat,
}

impl StdoutSink {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

impl ReportSink for StdoutSink {
    fn emit(&self, report: &Report) -> Result<()> {
        let content = render(report, self.format)?;
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(content.as_bytes())
            .context("Failed to write report to stdout")?;
        stdout.flush().context("Failed to flush stdout")
    }
}
