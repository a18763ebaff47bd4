//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::analysis::Strategy;
use crate::config::SourceKind;
use clap::Parser;
use std::path::{Path, PathBuf};

/// StockBatch - concurrent batch technical analysis for A-share codes
///
/// Fetches daily bars for every code in a universe, runs one strategy over
/// each of them and writes a single ordered report. Failed codes never
/// abort the run; they are listed in the report with a reason.
///
/// Examples:
///   stockbatch --code 600519
///   stockbatch --codes 000001,600519,300750 --strategy ma2560
///   stockbatch --universe all_a.csv --main-board-only --workers 80
///   stockbatch --universe all_a.csv --source file --data-dir ./snapshots --format json
///   stockbatch --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Analyze a single security code
    #[arg(long, value_name = "CODE")]
    pub code: Option<String>,

    /// Security codes to analyze (comma-separated)
    ///
    /// Example: --codes 000001,600519
    #[arg(long, value_name = "CODES", value_delimiter = ',')]
    pub codes: Option<Vec<String>>,

    /// Universe file: one code per line, optional `,name` column
    ///
    /// Lines starting with '#' and blank lines are ignored.
    #[arg(short, long, value_name = "FILE")]
    pub universe: Option<PathBuf>,

    /// Keep only main-board codes (600/601/603/000/001/002) and drop ST names
    #[arg(long)]
    pub main_board_only: bool,

    /// Number of concurrent fetch slots
    ///
    /// Clamped to the universe size. Default: from config or 80.
    #[arg(
        short,
        long,
        visible_alias = "concurrency",
        value_name = "NUM",
        env = "STOCKBATCH_WORKERS"
    )]
    pub workers: Option<usize>,

    /// Attempts per code, first attempt included
    #[arg(long, value_name = "NUM")]
    pub max_attempts: Option<u32>,

    /// Timeout for a single data source call in milliseconds
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Delay before the first retry in milliseconds (doubles per retry)
    #[arg(long, value_name = "MS")]
    pub backoff_base_ms: Option<u64>,

    /// Make a single attempt per code
    #[arg(long, conflicts_with = "max_attempts")]
    pub no_retry: bool,

    /// Analysis strategy
    #[arg(long, value_name = "STRATEGY")]
    pub strategy: Option<Strategy>,

    /// Market data source
    #[arg(long, value_name = "SOURCE")]
    pub source: Option<SourceKind>,

    /// Base URL of the kline service
    #[arg(long, value_name = "URL", env = "STOCKBATCH_BASE_URL")]
    pub base_url: Option<String>,

    /// Directory of `{code}.json` files for `--source file`
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Number of daily bars to request
    #[arg(long, value_name = "DAYS")]
    pub history_days: Option<u32>,

    /// Output file path for the report (`-` for stdout)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .stockbatch.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Dry run: resolve the universe and exit without fetching
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .stockbatch.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Codes given directly on the command line, `--code` first.
    pub fn code_tokens(&self) -> Vec<&str> {
        self.code
            .iter()
            .map(String::as_str)
            .chain(self.codes.iter().flatten().map(String::as_str))
            .collect()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if self.code.is_none() && self.codes.is_none() && self.universe.is_none() {
            return Err("No codes to analyze: use --code, --codes or --universe".to_string());
        }

        if self.code_tokens().iter().any(|c| c.trim().is_empty()) {
            return Err("Security codes must not be empty".to_string());
        }

        if self.workers == Some(0) {
            return Err("Workers must be at least 1".to_string());
        }

        if self.max_attempts == Some(0) {
            return Err("Max attempts must be at least 1".to_string());
        }

        if self.timeout_ms == Some(0) {
            return Err("Timeout must be at least 1 ms".to_string());
        }

        if let Some(ref url) = self.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Base URL must start with 'http://' or 'https://'".to_string());
            }
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref path) = self.universe {
            if !path.is_file() {
                return Err(format!("Universe file does not exist: {}", path.display()));
            }
        }

        if let Some(ref dir) = self.data_dir {
            if !dir.is_dir() {
                return Err(format!("Data directory does not exist: {}", dir.display()));
            }
        }

        Ok(())
    }
}

/// Whether an output path means stdout.
pub fn is_stdout(path: &Path) -> bool {
    path.as_os_str() == "-"
}
