//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.stockbatch.toml` files.

use crate::analysis::Strategy;
use crate::scheduler::{RetryPolicy, SchedulerConfig};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name, looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = ".stockbatch.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Retry and timeout settings.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Market data source settings.
    #[serde(default)]
    pub source: SourceConfig,

    /// Analyzer settings.
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Universe filtering settings.
    #[serde(default)]
    pub universe: UniverseConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default report path. `-` writes to stdout.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Number of concurrent fetch slots.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
            concurrency: default_concurrency(),
        }
    }
}

fn default_output() -> String {
    "stockbatch_report.md".to_string()
}

fn default_concurrency() -> usize {
    80
}

/// Retry budget, backoff and per-call timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per code, first attempt included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Attempts per code when the payload keeps arriving malformed.
    #[serde(default = "default_max_malformed_attempts")]
    pub max_malformed_attempts: u32,

    /// Delay before the first retry, doubled on each further retry.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound on a single backoff delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Timeout for one data source call.
    #[serde(default = "default_per_call_timeout_ms")]
    pub per_call_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_malformed_attempts: default_max_malformed_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            per_call_timeout_ms: default_per_call_timeout_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_malformed_attempts() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_per_call_timeout_ms() -> u64 {
    10_000
}

/// Which data source adapter to use.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Tencent daily kline HTTP endpoint
    #[default]
    Tencent,
    /// Local `{code}.json` files
    File,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Tencent => write!(f, "tencent"),
            SourceKind::File => write!(f, "file"),
        }
    }
}

/// Market data source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Adapter kind.
    #[serde(default)]
    pub kind: SourceKind,

    /// Base URL of the kline service.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Directory holding `{code}.json` files for the file source.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Number of daily bars to request.
    #[serde(default = "default_history_days")]
    pub history_days: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            base_url: default_base_url(),
            data_dir: default_data_dir(),
            history_days: default_history_days(),
        }
    }
}

fn default_base_url() -> String {
    "https://web.ifzq.gtimg.cn".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_history_days() -> u32 {
    120
}

/// Analyzer settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Strategy used for every code in the run.
    #[serde(default)]
    pub strategy: Strategy,
}

/// Universe settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UniverseConfig {
    /// Keep only Shanghai/Shenzhen main-board codes and drop ST names.
    #[serde(default)]
    pub main_board_only: bool,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(workers) = args.workers {
            self.general.concurrency = workers;
        }
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }

        if let Some(max_attempts) = args.max_attempts {
            self.retry.max_attempts = max_attempts;
        }
        if let Some(timeout_ms) = args.timeout_ms {
            self.retry.per_call_timeout_ms = timeout_ms;
        }
        if let Some(backoff_base_ms) = args.backoff_base_ms {
            self.retry.backoff_base_ms = backoff_base_ms;
        }
        if args.no_retry {
            self.retry.max_attempts = 1;
            self.retry.max_malformed_attempts = 1;
        }

        if let Some(kind) = args.source {
            self.source.kind = kind;
        }
        if let Some(ref base_url) = args.base_url {
            self.source.base_url = base_url.clone();
        }
        if let Some(ref data_dir) = args.data_dir {
            self.source.data_dir = data_dir.clone();
        }
        if let Some(days) = args.history_days {
            self.source.history_days = days;
        }

        if let Some(strategy) = args.strategy {
            self.analysis.strategy = strategy;
        }

        // Flags always override
        if args.main_board_only {
            self.universe.main_board_only = true;
        }
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.general.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if self.retry.per_call_timeout_ms == 0 {
            bail!("per_call_timeout_ms must be at least 1");
        }
        if self.source.history_days == 0 {
            bail!("history_days must be at least 1");
        }
        if self.source.kind == SourceKind::Tencent
            && !self.source.base_url.starts_with("http://")
            && !self.source.base_url.starts_with("https://")
        {
            bail!("base_url must start with 'http://' or 'https://'");
        }
        Ok(())
    }

    /// Log level: `quiet` wins, then `[general] verbose` (or `--verbose`).
    pub fn log_level(&self, quiet: bool) -> tracing::Level {
        if quiet {
            tracing::Level::ERROR
        } else if self.general.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_millis(self.retry.per_call_timeout_ms)
    }

    /// Retry policy described by the `[retry]` section.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            max_malformed_attempts: self.retry.max_malformed_attempts,
            backoff_base: Duration::from_millis(self.retry.backoff_base_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            retry: self.retry_policy(),
            per_call_timeout: self.per_call_timeout(),
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::tests::make_args;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.concurrency, 80);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.source.kind, SourceKind::Tencent);
        assert_eq!(config.analysis.strategy, Strategy::Classic);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output = "nightly.md"
concurrency = 16

[retry]
max_attempts = 5
per_call_timeout_ms = 2500

[source]
kind = "file"
data_dir = "snapshots"

[analysis]
strategy = "ma2560"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output, "nightly.md");
        assert_eq!(config.general.concurrency, 16);
        assert_eq!(config.retry.max_attempts, 5);
        // Unset keys keep their defaults
        assert_eq!(config.retry.max_malformed_attempts, 2);
        assert_eq!(config.per_call_timeout(), Duration::from_millis(2500));
        assert_eq!(config.source.kind, SourceKind::File);
        assert_eq!(config.source.data_dir, PathBuf::from("snapshots"));
        assert_eq!(config.source.history_days, 120);
        assert_eq!(config.analysis.strategy, Strategy::Ma2560);
        assert!(!config.universe.main_board_only);
    }

    #[test]
    fn test_merge_only_overrides_given_values() {
        let mut config = Config::default();
        config.general.concurrency = 16;

        let mut args = make_args();
        args.max_attempts = Some(7);
        args.strategy = Some(Strategy::Ma2560);
        config.merge_with_args(&args);

        assert_eq!(config.general.concurrency, 16);
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.analysis.strategy, Strategy::Ma2560);

        args.workers = Some(4);
        args.no_retry = true;
        config.merge_with_args(&args);
        assert_eq!(config.general.concurrency, 4);
        assert_eq!(config.retry_policy().max_attempts, 1);
        assert_eq!(config.retry_policy().malformed_cap(), 1);
    }

    #[test]
    fn test_validate_rejects_zero_budgets() {
        let mut config = Config::default();
        config.general.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.per_call_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_policy_from_config() {
        let mut config = Config::default();
        config.retry.backoff_base_ms = 100;
        config.retry.max_backoff_ms = 300;

        let policy = config.retry_policy();
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(3), Duration::from_millis(300));
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[retry]"));
        assert!(toml_str.contains("[source]"));
        assert!(toml_str.contains("kind = \"tencent\""));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.general.concurrency, 80);
    }

    #[test]
    fn test_log_level_follows_config() {
        let mut config = Config::default();
        assert_eq!(config.log_level(false), tracing::Level::INFO);

        let file_verbose: Config = toml::from_str("[general]\nverbose = true\n").unwrap();
        assert_eq!(file_verbose.log_level(false), tracing::Level::DEBUG);

        let mut args = make_args();
        args.verbose = true;
        config.merge_with_args(&args);
        assert_eq!(config.log_level(false), tracing::Level::DEBUG);

        // Quiet wins over a verbose config file
        assert_eq!(file_verbose.log_level(true), tracing::Level::ERROR);
    }
}
