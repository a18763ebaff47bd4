//! Data models for batch analysis.
//!
//! This module contains the core data structures shared by the universe
//! provider, data sources, analyzers, scheduler and report generation.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Immutable identifier of one security, e.g. `600519`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecurityCode(String);

/// Exchange a code trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    Shanghai,
    Shenzhen,
    Beijing,
}

impl Exchange {
    /// Prefix used by quote vendors (`sh600000`).
    pub fn prefix(&self) -> &'static str {
        match self {
            Exchange::Shanghai => "sh",
            Exchange::Shenzhen => "sz",
            Exchange::Beijing => "bj",
        }
    }
}

/// Code prefixes of the Shanghai and Shenzhen main boards.
const MAIN_BOARD_PREFIXES: [&str; 6] = ["600", "601", "603", "000", "001", "002"];

impl SecurityCode {
    /// Parse a code token. Returns `None` for empty input or embedded whitespace.
    ///
    /// The format is not validated here: a malformed code is still a member
    /// of the universe and is rejected by the data source.
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Six ASCII digits.
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == 6 && self.0.bytes().all(|b| b.is_ascii_digit())
    }

    /// Exchange derived from the leading digit, if the code is well formed.
    pub fn exchange(&self) -> Option<Exchange> {
        if !self.is_well_formed() {
            return None;
        }
        match self.0.as_bytes()[0] {
            b'6' | b'9' => Some(Exchange::Shanghai),
            b'0' | b'2' | b'3' => Some(Exchange::Shenzhen),
            b'4' | b'8' => Some(Exchange::Beijing),
            _ => None,
        }
    }

    /// Vendor code such as `sz000001`.
    pub fn full_code(&self) -> Option<String> {
        self.exchange().map(|ex| format!("{}{}", ex.prefix(), self.0))
    }

    /// Whether the code belongs to the Shanghai/Shenzhen main boards.
    pub fn is_main_board(&self) -> bool {
        self.is_well_formed() && MAIN_BOARD_PREFIXES.iter().any(|p| self.0.starts_with(p))
    }
}

impl fmt::Display for SecurityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One daily OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Payload returned by a data source for one code. Bars are oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMarketData {
    pub code: SecurityCode,
    pub name: Option<String>,
    pub bars: Vec<Bar>,
}

impl RawMarketData {
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume).collect()
    }
}

/// Trading recommendation produced by an analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Sell,
    Hold,
    Buy,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recommendation::Sell => write!(f, "Sell"),
            Recommendation::Hold => write!(f, "Hold"),
            Recommendation::Buy => write!(f, "Buy"),
        }
    }
}

impl Recommendation {
    /// Returns an emoji representation of the recommendation.
    pub fn emoji(&self) -> &'static str {
        match self {
            Recommendation::Sell => "🔴",
            Recommendation::Hold => "🟡",
            Recommendation::Buy => "🟢",
        }
    }
}

/// Direction of a moving average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Flat,
}

impl Trend {
    /// Classify a change; exact zero is flat.
    pub fn from_change(change: f64) -> Self {
        if change > 0.0 {
            Trend::Up
        } else if change < 0.0 {
            Trend::Down
        } else {
            Trend::Flat
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Up => write!(f, "Up"),
            Trend::Down => write!(f, "Down"),
            Trend::Flat => write!(f, "Flat"),
        }
    }
}

/// Result of analyzing one code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Name of the strategy that produced this signal.
    pub strategy: String,
    /// Security name, if the data source reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub recommendation: Recommendation,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Overall trend assessment.
    pub trend: Trend,
    pub last_close: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub support: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resistance: Option<f64>,
    /// Named indicator values, rounded for display.
    pub indicators: BTreeMap<String, f64>,
    /// Short human-readable reasons behind the recommendation.
    pub notes: Vec<String>,
}

/// A code being executed by one slot. Replaced by `next()` on retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub code: SecurityCode,
    /// 1-based attempt number.
    pub attempt: u32,
}

impl WorkItem {
    pub fn first(code: SecurityCode) -> Self {
        Self { code, attempt: 1 }
    }

    pub fn next(&self) -> Self {
        Self {
            code: self.code.clone(),
            attempt: self.attempt + 1,
        }
    }
}

/// Why a code ended as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    #[serde(rename = "permanent")]
    Permanent,
    #[serde(rename = "transient-exhausted")]
    TransientExhausted,
    #[serde(rename = "malformed-exhausted")]
    MalformedExhausted,
    #[serde(rename = "analysis-error")]
    AnalysisError,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Permanent => "permanent",
            FailureReason::TransientExhausted => "transient-exhausted",
            FailureReason::MalformedExhausted => "malformed-exhausted",
            FailureReason::AnalysisError => "analysis-error",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a code never reached a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SkipReason {
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result for one code. Exactly one exists per universe member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Success {
        code: SecurityCode,
        signal: Signal,
    },
    Failure {
        code: SecurityCode,
        reason: FailureReason,
        /// Last underlying error message.
        detail: String,
        attempts_used: u32,
    },
    Skipped {
        code: SecurityCode,
        reason: SkipReason,
    },
}

impl Outcome {
    pub fn code(&self) -> &SecurityCode {
        match self {
            Outcome::Success { code, .. }
            | Outcome::Failure { code, .. }
            | Outcome::Skipped { code, .. } => code,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure { .. })
    }

    /// Short label used in tables and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success { .. } => "success",
            Outcome::Failure { .. } => "failure",
            Outcome::Skipped { .. } => "skipped",
        }
    }
}

/// Summary counts of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_duration_ms: u64,
}

impl Summary {
    /// Tally outcome variants.
    pub fn from_outcomes(outcomes: &[Outcome], total_duration_ms: u64) -> Self {
        let mut summary = Self {
            total_duration_ms,
            ..Self::default()
        };

        for outcome in outcomes {
            match outcome {
                Outcome::Success { .. } => summary.succeeded += 1,
                Outcome::Failure { .. } => summary.failed += 1,
                Outcome::Skipped { .. } => summary.skipped += 1,
            }
        }

        summary
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

/// Metadata about one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Analyzer strategy name.
    pub strategy: String,
    /// Data source name.
    pub source: String,
    /// Effective (clamped) concurrency.
    pub concurrency: usize,
    /// Retry budget per code.
    pub max_attempts: u32,
    /// Whether the run was cancelled before every code resolved.
    pub cancelled: bool,
}

/// The consolidated, universe-ordered result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    /// One outcome per code, in universe order.
    pub outcomes: Vec<Outcome>,
    pub summary: Summary,
}

impl Report {
    /// Count successful outcomes by recommendation.
    pub fn recommendation_counts(&self) -> BTreeMap<Recommendation, usize> {
        let mut counts = BTreeMap::new();
        for outcome in &self.outcomes {
            if let Outcome::Success { signal, .. } = outcome {
                *counts.entry(signal.recommendation).or_insert(0) += 1;
            }
        }
        counts
    }

    pub fn failures(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|o| o.is_failure())
    }
}
