//! Error types for batch analysis.
//!
//! Per-code errors (`FetchError`, `AnalysisError`) are always converted
//! into an `Outcome` by the scheduler. `OrchestratorError` is the only
//! error that can end a run early.

use thiserror::Error;

/// Failure reported by a data source for a single code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network error, timeout or rate limiting. Worth retrying.
    #[error("transient fetch error: {0}")]
    Transient(String),

    /// Unknown or delisted code. Retrying cannot help.
    #[error("permanent fetch error: {0}")]
    Permanent(String),

    /// Payload arrived but could not be parsed.
    #[error("malformed market data: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient(_) | FetchError::Malformed(_))
    }

    /// The message carried by the error, without the category prefix.
    pub fn detail(&self) -> &str {
        match self {
            FetchError::Transient(msg) | FetchError::Permanent(msg) | FetchError::Malformed(msg) => {
                msg
            }
        }
    }
}

/// Failure raised while analyzing fetched data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// Not enough bars for the strategy's longest window.
    #[error("insufficient history: need {needed} bars, got {got}")]
    InsufficientHistory { needed: usize, got: usize },

    /// Data had an unexpected shape (NaN prices, zero volume everywhere, ...).
    #[error("invalid market data: {0}")]
    InvalidData(String),

    /// The analyzer panicked.
    #[error("analyzer panicked: {0}")]
    Panicked(String),
}

/// Errors that abort a whole run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Concurrency budget of zero.
    #[error("concurrency must be at least 1 (got {0})")]
    InvalidConcurrency(usize),

    /// The scheduler's own bookkeeping is inconsistent.
    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),
}
