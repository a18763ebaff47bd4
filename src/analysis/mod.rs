//! Analyzers: deterministic market data → signal functions.
//!
//! The strategy is chosen once when the scheduler is built; every code in
//! a run goes through the same analyzer.

pub mod classic;
pub mod indicators;
pub mod ma2560;

pub use classic::ClassicAnalyzer;
pub use ma2560::Ma2560Analyzer;

use crate::error::AnalysisError;
use crate::models::{RawMarketData, SecurityCode, Signal};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Turns fetched market data into a signal.
///
/// Implementations must be pure: the same input always yields the same
/// signal.
pub trait Analyzer: Send + Sync {
    /// Strategy name recorded in signals and report metadata.
    fn name(&self) -> &'static str;

    fn analyze(&self, code: &SecurityCode, data: &RawMarketData) -> Result<Signal, AnalysisError>;
}

/// Available strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Moving averages, RSI, MACD, KDJ and Bollinger vote (default)
    #[default]
    Classic,
    /// MA25 / MA60 trend-following ("2560")
    Ma2560,
}

/// Build the analyzer for a strategy.
pub fn build_analyzer(strategy: Strategy) -> Arc<dyn Analyzer> {
    match strategy {
        Strategy::Classic => Arc::new(ClassicAnalyzer),
        Strategy::Ma2560 => Arc::new(Ma2560Analyzer),
    }
}

/// Shared input checks: enough bars and positive, finite prices.
pub(crate) fn check_history(data: &RawMarketData, needed: usize) -> Result<(), AnalysisError> {
    if data.bars.len() < needed {
        return Err(AnalysisError::InsufficientHistory {
            needed,
            got: data.bars.len(),
        });
    }

    if let Some(bad) = data
        .bars
        .iter()
        .find(|b| !(b.close.is_finite() && b.close > 0.0) || b.high < b.low)
    {
        return Err(AnalysisError::InvalidData(format!(
            "inconsistent bar dated {}",
            bad.date
        )));
    }

    Ok(())
}
