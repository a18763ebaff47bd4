//! Result aggregation.
//!
//! The aggregator owns the write-once outcome store. Outcomes arrive in
//! completion order and leave in universe order.

use crate::error::OrchestratorError;
use crate::models::{Outcome, Report, ReportMetadata, SecurityCode, SkipReason, Summary};
use crate::universe::Universe;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Collects exactly one outcome per universe code.
#[derive(Debug)]
pub struct Aggregator {
    codes: Vec<SecurityCode>,
    positions: HashMap<SecurityCode, usize>,
    outcomes: Vec<Option<Outcome>>,
    recorded: usize,
}

impl Aggregator {
    pub fn new(universe: &Universe) -> Self {
        let codes = universe.codes().to_vec();
        let positions = codes
            .iter()
            .enumerate()
            .map(|(i, code)| (code.clone(), i))
            .collect();
        let outcomes = vec![None; codes.len()];

        Self {
            codes,
            positions,
            outcomes,
            recorded: 0,
        }
    }

    /// Record the terminal outcome for one code.
    ///
    /// Recording a code twice, or a code outside the universe, means the
    /// scheduler's bookkeeping is broken.
    pub fn record(&mut self, outcome: Outcome) -> Result<(), OrchestratorError> {
        let position = *self.positions.get(outcome.code()).ok_or_else(|| {
            OrchestratorError::InvariantViolation(format!(
                "outcome for {} which is not in the universe",
                outcome.code()
            ))
        })?;

        let slot = &mut self.outcomes[position];
        if slot.is_some() {
            return Err(OrchestratorError::InvariantViolation(format!(
                "second outcome recorded for {}",
                outcome.code()
            )));
        }

        debug!("Recorded {} for {}", outcome.label(), outcome.code());
        *slot = Some(outcome);
        self.recorded += 1;
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.recorded == self.codes.len()
    }

    /// Codes still without an outcome.
    pub fn pending(&self) -> usize {
        self.codes.len() - self.recorded
    }

    /// Build the report in universe order.
    ///
    /// For a cancelled run, codes without an outcome become
    /// `Skipped("cancelled")`. Otherwise every code must already be recorded.
    pub fn finalize(
        self,
        metadata: ReportMetadata,
        elapsed: Duration,
    ) -> Result<Report, OrchestratorError> {
        if !metadata.cancelled && !self.is_complete() {
            return Err(OrchestratorError::InvariantViolation(format!(
                "finalize with {} unresolved codes",
                self.pending()
            )));
        }

        let outcomes: Vec<Outcome> = self
            .outcomes
            .into_iter()
            .zip(self.codes)
            .map(|(outcome, code)| {
                outcome.unwrap_or(Outcome::Skipped {
                    code,
                    reason: SkipReason::Cancelled,
                })
            })
            .collect();

        let total_duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let summary = Summary::from_outcomes(&outcomes, total_duration_ms);

        Ok(Report {
            metadata,
            outcomes,
            summary,
        })
    }
}
