//! Retry policy with capped exponential backoff.
//!
//! The policy is a pure function of the failed attempt number and the
//! error class; the scheduler applies the resulting delay to that one work
//! item only.

use crate::error::FetchError;
use crate::models::FailureReason;
use std::time::Duration;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts per code, first attempt included
    pub max_attempts: u32,

    /// Attempt cap for malformed payloads (never above `max_attempts`)
    pub max_malformed_attempts: u32,

    /// Delay before the second attempt
    pub backoff_base: Duration,

    /// Upper bound on any single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_malformed_attempts: 2,
            backoff_base: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// What to do after a failed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-admit the code after the delay.
    Retry(Duration),
    /// Record a terminal failure.
    GiveUp(FailureReason),
}

impl RetryPolicy {
    /// Create a policy with fast retries (for testing)
    #[cfg(test)]
    pub fn fast(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            max_malformed_attempts: 2,
            backoff_base: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
        }
    }

    /// Delay after attempt `attempt` failed: `base * 2^(attempt - 1)`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        2u32.checked_pow(attempt - 1)
            .and_then(|factor| self.backoff_base.checked_mul(factor))
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }

    /// Effective attempt cap for malformed payloads.
    pub fn malformed_cap(&self) -> u32 {
        self.max_malformed_attempts.min(self.max_attempts)
    }

    /// Decide the next step after `attempt` failed with `error`.
    pub fn decide(&self, error: &FetchError, attempt: u32) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::GiveUp(FailureReason::Permanent);
        }

        let (cap, exhausted) = match error {
            FetchError::Malformed(_) => (self.malformed_cap(), FailureReason::MalformedExhausted),
            _ => (self.max_attempts, FailureReason::TransientExhausted),
        };

        if attempt < cap {
            RetryDecision::Retry(self.backoff(attempt))
        } else {
            RetryDecision::GiveUp(exhausted)
        }
    }
}
