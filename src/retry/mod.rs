//! Retry policy for transient fetch failures
//!
//! Only `transient_error` outcomes are ever retried. Blocked outcomes go to
//! the blocking detector and robots-disallowed items never reach the policy.
//!
//! The delay before retry `n` (0-based) is
//! `base_delay * backoff_factor^n`, capped at the configured ceiling.

use crate::crawler::{FetchOutcome, StatusClass};
use crate::source::RetryPolicyConfig;
use std::fmt;
use std::time::Duration;

/// Why the policy refused to retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// `max_retries` attempts were already spent; the item is a terminal error
    RetriesExhausted,
    /// The outcome class is never retried
    NotRetryable,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetriesExhausted => f.write_str("retries exhausted"),
            Self::NotRetryable => f.write_str("not retryable"),
        }
    }
}

/// Decision for one failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    Abort(AbortReason),
}

/// Per-source retry policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff_factor: f64,
    base_delay: Duration,
    ceiling: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RetryPolicyConfig, ceiling: Duration) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_factor: config.backoff_factor,
            base_delay: config.base_delay,
            ceiling,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decides whether the item gets another attempt
    ///
    /// # Arguments
    ///
    /// * `attempt` - Number of retries already made for this item (0 after the first failure)
    /// * `outcome` - The outcome of the attempt that just failed
    pub fn decide(&self, attempt: u32, outcome: &FetchOutcome) -> RetryDecision {
        if outcome.status_class != StatusClass::TransientError {
            return RetryDecision::Abort(AbortReason::NotRetryable);
        }

        if attempt >= self.max_retries {
            return RetryDecision::Abort(AbortReason::RetriesExhausted);
        }

        RetryDecision::RetryAfter(self.backoff(attempt))
    }

    /// Backoff before retry number `attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.base_delay.as_secs_f64() * factor;

        if !secs.is_finite() || secs >= self.ceiling.as_secs_f64() {
            self.ceiling
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}
