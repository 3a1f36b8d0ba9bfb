//! Retry policy
//!
//! One bounded budget covers both transient submission errors and
//! execution failures: every attempt consumed here is visible in the
//! submission record. Retries resubmit the whole job; there is no
//! per-node repair, because a partial world is useless to a distributed
//! training run.

use std::time::Duration;

use crate::launcher::SubmissionError;

/// What the orchestrator should do after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Resubmit after the given delay
    Retry { delay: Duration },
    /// The error cannot heal on retry; fail immediately
    Fatal,
    /// The budget is spent; stop retrying
    Exhausted,
}

/// Exponential backoff with a cap, shared by both failure classes
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Delay before the given attempt (zero-based): base * 2^attempt,
    /// capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Decide on a submission error. Transient errors retry within the
    /// budget; everything else (auth rejections, malformed output,
    /// missing artifacts) is fatal.
    pub fn on_submission_error(
        &self,
        error: &SubmissionError,
        retry_count: u32,
        max_retry: u32,
    ) -> RetryDecision {
        if !error.is_transient() {
            return RetryDecision::Fatal;
        }
        if retry_count >= max_retry {
            return RetryDecision::Exhausted;
        }
        RetryDecision::Retry {
            delay: self.backoff(retry_count),
        }
    }

    /// Decide on an execution failure reported by the backend
    pub fn on_execution_failure(&self, retry_count: u32, max_retry: u32) -> RetryDecision {
        if retry_count >= max_retry {
            return RetryDecision::Exhausted;
        }
        RetryDecision::Retry {
            delay: self.backoff(retry_count),
        }
    }
}
