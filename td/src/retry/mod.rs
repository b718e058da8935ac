//! `RetryManager`: classify an `ExecuteResult`/gate failure into a cause,
//! decide PASS/RETRY/ESCALATE, and compute a jittered exponential backoff.
//! Classification is grounded on `llm::error::LlmError::is_retryable`'s
//! per-variant retry decision.

mod backoff;
mod escalation;

pub use backoff::compute_delay_ms;
pub use escalation::{build_report as build_escalation_report, EscalationReport, RetryAttempt};

use serde::Serialize;

use crate::executor::{ExecuteResult, ExecuteStatus};
use crate::review::gates::{GateResult, GateVerdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum FailureType {
    Timeout,
    QualityFailure,
    Incomplete,
    RateLimit,
    FatalError,
    TransientError,
    Unknown,
}

const OMISSION_MARKERS: &[&str] = &["…", "// 残り省略", "// etc.", "// 以下同様"];

/// Classify why a review iteration did not PASS. `error_message` is the
/// raw error string from an executor failure, if any; `None` for a gate
/// rejection on an otherwise-successful execution.
pub fn classify(result: Option<&ExecuteResult>, gates: &[GateResult], error_message: Option<&str>) -> FailureType {
    if let Some(message) = error_message {
        let lowered = message.to_lowercase();
        if lowered.contains("429") || lowered.contains("rate limit") {
            return FailureType::RateLimit;
        }
        if lowered.contains("401") || lowered.contains("403") || lowered.contains("auth") {
            return FailureType::FatalError;
        }
        return FailureType::TransientError;
    }

    if let Some(result) = result {
        if result.status == ExecuteStatus::Timeout {
            return FailureType::Timeout;
        }
        if OMISSION_MARKERS.iter().any(|m| result.output.contains(m)) {
            return FailureType::Incomplete;
        }
    }

    if gates.iter().any(|g| g.verdict == GateVerdict::Fail) {
        return FailureType::QualityFailure;
    }

    FailureType::Unknown
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RetryDecision {
    Pass,
    Retry,
    Escalate,
}

pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter_fraction: f64,
    pub rate_limit_initial_delay_ms: u64,
    pub timeout_max_delay_ms: u64,
}

impl From<&crate::config::RetryConfig> for RetryPolicy {
    fn from(c: &crate::config::RetryConfig) -> Self {
        Self {
            max_retries: c.max_retries,
            initial_delay_ms: c.initial_delay_ms,
            multiplier: c.multiplier,
            max_delay_ms: c.max_delay_ms,
            jitter_fraction: c.jitter_fraction,
            rate_limit_initial_delay_ms: c.rate_limit_initial_delay_ms,
            timeout_max_delay_ms: c.timeout_max_delay_ms,
        }
    }
}

pub struct RetryManager {
    policy: RetryPolicy,
}

impl RetryManager {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Decide what to do given the failure type and how many retries have
    /// already been attempted for this task.
    pub fn decide(&self, failure_type: FailureType, retry_count: u32) -> RetryDecision {
        if failure_type == FailureType::FatalError {
            return RetryDecision::Escalate;
        }
        if retry_count >= self.policy.max_retries {
            return RetryDecision::Escalate;
        }
        RetryDecision::Retry
    }

    /// Exponential backoff with symmetric jitter, with cause-specific
    /// overrides for the initial delay (rate limits) and cap (timeouts).
    pub fn delay_ms(&self, failure_type: FailureType, attempt: u32) -> u64 {
        let initial = match failure_type {
            FailureType::RateLimit => self.policy.rate_limit_initial_delay_ms,
            _ => self.policy.initial_delay_ms,
        };
        let cap = match failure_type {
            FailureType::Timeout => self.policy.timeout_max_delay_ms,
            _ => self.policy.max_delay_ms,
        };
        compute_delay_ms(initial, self.policy.multiplier, cap, self.policy.jitter_fraction, attempt)
    }
}
