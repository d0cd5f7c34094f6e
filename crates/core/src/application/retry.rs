// Retry policy for failed job executions
use crate::config::{RetryConfig, RetryRule};
use crate::domain::{ExecutionFailure, Job};
use tracing::{info, warn};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the job (with backoff delay in ms)
    Retry(i64),
    /// Do not retry, job has failed permanently
    Exhausted,
}

/// Error-class-aware retry policy
///
/// The rule for a failure is looked up by its `error_class`, falling back to
/// the default rule. `job.attempts` counts executions so far, so the first
/// failure sees `attempts == 1`.
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn rule_for(&self, error_class: &str) -> &RetryRule {
        self.config
            .rules
            .get(error_class)
            .unwrap_or(&self.config.default)
    }

    /// Backoff formula:
    /// delay = min(base_delay * (backoff_factor ^ (attempts - 1)) * (1.0 ± jitter), max_delay)
    pub fn should_retry(&self, job: &Job, failure: &ExecutionFailure) -> RetryDecision {
        let rule = self.rule_for(&failure.error_class);

        if job.attempts >= rule.max_attempts {
            warn!(
                job_id = %job.id,
                error_class = %failure.error_class,
                attempts = %job.attempts,
                max_attempts = %rule.max_attempts,
                "Max retry attempts reached"
            );
            return RetryDecision::Exhausted;
        }

        let exponent = (job.attempts - 1).max(0);
        let base_delay_ms = rule.base_delay_ms as f64 * rule.backoff_factor.powi(exponent);

        // Deterministic per (job, attempt) so concurrent failures spread out
        // without making the schedule untestable
        let seed = (job.id as u64)
            .wrapping_mul(2_654_435_761)
            .wrapping_add(job.attempts as u64);
        let spread = (seed % 201) as f64 / 100.0 - 1.0; // -1.0 to 1.0
        let jitter_factor = 1.0 + rule.jitter * spread;

        let raw = base_delay_ms * jitter_factor;
        let cap = rule.max_delay_ms.max(0);
        let delay_ms = if raw.is_finite() {
            (raw.max(0.0) as i64).min(cap)
        } else {
            cap
        };

        info!(
            job_id = %job.id,
            error_class = %failure.error_class,
            attempt = %job.attempts,
            max_attempts = %rule.max_attempts,
            delay_ms = %delay_ms,
            "Scheduling retry"
        );

        RetryDecision::Retry(delay_ms)
    }
}
