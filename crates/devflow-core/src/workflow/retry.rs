//! Retry attempt counting and backoff delays.
//!
//! Stateless: every function takes the policy it applies as a parameter.

use std::time::Duration;

use devflow_types::workflow::{BackoffType, ErrorStrategy, RetryPolicy, WorkflowSettings, WorkflowStep};
use rand::Rng;

/// Largest extra delay `with_jitter` adds, as a fraction of the base delay.
pub const JITTER_FRACTION: f64 = 0.1;

pub struct RetryHandler;

impl RetryHandler {
    /// The policy in force for `step`.
    ///
    /// An explicit `retry_policy` wins. Without one, strategy `retry` gets
    /// `settings.max_retries + 1` attempts with default backoff, and every
    /// other strategy gets a single attempt.
    pub fn effective_policy(step: &WorkflowStep, settings: &WorkflowSettings) -> RetryPolicy {
        if let Some(policy) = &step.retry_policy {
            return policy.clone();
        }
        let max_attempts = match step.error_strategy() {
            ErrorStrategy::Retry => settings.max_retries.saturating_add(1),
            _ => 1,
        };
        RetryPolicy {
            max_attempts,
            ..RetryPolicy::default()
        }
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based).
    pub fn should_retry(policy: &RetryPolicy, attempt: u32) -> bool {
        attempt < policy.max_attempts
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    ///
    /// - fixed: `initial`
    /// - linear: `initial * attempt`
    /// - exponential: `initial * 2^(attempt - 1)`
    ///
    /// Saturating arithmetic, clamped to `max_delay_ms`.
    pub fn delay_for_attempt(policy: &RetryPolicy, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let initial = policy.initial_delay_ms;
        let ms = match policy.backoff {
            BackoffType::Fixed => initial,
            BackoffType::Linear => initial.saturating_mul(u64::from(attempt)),
            BackoffType::Exponential => {
                let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
                initial.saturating_mul(factor)
            }
        };
        Duration::from_millis(ms.min(policy.max_delay_ms))
    }

    /// `delay` plus a uniform random 0..=10 %.
    pub fn with_jitter(delay: Duration) -> Duration {
        let fraction = rand::thread_rng().gen_range(0.0..=JITTER_FRACTION);
        delay + delay.mul_f64(fraction)
    }

    /// Delay for `attempt`, jittered when the policy asks for it.
    pub fn backoff(policy: &RetryPolicy, attempt: u32) -> Duration {
        let delay = Self::delay_for_attempt(policy, attempt);
        if policy.jitter {
            Self::with_jitter(delay)
        } else {
            delay
        }
    }
}
