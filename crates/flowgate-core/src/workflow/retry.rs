//! Retry controller: bounded retries with capped, jittered exponential backoff.
//!
//! Stateless apart from its policy. The step runner asks `should_retry` after
//! each failed attempt and sleeps for `backoff_delay` before the next one.

use std::time::Duration;

use flowgate_types::workflow::{RetryPolicy, StepType};
use rand::Rng;

use super::handler::StepError;

/// Decides whether and when a failed step attempt is retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Whether another attempt is allowed.
    ///
    /// `retries_done` counts retries already performed (0 after the first
    /// failed attempt). Only AGENT, API_CALL and TRANSFORM steps are retried,
    /// and only for retryable errors.
    pub fn should_retry(
        step_type: StepType,
        error: &StepError,
        retries_done: u32,
        max_retries: u32,
    ) -> bool {
        step_type.is_retryable() && error.is_retryable() && retries_done < max_retries
    }

    /// Delay before retry number `retry` (1-based), without jitter:
    /// `min(base * 2^retry, max)`.
    pub fn capped_delay_ms(&self, retry: u32) -> u64 {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        self.policy
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.policy.max_delay_ms)
    }

    /// Delay before retry number `retry` (1-based), spread by `±jitter`.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let capped = self.capped_delay_ms(retry) as f64;
        let jitter = self.policy.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter))
        } else {
            1.0
        };
        Duration::from_millis((capped * factor).round() as u64)
    }
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(base: u64, max: u64) -> RetryController {
        RetryController::new(RetryPolicy {
            base_delay_ms: base,
            max_delay_ms: max,
            jitter: 0.0,
        })
    }

    #[test]
    fn exponential_growth_from_first_retry() {
        let c = no_jitter(1_000, 60_000);
        assert_eq!(c.capped_delay_ms(1), 2_000);
        assert_eq!(c.capped_delay_ms(2), 4_000);
        assert_eq!(c.capped_delay_ms(3), 8_000);
    }

    #[test]
    fn delay_is_capped() {
        let c = no_jitter(1_000, 60_000);
        assert_eq!(c.capped_delay_ms(6), 60_000);
        assert_eq!(c.capped_delay_ms(40), 60_000);
        assert_eq!(c.capped_delay_ms(200), 60_000);
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let c = no_jitter(10, 1_000);
        assert_eq!(c.backoff_delay(2), Duration::from_millis(40));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let c = RetryController::new(RetryPolicy {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter: 0.1,
        });
        for _ in 0..100 {
            let d = c.backoff_delay(1).as_millis();
            assert!((1_800..=2_200).contains(&d), "delay {d} outside ±10%");
        }
    }

    #[test]
    fn should_retry_respects_budget() {
        let err = StepError::Execution("boom".into());
        assert!(RetryController::should_retry(StepType::Agent, &err, 0, 2));
        assert!(RetryController::should_retry(StepType::Agent, &err, 1, 2));
        assert!(!RetryController::should_retry(StepType::Agent, &err, 2, 2));
        assert!(!RetryController::should_retry(StepType::ApiCall, &err, 0, 0));
    }

    #[test]
    fn should_retry_skips_non_retryable_types_and_errors() {
        let transient = StepError::Execution("boom".into());
        let fatal = StepError::Transform("missing field".into());
        assert!(!RetryController::should_retry(StepType::Condition, &transient, 0, 3));
        assert!(!RetryController::should_retry(StepType::Approval, &transient, 0, 3));
        assert!(!RetryController::should_retry(StepType::Transform, &fatal, 0, 3));
        assert!(RetryController::should_retry(StepType::Transform, &transient, 0, 3));
    }
}
