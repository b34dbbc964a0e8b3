//! Retry and backoff policy.
//!
//! Given a classified failure and the attempt count, decides between a
//! delayed retry and the dead-letter queue. The category alone determines
//! the ceiling; the provider's retry-after hint overrides the computed
//! delay for rate limits.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::dispatch::ErrorCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    DeadLetter,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_transient_retries: u32,
    max_rate_limit_retries: u32,
    max_unknown_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_transient_retries: config.max_transient_retries,
            max_rate_limit_retries: config.max_rate_limit_retries,
            max_unknown_retries: config.max_unknown_retries,
        }
    }

    /// Retry ceiling per category. Auth and permanent failures are never
    /// retried.
    pub fn max_retries(&self, category: ErrorCategory) -> u32 {
        match category {
            ErrorCategory::AuthFailure | ErrorCategory::Permanent => 0,
            ErrorCategory::Transient => self.max_transient_retries,
            ErrorCategory::RateLimit => self.max_rate_limit_retries,
            ErrorCategory::Unknown => self.max_unknown_retries,
        }
    }

    /// Decide the fate of a job whose `attempt_count`-th dispatch attempt
    /// just failed with `category`.
    pub fn decide(
        &self,
        category: ErrorCategory,
        attempt_count: u32,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        let retries_used = attempt_count.saturating_sub(1);
        if retries_used >= self.max_retries(category) {
            return RetryDecision::DeadLetter;
        }

        let delay = match (category, retry_after) {
            (ErrorCategory::RateLimit, Some(hint)) => hint,
            _ => self.backoff_delay(attempt_count),
        };

        RetryDecision::Retry { delay }
    }

    /// Backoff for contexts that need a delay even when the decision was
    /// terminal (e.g. the cool-down window after a final rate limit).
    pub(crate) fn fallback_delay(&self, attempt_count: u32) -> Duration {
        self.backoff_delay(attempt_count)
    }

    /// `min(base * 2^attempt_count, cap)`.
    fn backoff_delay(&self, attempt_count: u32) -> Duration {
        let shift = attempt_count.min(16);
        let factor = 1u64 << shift;
        self.base_delay
            .saturating_mul(factor as u32)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    #[test]
    fn transient_delays_double_and_cap() {
        let policy = policy();
        assert_eq!(
            policy.decide(ErrorCategory::Transient, 1, None),
            RetryDecision::Retry {
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(
            policy.decide(ErrorCategory::Transient, 2, None),
            RetryDecision::Retry {
                delay: Duration::from_secs(4)
            }
        );
        assert_eq!(
            policy.decide(ErrorCategory::Transient, 3, None),
            RetryDecision::Retry {
                delay: Duration::from_secs(8)
            }
        );
    }

    #[test]
    fn transient_ceiling_is_three_retries() {
        let policy = policy();
        // The 4th classification exhausts the 3-retry budget.
        assert_eq!(
            policy.decide(ErrorCategory::Transient, 4, None),
            RetryDecision::DeadLetter
        );
    }

    #[test]
    fn unknown_ceiling_is_stricter() {
        let policy = policy();
        assert!(matches!(
            policy.decide(ErrorCategory::Unknown, 2, None),
            RetryDecision::Retry { .. }
        ));
        assert_eq!(
            policy.decide(ErrorCategory::Unknown, 3, None),
            RetryDecision::DeadLetter
        );
    }

    #[test]
    fn auth_and_permanent_never_retry() {
        let policy = policy();
        assert_eq!(
            policy.decide(ErrorCategory::AuthFailure, 1, None),
            RetryDecision::DeadLetter
        );
        assert_eq!(
            policy.decide(ErrorCategory::Permanent, 1, None),
            RetryDecision::DeadLetter
        );
    }

    #[test]
    fn rate_limit_hint_overrides_backoff() {
        let policy = policy();
        assert_eq!(
            policy.decide(
                ErrorCategory::RateLimit,
                1,
                Some(Duration::from_secs(5))
            ),
            RetryDecision::Retry {
                delay: Duration::from_secs(5)
            }
        );
        // Without a hint the exponential schedule applies.
        assert_eq!(
            policy.decide(ErrorCategory::RateLimit, 1, None),
            RetryDecision::Retry {
                delay: Duration::from_secs(2)
            }
        );
    }

    #[test]
    fn hint_is_ignored_for_other_categories() {
        let policy = policy();
        assert_eq!(
            policy.decide(
                ErrorCategory::Transient,
                1,
                Some(Duration::from_secs(60))
            ),
            RetryDecision::Retry {
                delay: Duration::from_secs(2)
            }
        );
    }

    #[test]
    fn delay_caps_at_configured_max() {
        let policy = RetryPolicy::from_config(&crate::config::RetryConfig {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_transient_retries: 10,
            max_rate_limit_retries: 3,
            max_unknown_retries: 2,
        });
        assert_eq!(
            policy.decide(ErrorCategory::Transient, 8, None),
            RetryDecision::Retry {
                delay: Duration::from_secs(30)
            }
        );
    }
}
