//! Retry policy: requeue with backoff or surface to the caller.

use std::time::Duration;

use rand::Rng;

use crate::config::SourceSettings;
use crate::errors::FailureClass;

/// What to do with a failed attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryDecision {
    /// Put the request back in the queue after `delay`.
    Requeue { delay: Duration },
    /// The retry budget is spent.
    Exhausted,
    /// Not retryable at all.
    Reject,
}

/// Backoff parameters of one source.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    base_backoff: Duration,
    max_backoff: Duration,
    rate_limit_cooldown: Duration,
}

impl RetryPolicy {
    pub fn new(base_backoff: Duration, max_backoff: Duration, rate_limit_cooldown: Duration) -> Self {
        Self {
            base_backoff,
            max_backoff,
            rate_limit_cooldown,
        }
    }

    pub fn from_settings(settings: &SourceSettings) -> Self {
        Self::new(
            settings.base_backoff(),
            settings.max_backoff(),
            settings.rate_limit_cooldown(),
        )
    }

    /// Decide the fate of a request whose attempt number `retry_count`
    /// (0 for the first attempt) failed with `class`.
    pub fn decide(
        &self,
        class: FailureClass,
        retry_count: u32,
        max_retries: u32,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        if class == FailureClass::Fatal {
            return RetryDecision::Reject;
        }
        if retry_count >= max_retries {
            return RetryDecision::Exhausted;
        }

        let backoff = self.backoff(retry_count);
        let delay = match class {
            FailureClass::RateLimited => backoff
                .max(self.rate_limit_cooldown)
                .max(retry_after.unwrap_or(Duration::ZERO)),
            _ => backoff,
        };

        RetryDecision::Requeue { delay }
    }

    /// `min(base * 2^retry_count + jitter, max)`, jitter uniform in `[0, base)`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let base_ms = self.base_backoff.as_millis() as u64;
        let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
        let jitter_ms = if base_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..base_ms)
        };

        let delay_ms = base_ms.saturating_mul(factor).saturating_add(jitter_ms);
        Duration::from_millis(delay_ms).min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(100),
            Duration::from_secs(5),
            Duration::from_secs(30),
        )
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let policy = policy();
        for _ in 0..20 {
            let first = policy.backoff(0);
            assert!(first >= Duration::from_millis(100) && first < Duration::from_millis(200));

            let third = policy.backoff(2);
            assert!(third >= Duration::from_millis(400) && third < Duration::from_millis(500));
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = policy();
        assert_eq!(policy.backoff(10), Duration::from_secs(5));
        assert_eq!(policy.backoff(200), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_has_jitter() {
        let policy = RetryPolicy::new(
            Duration::from_millis(1_000),
            Duration::from_secs(60),
            Duration::from_secs(30),
        );
        let samples: Vec<Duration> = (0..50).map(|_| policy.backoff(1)).collect();
        assert!(samples.iter().any(|s| *s != samples[0]));
    }

    #[test]
    fn test_zero_base_backoff() {
        let policy = RetryPolicy::new(Duration::ZERO, Duration::ZERO, Duration::ZERO);
        assert_eq!(policy.backoff(3), Duration::ZERO);
    }

    #[test]
    fn test_transient_requeues_until_exhausted() {
        let policy = policy();

        for retry_count in 0..3 {
            assert!(matches!(
                policy.decide(FailureClass::Transient, retry_count, 3, None),
                RetryDecision::Requeue { .. }
            ));
        }
        assert_eq!(
            policy.decide(FailureClass::Transient, 3, 3, None),
            RetryDecision::Exhausted
        );
    }

    #[test]
    fn test_rate_limited_forces_cooldown() {
        let policy = policy();

        match policy.decide(FailureClass::RateLimited, 0, 3, None) {
            RetryDecision::Requeue { delay } => assert_eq!(delay, Duration::from_secs(30)),
            other => panic!("expected requeue, got {:?}", other),
        }

        match policy.decide(FailureClass::RateLimited, 0, 3, Some(Duration::from_secs(90))) {
            RetryDecision::Requeue { delay } => assert_eq!(delay, Duration::from_secs(90)),
            other => panic!("expected requeue, got {:?}", other),
        }
    }

    #[test]
    fn test_fatal_is_rejected_immediately() {
        assert_eq!(
            policy().decide(FailureClass::Fatal, 0, 3, None),
            RetryDecision::Reject
        );
    }
}
