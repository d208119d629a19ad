use std::time::Duration;

use crate::QueryError;

pub(crate) const DEFAULT_MAX_RETRIES: u32 = 3;
pub(crate) const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Shared retry/backoff policy.
///
/// Applied identically to single-query fetches and to per-page fetches of
/// infinite queries. A failing attempt `n` (0-indexed) waits
/// `retry_delay * 2^n` before the next attempt, up to `max_retries` retries
/// after the initial attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Base delay for the exponential backoff.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        RetryPolicy {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Retry up to `max_retries` times.
    pub fn times(max_retries: u32) -> Self {
        RetryPolicy {
            max_retries,
            ..Default::default()
        }
    }

    /// Override the base delay.
    pub fn with_delay(self, retry_delay: Duration) -> Self {
        RetryPolicy {
            retry_delay,
            ..self
        }
    }

    /// Delay before retrying failed attempt `attempt` (0-indexed).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Whether failed attempt `attempt` should be retried.
    pub fn should_retry(&self, error: &QueryError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(1000));
        assert_eq!(policy.backoff(1), Duration::from_millis(2000));
        assert_eq!(policy.backoff(2), Duration::from_millis(4000));
    }

    #[test]
    fn backoff_respects_custom_delay() {
        let policy = RetryPolicy::times(3).with_delay(Duration::from_millis(50));
        assert_eq!(policy.backoff(0), Duration::from_millis(50));
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
    }

    #[test]
    fn retries_stop_at_max() {
        let policy = RetryPolicy::times(2);
        let error = QueryError::http(500, "ise");
        assert!(policy.should_retry(&error, 0));
        assert!(policy.should_retry(&error, 1));
        assert!(!policy.should_retry(&error, 2));
    }

    #[test]
    fn none_never_retries() {
        let policy = RetryPolicy::none();
        assert!(!policy.should_retry(&QueryError::http(500, "ise"), 0));
    }

    #[test]
    fn terminal_errors_short_circuit() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(&QueryError::http(404, "nope"), 0));
        assert!(!policy.should_retry(&QueryError::Aborted, 0));
    }
}
