use std::time::Duration;

use reqwest::StatusCode;

/// Bounded retry for transient accounting API failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget with no waiting between attempts.
    #[must_use]
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
        }
    }

    /// Wait before retry number `attempt + 1`: `base_delay * 2^attempt`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    #[must_use]
    pub fn is_retryable(status: StatusCode) -> bool {
        matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(RetryPolicy::immediate(3).backoff(2), Duration::ZERO);
    }

    #[test]
    fn only_throttling_and_gateway_failures_retry() {
        assert!(RetryPolicy::is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(RetryPolicy::is_retryable(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!RetryPolicy::is_retryable(StatusCode::NOT_IMPLEMENTED));
        assert!(!RetryPolicy::is_retryable(StatusCode::BAD_REQUEST));
        assert!(!RetryPolicy::is_retryable(StatusCode::UNAUTHORIZED));
    }
}
