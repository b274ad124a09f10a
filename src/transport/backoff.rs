// src/transport/backoff.rs
//! Retry policy: backoff schedule and retry eligibility

use std::time::Duration;

/// HTTP statuses worth retrying
pub const RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Attempts that may end in a retryable HTTP status, whatever `retry_count` says
pub const MAX_HTTP_STATUS_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt for connection failures
    pub retry_count: u32,

    /// Base backoff interval
    pub base_interval: Duration,

    /// Ceiling for one wait
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_count: 100,
            base_interval: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Wait before attempt `attempt` (1-based): zero for the first attempt,
    /// `base × 2^(attempt-1)` afterwards, capped at `max_backoff`
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        2u32.checked_pow(attempt - 1)
            .and_then(|factor| self.base_interval.checked_mul(factor))
            .map(|wait| wait.min(self.max_backoff))
            .unwrap_or(self.max_backoff)
    }

    /// Total attempts allowed for connection failures
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }
}

pub fn is_retryable_status(code: u16) -> bool {
    RETRYABLE_STATUS_CODES.contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy {
            base_interval: Duration::from_millis(100),
            ..Default::default()
        };

        assert_eq!(policy.backoff(1), Duration::ZERO);
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_is_capped_and_never_decreases() {
        let policy = RetryPolicy {
            base_interval: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            ..Default::default()
        };

        let mut previous = Duration::ZERO;
        for attempt in 1..=200 {
            let wait = policy.backoff(attempt);
            assert!(wait >= previous, "attempt {} waited less than before", attempt);
            assert!(wait <= Duration::from_secs(30));
            previous = wait;
        }
        assert_eq!(policy.backoff(200), Duration::from_secs(30));
    }

    #[test]
    fn test_retryable_statuses() {
        for code in [408, 429, 500, 502, 503, 504] {
            assert!(is_retryable_status(code));
        }
        for code in [400, 401, 403, 404, 413, 501, 505] {
            assert!(!is_retryable_status(code));
        }
    }
}
