//! Per-call retry and timeout policy.

use std::time::Duration;

use crate::Error;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default per-attempt deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How a logical call is bounded and repeated.
///
/// Each attempt gets its own `timeout`. A failed attempt is repeated after
/// `retry_delay` up to `max_retries` more times, so a call makes at most
/// `max_retries + 1` attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Deadline for one attempt.
    pub timeout: Duration,
    /// Fixed pause before each retry.
    pub retry_delay: Duration,
    /// Whether errors reported by the server are retried.
    pub retry_remote_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
            retry_remote_errors: true,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with explicit values; remote errors are retried.
    pub fn new(max_retries: u32, timeout: Duration, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            timeout,
            retry_delay,
            retry_remote_errors: true,
        }
    }

    /// The same deadline, but only one attempt.
    pub fn single_attempt(self) -> Self {
        Self {
            max_retries: 0,
            ..self
        }
    }

    /// Total attempts a call may make.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Decide whether `err` is worth another attempt under this policy.
    pub fn should_retry(&self, err: &Error) -> bool {
        if err.is_remote() {
            return self.retry_remote_errors;
        }
        err.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.timeout, Duration::from_secs(30));
        assert_eq!(policy.retry_delay, Duration::from_secs(1));
        assert_eq!(policy.max_attempts(), 4);
    }

    #[test]
    fn single_attempt_keeps_timeout() {
        let policy = RetryPolicy::new(5, Duration::from_millis(50), Duration::ZERO).single_attempt();
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.timeout, Duration::from_millis(50));
    }

    #[test]
    fn remote_errors_follow_policy() {
        let remote = Error::remote("busy", None);
        let mut policy = RetryPolicy::default();
        assert!(policy.should_retry(&remote));

        policy.retry_remote_errors = false;
        assert!(!policy.should_retry(&remote));
        assert!(policy.should_retry(&Error::Timeout(Duration::from_secs(1))));
    }

    #[test]
    fn terminal_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(&Error::ConnectionClosed));
        assert!(!policy.should_retry(&Error::NotStarted));
    }

    #[test]
    fn max_attempts_saturates() {
        let policy = RetryPolicy::new(u32::MAX, DEFAULT_TIMEOUT, DEFAULT_RETRY_DELAY);
        assert_eq!(policy.max_attempts(), u32::MAX);
    }
}
