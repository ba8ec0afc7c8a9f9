//! Deadlines and bounded retries around a single logical call.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout as tokio_timeout};

use crate::config::RetryPolicy;
use crate::{Error, Result};

/// Where a logical call is within its retry budget.
///
/// Handed to every attempt; it does not outlive the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryContext {
    /// Zero-based attempt number.
    pub attempt: u32,
    /// Additional attempts allowed after the first.
    pub max_retries: u32,
    /// Pause before the next attempt.
    pub delay: Duration,
}

impl RetryContext {
    /// Whether this is the first attempt of the call.
    pub fn is_first(&self) -> bool {
        self.attempt == 0
    }

    /// Whether another attempt is allowed after this one.
    pub fn has_remaining(&self) -> bool {
        self.attempt < self.max_retries
    }
}

/// Run a future with a timeout.
///
/// Returns [`Error::Timeout`] if the future doesn't complete within `duration`.
/// The future is dropped on expiry.
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio_timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(duration)),
    }
}

/// Run `attempt` under `policy`.
///
/// Each attempt races the policy's timeout. A failed attempt that the policy
/// considers retryable is followed by `retry_delay` and a fresh attempt, for
/// at most `max_retries + 1` attempts in total. The last error is returned
/// once the budget is spent.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use libbinja::{with_retry, RetryPolicy};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> libbinja::Result<()> {
/// let policy = RetryPolicy::new(2, Duration::from_secs(1), Duration::ZERO);
/// let value = with_retry(&policy, |ctx| async move {
///     if ctx.attempt < 2 {
///         Err(libbinja::Error::remote("busy", None))
///     } else {
///         Ok(ctx.attempt)
///     }
/// })
/// .await?;
/// assert_eq!(value, 2);
/// # Ok(())
/// # }
/// ```
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut attempt: F) -> Result<T>
where
    F: FnMut(RetryContext) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut ctx = RetryContext {
        attempt: 0,
        max_retries: policy.max_retries,
        delay: policy.retry_delay,
    };

    loop {
        let err = match with_timeout(policy.timeout, attempt(ctx)).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !ctx.has_remaining() || !policy.should_retry(&err) {
            if !ctx.is_first() {
                tracing::warn!(attempts = ctx.attempt + 1, "giving up: {}", err);
            }
            return Err(err);
        }

        tracing::debug!(
            attempt = ctx.attempt + 1,
            max_attempts = policy.max_attempts(),
            delay = ?ctx.delay,
            "attempt failed, retrying: {}",
            err
        );
        sleep(ctx.delay).await;
        ctx.attempt += 1;
    }
}
