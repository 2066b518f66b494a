//! bounded retry with exponential backoff for control-plane operations.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::resource::ResourceError;

/// retry policy for a control-plane operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// total attempts, including the first.
    pub max_attempts: u32,
    /// backoff before the second attempt; doubles per attempt.
    pub initial_backoff: Duration,
    /// ceiling on the backoff between attempts.
    pub max_backoff: Duration,
    /// per-attempt timeout.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// same policy with a different number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// run `f` under the default control-plane policy.
pub async fn api<T, F, Fut>(op: &str, f: F) -> Result<T, ResourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ResourceError>>,
{
    with_retries(op, RetryPolicy::default(), f).await
}

/// run `f`, retrying transient failures with exponential backoff.
///
/// terminal and not-found errors return immediately; a timed-out attempt
/// counts as transient.
pub async fn with_retries<T, F, Fut>(
    op: &str,
    policy: RetryPolicy,
    mut f: F,
) -> Result<T, ResourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ResourceError>>,
{
    let mut backoff = policy.initial_backoff;

    for attempt in 1..=policy.max_attempts {
        let result = match tokio::time::timeout(policy.attempt_timeout, f()).await {
            Ok(result) => result,
            Err(_) => Err(ResourceError::Transient(format!(
                "{op}: attempt timed out after {:?}",
                policy.attempt_timeout
            ))),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) if attempt == policy.max_attempts => return Err(err),
            Err(err) => {
                warn!(op, attempt, error = %err, "transient control-plane failure, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_backoff);
            }
        }
    }

    unreachable!("retry loop always returns within max_attempts")
}
