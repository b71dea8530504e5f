//! # retry
//!
//! One [`RetryPolicy`] shared by the Agent Client and the HTTP Exchange
//! Gateway reads: a bounded number of extra attempts with a short fixed
//! backoff, applied only to failures the caller classifies as transient.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Upper bound on extra attempts, whatever the configuration says.
pub const MAX_RETRIES: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one, clamped to [`MAX_RETRIES`].
    pub max_retries: u32,
    pub backoff:     Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self { max_retries: max_retries.min(MAX_RETRIES), backoff }
    }

    pub fn none() -> Self {
        Self { max_retries: 0, backoff: Duration::ZERO }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(1, Duration::from_millis(250))
    }
}

/// Run `op`, retrying while `is_transient(&err)` holds and attempts remain.
pub async fn with_retry<T, E, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut op: F,
    is_transient: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_retries && is_transient(&err) => {
                attempt += 1;
                debug!(label, attempt, error = %err, "🔁 transient failure, retrying");
                tokio::time::sleep(policy.backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}
