// Retry-with-backoff shared by metadata resolution and media downloads.
//
// Exponential backoff with optional jitter and a max delay cap. The caller
// classifies every attempt, so policy and error semantics stay separate.

use rand::RngExt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Marker returned when a run is cancelled between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay between attempts. Actual delay = base * 2^attempt + jitter.
    pub base_delay: Duration,
    /// Hard cap on the computed delay.
    pub max_delay: Duration,
    /// When true, adds random jitter of [0, base_delay/2).
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the failed attempt `attempt` (0-indexed).
    ///
    /// Non-decreasing in `attempt`: the doubled base always outgrows the
    /// previous jitter, and jitter never pushes past `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // 2^attempt with a checked shift so huge attempts saturate.
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let exp_delay = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay);
        let capped = exp_delay.min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        let jitter_range_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        let remaining_ms =
            u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let jitter_limit_ms = jitter_range_ms.min(remaining_ms);
        if jitter_limit_ms == 0 {
            return capped;
        }

        let jitter_ms = rand::rng().random_range(0..jitter_limit_ms);
        (capped + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}

/// Result of a single attempt, used by the caller to signal retryability.
pub enum RetryAction<T, E> {
    /// Operation succeeded.
    Success(T),
    /// Transient failure (network, 5xx, timeout, short transfer).
    Retry(E),
    /// Permanent failure (4xx, local I/O, malformed data).
    Fail(E),
}

/// Execute an async operation with retry-and-backoff.
///
/// `operation` receives the 0-indexed attempt number. It is invoked at most
/// `policy.max_attempts` times; the last retryable error is returned once the
/// budget is spent.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = RetryAction<T, E>>,
    E: std::fmt::Display + From<Cancelled>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        if token.is_cancelled() {
            return Err(E::from(Cancelled));
        }

        let err = match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => return Err(err),
            RetryAction::Retry(err) => err,
        };

        attempt += 1;
        if attempt >= max_attempts {
            return Err(err);
        }

        let delay = policy.delay_for_attempt(attempt - 1);
        warn!(
            attempt,
            max = max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying after transient error"
        );
        tokio::select! {
            _ = token.cancelled() => return Err(E::from(Cancelled)),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
