//! Bounded retry with exponential backoff.
//!
//! [`execute_with_retry`] drives a fallible async operation. Errors decide for
//! themselves whether another attempt is worthwhile through [`Retryable`], and
//! may carry a server-specified delay that replaces the computed backoff for
//! that one attempt.
//!
//! Dropping the returned future abandons the operation and any pending
//! backoff sleep, which is how callers make retries cancellable.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::emit;
use crate::metrics::events::FetchRetried;

/// Classification of failures for retry purposes.
pub trait Retryable {
    /// Whether another attempt may succeed.
    fn is_retryable(&self) -> bool;

    /// Delay requested by the remote side, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Computes the delay before the next attempt.
pub trait Backoff {
    /// Delay after the `attempt`-th failure (1-based).
    fn delay(&self, attempt: u32) -> Duration;
}

/// `multiplier * base^(attempt - 1)`, clamped to `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExponentialBackoff {
    /// Delay unit multiplied by the exponential factor.
    #[serde(default = "default_multiplier_ms")]
    pub multiplier_ms: u64,
    /// Exponential base.
    #[serde(default = "default_base")]
    pub base: u32,
    /// Floor applied to every delay.
    #[serde(default = "default_min_ms")]
    pub min_ms: u64,
    /// Ceiling applied to every delay.
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
}

fn default_multiplier_ms() -> u64 {
    1000
}

fn default_base() -> u32 {
    2
}

fn default_min_ms() -> u64 {
    2000
}

fn default_max_ms() -> u64 {
    30_000
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            multiplier_ms: default_multiplier_ms(),
            base: default_base(),
            min_ms: default_min_ms(),
            max_ms: default_max_ms(),
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = u64::from(self.base).saturating_pow(exponent);
        let raw = self.multiplier_ms.saturating_mul(factor);
        Duration::from_millis(raw.clamp(self.min_ms, self.max_ms))
    }
}

/// Run `operation` up to `max_attempts` times.
///
/// A non-retryable error is returned immediately. A retryable one is
/// followed by a sleep of `backoff.delay(attempt)`, or the error's own
/// `retry_after` when present. After the last attempt the last error is
/// returned. `max_attempts` below one is treated as one.
pub async fn execute_with_retry<F, Fut, T, E, B>(
    operation_name: &str,
    max_attempts: u32,
    backoff: &B,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
    B: Backoff + ?Sized,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retryable() {
            debug!(operation = operation_name, attempt, error = %err, "Non-retryable failure");
            return Err(err);
        }

        if attempt >= max_attempts {
            warn!(
                operation = operation_name,
                attempts = attempt,
                error = %err,
                "Retries exhausted"
            );
            return Err(err);
        }

        let delay = err.retry_after().unwrap_or_else(|| backoff.delay(attempt));
        warn!(
            operation = operation_name,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Attempt failed, retrying"
        );
        emit!(FetchRetried {
            operation: operation_name.to_string(),
        });
        tokio::time::sleep(delay).await;
    }
}
