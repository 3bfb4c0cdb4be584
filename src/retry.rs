//! Bounded retry with configurable backoff
//!
//! Both roles funnel transient network failures through the same policy: a
//! fixed number of retries and a backoff schedule between attempts. The
//! terminal failure is returned exactly once, never retried past the bound.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

/// Delay schedule between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Retry immediately
    Immediate,
    /// Constant delay between attempts
    Fixed(Duration),
    /// Doubling delay from `base`, capped at `max`, with optional jitter
    Exponential {
        base: Duration,
        max: Duration,
        jitter: bool,
    },
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based)
    fn delay(self, attempt: u32) -> Duration {
        match self {
            Backoff::Immediate => Duration::ZERO,
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max, jitter } => {
                let uncapped = base.saturating_mul(2u32.saturating_pow(attempt));
                let capped = uncapped.min(max);
                if jitter {
                    // 50-100% of the capped delay
                    let millis = capped.as_millis() as u64;
                    Duration::from_millis(rand::rng().random_range(millis / 2..=millis.max(1)))
                } else {
                    capped
                }
            }
        }
    }
}

/// A retry bound plus its backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed beyond the first attempt
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Immediate,
        }
    }

    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn exponential(max_retries: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Exponential { base, max, jitter: true },
        }
    }
}

/// Terminal failure after the retry bound was exceeded
#[derive(Debug, Error)]
#[error("{op} failed after {attempts} attempts: {source}")]
pub struct RetryExhausted<E: std::error::Error> {
    pub op: &'static str,
    pub attempts: u32,
    #[source]
    pub source: E,
}

/// Run `f` until it succeeds or the policy's bound is exhausted
///
/// The operation runs at most `max_retries + 1` times; each failure after
/// the first sleeps per the backoff schedule before the next attempt.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, op: &'static str, mut f: F) -> Result<T, RetryExhausted<E>>
where
    E: std::error::Error,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_error = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = policy.backoff.delay(attempt - 1);
            warn!(%op, attempt, delay_ms = delay.as_millis() as u64, "retrying after failure");
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        match f().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                debug!(%op, attempt, error = %e, "attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(RetryExhausted {
        op,
        attempts: policy.max_retries + 1,
        source: last_error.expect("at least one attempt ran"),
    })
}
