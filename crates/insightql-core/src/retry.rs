//! Per-node retry policies with exponential backoff and jitter.
//!
//! Mirrors the `RetryPolicy`/`with_retry` surface used throughout the engine's
//! own provider-style integrations: a node (or an engine dispatch) picks a
//! policy once, and `with_retry` drives the attempt loop uniformly.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// How a failed operation should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RetryPolicy {
    /// Never retry; the first failure is final.
    #[default]
    None,
    /// Retry up to `max_attempts` times (including the first), waiting a fixed
    /// `delay` between attempts.
    Fixed {
        /// Total attempts, including the first.
        max_attempts: u32,
        /// Delay between attempts.
        delay: Duration,
    },
    /// Retry up to `max_attempts` times with exponentially increasing delay,
    /// capped at `max_delay`, with up to 50% random jitter added to avoid
    /// thundering-herd retries across concurrent runs.
    Exponential {
        /// Total attempts, including the first.
        max_attempts: u32,
        /// Delay before the second attempt; doubles each subsequent attempt.
        base_delay: Duration,
        /// Upper bound on the computed delay, before jitter.
        max_delay: Duration,
        /// Whether to add random jitter to each computed delay.
        jitter: bool,
    },
}

impl RetryPolicy {
    /// A fixed-delay policy: `max_attempts` total tries, `delay_ms` milliseconds
    /// between each.
    #[must_use]
    pub fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self::Fixed {
            max_attempts: max_attempts.max(1),
            delay: Duration::from_millis(delay_ms),
        }
    }

    /// An exponential-backoff policy with jitter enabled, base delay 200ms and a
    /// 10s cap — the engine's default for transient I/O failures.
    #[must_use]
    pub fn exponential(max_attempts: u32) -> Self {
        Self::Exponential {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }

    /// Total attempts this policy allows, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } | Self::Exponential { max_attempts, .. } => {
                *max_attempts
            }
        }
    }

    /// Delay to wait before the given (1-indexed) retry attempt.
    pub(crate) fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed { delay, .. } => *delay,
            Self::Exponential {
                base_delay,
                max_delay,
                jitter,
                ..
            } => {
                let exp = attempt.saturating_sub(1).min(20);
                let scaled = base_delay.saturating_mul(1u32 << exp);
                let capped = scaled.min(*max_delay);
                if *jitter {
                    let jitter_factor = rand::thread_rng().gen_range(0.5..=1.0);
                    Duration::from_secs_f64(capped.as_secs_f64() * jitter_factor)
                } else {
                    capped
                }
            }
        }
    }
}

/// Classifies whether a particular error is worth retrying at all. Node-level
/// callers pass this so that, e.g., `execute_query`'s retry loop only spins on
/// transient engine errors and never on a syntax error that a retry cannot fix.
pub trait Retryable {
    /// Returns `true` if retrying this error could plausibly succeed.
    fn is_retryable(&self) -> bool;
}

/// Drive `operation` under `policy`, retrying while [`Retryable::is_retryable`]
/// returns `true` and the attempt budget remains.
///
/// Returns the last error once the budget is exhausted or the error is
/// classified as non-retryable.
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_attempts() || !err.is_retryable() {
                    return Err(err);
                }
                let delay = policy.delay_for_attempt(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
