//! Retry policy shared by the completion and upload paths.
//!
//! A [`RetryPolicy`] bundles an attempt budget with a [`Backoff`] curve. The
//! completion dispatcher drives it per record through [`RetryPolicy::run`];
//! the upload dispatcher uses [`RetryPolicy::delay_for_attempt`] for its
//! round-level backoff and `max_attempts` as the stalled-round bound.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::error::AppError;

/// Delay curve between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `initial`, `initial + step`, `initial + 2*step`, ...
    Linear { initial: Duration, step: Duration },
    /// `initial`, `initial * factor`, ... capped at `max`.
    Exponential {
        initial: Duration,
        factor: u32,
        max: Duration,
    },
}

impl Backoff {
    fn delay(&self, n: u32) -> Duration {
        match *self {
            Backoff::Linear { initial, step } => initial.saturating_add(step.saturating_mul(n)),
            Backoff::Exponential {
                initial,
                factor,
                max,
            } => {
                let multiplier = factor.checked_pow(n).unwrap_or(u32::MAX);
                initial.saturating_mul(multiplier).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Per-record completion retries: 6 attempts, waiting 1s, 3s, 5s, 7s, 9s.
    pub fn completion() -> Self {
        Self {
            max_attempts: 6,
            backoff: Backoff::Linear {
                initial: Duration::from_secs(1),
                step: Duration::from_secs(2),
            },
        }
    }

    /// Upload round backoff: 60s doubling up to 600s, 5 stalled rounds.
    pub fn upload() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::Exponential {
                initial: Duration::from_secs(60),
                factor: 2,
                max: Duration::from_secs(600),
            },
        }
    }

    /// A policy that retries without waiting. Handy in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Linear {
                initial: Duration::ZERO,
                step: Duration::ZERO,
            },
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay to wait after the `attempt`-th consecutive failure.
    ///
    /// - Attempt 0: no delay
    /// - Attempt 1: the initial delay
    /// - Attempt n: the n-th point of the backoff curve
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.backoff.delay(attempt - 1)
    }

    /// Runs `op` until it succeeds, the error is not retryable, or the
    /// attempt budget is spent. Returns the last error on exhaustion.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut, P>(&self, label: &str, mut op: F, retryable: P) -> Result<T, AppError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
        P: Fn(&AppError) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && retryable(&e) => {
                    let delay = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        operation = label,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(operation = label, attempt, error = %e, "Giving up");
                    return Err(e);
                }
            }
        }
    }
}
