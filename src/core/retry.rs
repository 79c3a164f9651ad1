//! Retry controller with pluggable backoff.
//!
//! Attempts run in an explicit bounded loop: each attempt calls the factory
//! again, so a fresh future is produced every time.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::core::SchedulerError;
use crate::util::clock::Clock;

/// Maps the number of the attempt that just failed (1-based) to the delay
/// before the next one.
pub trait Backoff: Send + Sync {
    /// Delay to wait after failed attempt number `attempt`.
    fn delay(&self, attempt: u32) -> Duration;
}

impl<F> Backoff for F
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    fn delay(&self, attempt: u32) -> Duration {
        self(attempt)
    }
}

/// Retry immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackoff;

impl Backoff for NoBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

/// Wait the same amount after every failure.
#[derive(Debug, Clone, Copy)]
pub struct ConstantBackoff(pub Duration);

impl Backoff for ConstantBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// `initial * multiplier^(attempt - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    /// Delay after the first failure.
    pub initial: Duration,
    /// Growth factor per further failure.
    pub multiplier: u32,
    /// Upper bound for any single delay.
    pub max: Duration,
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.checked_pow(exponent).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Bounded retry budget plus backoff strategy.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Arc<dyn Backoff>,
}

impl RetryPolicy {
    /// Policy allowing `max_attempts` invocations (1 means no retry) with no
    /// delay between attempts.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidArgument`] when `max_attempts` is zero.
    pub fn new(max_attempts: u32) -> Result<Self, SchedulerError> {
        if max_attempts == 0 {
            return Err(SchedulerError::InvalidArgument(
                "max_attempts must be at least 1".into(),
            ));
        }
        Ok(Self {
            max_attempts,
            backoff: Arc::new(NoBackoff),
        })
    }

    /// Replace the backoff strategy.
    #[must_use]
    pub fn with_backoff<B>(mut self, backoff: B) -> Self
    where
        B: Backoff + 'static,
    {
        self.backoff = Arc::new(backoff);
        self
    }

    pub(crate) fn with_shared_backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Maximum number of invocations.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay that follows failed attempt number `attempt`.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    /// Invoke `factory` until it succeeds or the budget is spent.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::RetriesExhausted`] wrapping the last failure once every
    /// attempt has failed. Errors that are never retryable
    /// (see [`SchedulerError::is_retryable`]) are returned as-is immediately.
    pub async fn run<C, F, Fut, T, E>(&self, clock: &C, mut factory: F) -> Result<T, SchedulerError>
    where
        C: Clock + ?Sized,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<SchedulerError>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match factory().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "retry succeeded");
                    }
                    return Ok(value);
                }
                Err(err) => err.into(),
            };

            if !err.is_retryable() {
                debug!(attempt, error = %err, "error is not retryable");
                return Err(err);
            }
            if attempt >= self.max_attempts {
                warn!(attempts = attempt, error = %err, "retries exhausted");
                return Err(SchedulerError::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = self.backoff.delay(attempt);
            debug!(attempt, ?delay, error = %err, "attempt failed, retrying");
            if !delay.is_zero() {
                clock.after(delay).await;
            }
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

/// Retry `factory` up to `max_attempts` times with no delay between attempts.
///
/// # Errors
///
/// See [`RetryPolicy::new`] and [`RetryPolicy::run`].
pub async fn with_retry<C, F, Fut, T, E>(
    clock: &C,
    max_attempts: u32,
    factory: F,
) -> Result<T, SchedulerError>
where
    C: Clock + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<SchedulerError>,
{
    RetryPolicy::new(max_attempts)?.run(clock, factory).await
}

/// Retry `factory` up to `max_attempts` times, waiting `backoff(attempt)`
/// through `clock` after each failure.
///
/// # Errors
///
/// See [`RetryPolicy::new`] and [`RetryPolicy::run`].
pub async fn with_retry_backoff<C, B, F, Fut, T, E>(
    clock: &C,
    max_attempts: u32,
    backoff: B,
    factory: F,
) -> Result<T, SchedulerError>
where
    C: Clock + ?Sized,
    B: Backoff + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<SchedulerError>,
{
    RetryPolicy::new(max_attempts)?
        .with_backoff(backoff)
        .run(clock, factory)
        .await
}
