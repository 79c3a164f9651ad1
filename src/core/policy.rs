//! Per-task execution policy composing the deadline and retry wrappers.

use std::future::Future;
use std::time::Duration;

use crate::core::deadline::with_deadline;
use crate::core::retry::RetryPolicy;
use crate::core::SchedulerError;
use crate::util::clock::Clock;

/// Optional deadline per attempt plus optional retry budget.
///
/// The deadline bounds each individual attempt; the retry policy decides
/// whether a failed (or timed-out) attempt is tried again.
#[derive(Debug, Clone, Default)]
pub struct TaskPolicy {
    deadline: Option<Duration>,
    retry: Option<RetryPolicy>,
}

impl TaskPolicy {
    /// Policy with neither deadline nor retry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every attempt by `deadline`.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Retry failed attempts according to `retry`.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Per-attempt deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Retry policy, if any.
    #[must_use]
    pub const fn retry(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    /// Run `factory` under this policy.
    ///
    /// # Errors
    ///
    /// Whatever the composed wrappers produce: the task's own error when no
    /// wrapper applies, [`SchedulerError::DeadlineExceeded`] for a timed-out
    /// attempt without retry, [`SchedulerError::RetriesExhausted`] once the
    /// retry budget is spent.
    pub async fn run<C, F, Fut, T, E>(&self, clock: &C, mut factory: F) -> Result<T, SchedulerError>
    where
        C: Clock + ?Sized,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<SchedulerError>,
    {
        let deadline = self.deadline;
        let attempt = || {
            let fut = factory();
            async move {
                match deadline {
                    Some(limit) => with_deadline(clock, limit, fut).await,
                    None => fut.await.map_err(Into::into),
                }
            }
        };

        match &self.retry {
            Some(retry) => retry.run(clock, attempt).await,
            None => {
                let mut attempt = attempt;
                attempt().await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::util::clock::SystemClock;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_applies_per_attempt() {
        let clock = SystemClock::new();
        let calls = AtomicU32::new(0);
        let policy = TaskPolicy::new()
            .with_deadline(Duration::from_millis(50))
            .with_retry(RetryPolicy::new(3).unwrap());

        let value = policy
            .run(&clock, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    // First attempt hangs past the deadline, second is quick.
                    if n == 0 {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                    Ok::<_, SchedulerError>(n)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_without_retry() {
        let clock = SystemClock::new();
        let policy = TaskPolicy::new().with_deadline(Duration::from_millis(10));
        let result = policy
            .run(&clock, || async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, SchedulerError>(())
            })
            .await;
        assert!(matches!(result, Err(SchedulerError::DeadlineExceeded(_))));
    }

    #[tokio::test]
    async fn test_empty_policy_passes_through() {
        let clock = SystemClock::new();
        let result = TaskPolicy::new()
            .run(&clock, || async { Ok::<_, SchedulerError>("plain") })
            .await;
        assert_eq!(result.unwrap(), "plain");
    }
}
