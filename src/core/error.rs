//! Error types for scheduler operations.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by scheduler components and delivered through task handles.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Malformed configuration or call arguments. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The deadline timer fired before the task settled.
    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),
    /// Every permitted attempt failed; carries the final cause.
    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Error returned by the last attempt.
        source: Box<SchedulerError>,
    },
    /// The task's own error, propagated unchanged.
    #[error("task failed: {0}")]
    TaskFailed(#[from] anyhow::Error),
    /// The task was cancelled before it settled.
    #[error("task cancelled")]
    Cancelled,
    /// An admission gate refused the task.
    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),
    /// The bounded queue cannot accept more tasks.
    #[error("queue full: {0}")]
    QueueFull(String),
    /// The scheduler has been shut down.
    #[error("scheduler closed")]
    Closed,
    /// The task panicked or was dropped before producing an outcome.
    #[error("task aborted before settling")]
    Aborted,
    /// No async runtime was available to execute tasks.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl SchedulerError {
    /// Wrap an arbitrary task error as [`SchedulerError::TaskFailed`].
    pub fn task<E>(err: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Self::TaskFailed(err.into())
    }

    /// Whether a retry loop may try again after this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidArgument(_) | Self::Cancelled | Self::Closed
        )
    }

    /// Innermost error, looking through [`SchedulerError::RetriesExhausted`] wrappers.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        let mut current = self;
        while let Self::RetriesExhausted { source, .. } = current {
            current = source;
        }
        current
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SchedulerError::DeadlineExceeded(Duration::from_millis(5)).is_retryable());
        assert!(SchedulerError::task(anyhow::anyhow!("boom")).is_retryable());
        assert!(!SchedulerError::InvalidArgument("x".into()).is_retryable());
        assert!(!SchedulerError::Cancelled.is_retryable());
        assert!(!SchedulerError::Closed.is_retryable());
    }

    #[test]
    fn test_root_cause_unwraps_nested_exhaustion() {
        let inner = SchedulerError::RetriesExhausted {
            attempts: 2,
            source: Box::new(SchedulerError::DeadlineExceeded(Duration::from_millis(50))),
        };
        let outer = SchedulerError::RetriesExhausted {
            attempts: 3,
            source: Box::new(inner),
        };
        assert!(matches!(
            outer.root_cause(),
            SchedulerError::DeadlineExceeded(_)
        ));
    }
}
