//! Deadline wrapper racing a unit of work against a [`Clock`] timer.

use std::future::Future;
use std::time::Duration;

use crate::core::SchedulerError;
use crate::util::clock::Clock;

/// Run `task` with an upper bound of `duration`.
///
/// The task and a timer are started together and the first to settle decides
/// the outcome:
/// - the task settles first: its value or error is returned and the timer is
///   cancelled, so no timer fires afterwards;
/// - the timer fires first: [`SchedulerError::DeadlineExceeded`] is returned and
///   the task future is dropped, so its late result can never be observed.
///
/// When both are ready on the same poll the task wins.
///
/// # Errors
///
/// [`SchedulerError::InvalidArgument`] for a zero `duration` (the task is never
/// polled), [`SchedulerError::DeadlineExceeded`] when the timer wins, otherwise
/// the task's own error converted into [`SchedulerError`].
pub async fn with_deadline<C, Fut, T, E>(
    clock: &C,
    duration: Duration,
    task: Fut,
) -> Result<T, SchedulerError>
where
    C: Clock + ?Sized,
    Fut: Future<Output = Result<T, E>>,
    E: Into<SchedulerError>,
{
    if duration.is_zero() {
        return Err(SchedulerError::InvalidArgument(
            "deadline duration must be greater than zero".into(),
        ));
    }

    let mut timer = clock.after(duration);
    tokio::pin!(task);

    tokio::select! {
        biased;
        result = &mut task => {
            timer.cancel();
            result.map_err(Into::into)
        }
        () = &mut timer => {
            tracing::debug!(?duration, "deadline exceeded");
            Err(SchedulerError::DeadlineExceeded(duration))
        }
    }
}
