//! Tests for error types

use std::time::Duration;

use prometheus_task_gate::core::SchedulerError;

#[test]
fn test_queue_full_error() {
    let err = SchedulerError::QueueFull("max queue depth 8 reached".to_string());
    assert_eq!(format!("{err}"), "queue full: max queue depth 8 reached");
}

#[test]
fn test_deadline_exceeded_error() {
    let err = SchedulerError::DeadlineExceeded(Duration::from_millis(50));
    assert_eq!(format!("{err}"), "deadline exceeded after 50ms");
}

#[test]
fn test_cancelled_and_closed_errors() {
    assert_eq!(SchedulerError::Cancelled.to_string(), "task cancelled");
    assert_eq!(SchedulerError::Closed.to_string(), "scheduler closed");
}

#[test]
fn test_anyhow_converts_to_task_failed() {
    let err: SchedulerError = anyhow::anyhow!("connection reset").into();
    assert!(matches!(err, SchedulerError::TaskFailed(_)));
    assert_eq!(err.to_string(), "task failed: connection reset");
}

#[test]
fn test_io_error_via_task_helper() {
    let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "socket timed out");
    let err = SchedulerError::task(io);
    assert!(err.is_retryable());
    assert_eq!(err.to_string(), "task failed: socket timed out");
}

#[test]
fn test_exhaustion_message_includes_cause() {
    let err = SchedulerError::RetriesExhausted {
        attempts: 3,
        source: Box::new(SchedulerError::DeadlineExceeded(Duration::from_millis(10))),
    };
    assert_eq!(
        err.to_string(),
        "retries exhausted after 3 attempts: deadline exceeded after 10ms"
    );
    assert!(std::error::Error::source(&err).is_some());
}
