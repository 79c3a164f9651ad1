//! Tests for builder modules

use std::sync::Arc;
use std::time::Duration;

use prometheus_task_gate::builders::{build_scheduler, SchedulerBuilder};
use prometheus_task_gate::config::{BackoffConfig, RetryConfig, SchedulerConfig};
use prometheus_task_gate::core::{RetryPolicy, SchedulerError, TaskPolicy};
use prometheus_task_gate::runtime::TokioSpawner;
use prometheus_task_gate::util::clock::ManualClock;

#[tokio::test]
async fn test_builder_defaults() {
    let scheduler = SchedulerBuilder::new(3).build().unwrap();
    assert_eq!(scheduler.concurrency_limit(), 3);
    assert!(!scheduler.is_closed());
    assert!(scheduler.default_policy().deadline().is_none());
    assert!(scheduler.default_policy().retry().is_none());
}

#[tokio::test]
async fn test_builder_rejects_zero_queue_depth() {
    let result = SchedulerBuilder::new(2).max_queue_depth(0).build();
    assert!(matches!(result, Err(SchedulerError::InvalidArgument(_))));
}

#[test]
fn test_build_outside_runtime_fails() {
    let result = SchedulerBuilder::new(2).build();
    assert!(matches!(result, Err(SchedulerError::Runtime(_))));
}

#[tokio::test]
async fn test_builder_carries_default_policy() {
    let policy = TaskPolicy::new()
        .with_deadline(Duration::from_secs(5))
        .with_retry(RetryPolicy::new(4).unwrap());
    let scheduler = SchedulerBuilder::new(1)
        .default_policy(policy)
        .clock(Arc::new(ManualClock::new()))
        .build()
        .unwrap();

    let defaults = scheduler.default_policy();
    assert_eq!(defaults.deadline(), Some(Duration::from_secs(5)));
    assert_eq!(defaults.retry().map(RetryPolicy::max_attempts), Some(4));
    assert_eq!(scheduler.clock().now(), 0);
}

#[tokio::test]
async fn test_build_scheduler_from_config() {
    let cfg = SchedulerConfig {
        concurrency_limit: 6,
        max_queue_depth: Some(32),
        retry: Some(RetryConfig {
            max_attempts: 2,
            backoff: BackoffConfig::Exponential {
                initial_ms: 50,
                multiplier: 2,
                max_ms: 400,
            },
        }),
        ..SchedulerConfig::default()
    };
    let scheduler = build_scheduler(
        &cfg,
        Arc::new(ManualClock::new()),
        TokioSpawner::try_current().unwrap(),
    )
    .unwrap();

    assert_eq!(scheduler.concurrency_limit(), 6);
    let retry = scheduler.default_policy().retry().unwrap();
    assert_eq!(retry.max_attempts(), 2);
    assert_eq!(retry.delay_after(2), Duration::from_millis(100));
}

#[tokio::test]
async fn test_build_scheduler_rejects_invalid_config() {
    let cfg = SchedulerConfig {
        concurrency_limit: 0,
        ..SchedulerConfig::default()
    };
    let result = build_scheduler(
        &cfg,
        Arc::new(ManualClock::new()),
        TokioSpawner::try_current().unwrap(),
    );
    assert!(matches!(result, Err(SchedulerError::InvalidArgument(_))));
}
