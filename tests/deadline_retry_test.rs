//! Integration tests for the deadline and retry wrappers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use prometheus_task_gate::core::{
    with_deadline, with_retry, with_retry_backoff, ConstantBackoff, ExponentialBackoff,
    RetryPolicy, SchedulerError, TaskPolicy,
};
use prometheus_task_gate::util::clock::{Clock, ManualClock, SystemClock};

#[tokio::test(start_paused = true)]
async fn test_deadline_returns_value_when_task_is_faster() {
    let clock = SystemClock::new();
    let value = with_deadline(&clock, Duration::from_millis(150), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok::<_, SchedulerError>(25)
    })
    .await
    .unwrap();
    assert_eq!(value, 25);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_expires_before_slow_task() {
    let clock = SystemClock::new();
    let started = tokio::time::Instant::now();
    let result = with_deadline(&clock, Duration::from_millis(50), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok::<_, SchedulerError>(25)
    })
    .await;

    assert!(matches!(result, Err(SchedulerError::DeadlineExceeded(_))));
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test]
async fn test_retry_recovers_after_two_failures() {
    let clock = ManualClock::new();
    let calls = AtomicU32::new(0);
    let value = with_retry(&clock, 3, || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < 2 {
                Err(anyhow::anyhow!("flaky upstream"))
            } else {
                Ok(n)
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(value, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_exhaustion_carries_last_cause() {
    let clock = ManualClock::new();
    let calls = AtomicU32::new(0);
    let result: Result<(), _> = with_retry(&clock, 2, || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move { Err(anyhow::anyhow!("failure #{n}")) }
    })
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    match result {
        Err(SchedulerError::RetriesExhausted { attempts, source }) => {
            assert_eq!(attempts, 2);
            assert_eq!(source.to_string(), "task failed: failure #1");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn test_backoff_is_driven_by_manual_clock() {
    let clock = ManualClock::new();
    let calls = Arc::new(AtomicU32::new(0));
    let attempts = Arc::clone(&calls);
    let retrying = with_retry_backoff(
        &clock,
        3,
        ConstantBackoff(Duration::from_millis(100)),
        move || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(SchedulerError::task(anyhow::anyhow!("cold start")))
                } else {
                    Ok("warm")
                }
            }
        },
    );
    tokio::pin!(retrying);

    assert!(futures::poll!(retrying.as_mut()).is_pending());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(clock.pending_timers(), 1);

    clock.advance(Duration::from_millis(99));
    assert!(futures::poll!(retrying.as_mut()).is_pending());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    clock.advance(Duration::from_millis(1));
    assert_eq!(retrying.await.unwrap(), "warm");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_exponential_backoff_total_wait() {
    let clock = SystemClock::new();
    let started = tokio::time::Instant::now();
    let policy = RetryPolicy::new(4).unwrap().with_backoff(ExponentialBackoff {
        initial: Duration::from_millis(10),
        multiplier: 3,
        max: Duration::from_millis(50),
    });

    let result: Result<(), _> = policy
        .run(&clock, || async { Err(anyhow::anyhow!("down")) })
        .await;

    assert!(matches!(
        result,
        Err(SchedulerError::RetriesExhausted { attempts: 4, .. })
    ));
    // 10 + 30 + 50 (capped)
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(90));
    assert!(waited < Duration::from_millis(100));
    assert!(clock.now() >= 90);
}

#[tokio::test(start_paused = true)]
async fn test_policy_times_out_each_attempt() {
    let clock = SystemClock::new();
    let calls = AtomicU32::new(0);
    let policy = TaskPolicy::new()
        .with_deadline(Duration::from_millis(20))
        .with_retry(RetryPolicy::new(3).unwrap());

    let result = policy
        .run(&clock, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, SchedulerError>(())
            }
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let err = result.unwrap_err();
    assert!(matches!(err.root_cause(), SchedulerError::DeadlineExceeded(_)));
}
