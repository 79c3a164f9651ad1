//! Tests for utility functions

use std::time::Duration;

use prometheus_task_gate::util::clock::{Clock, ManualClock, SystemClock};
use prometheus_task_gate::util::telemetry::init_tracing;

#[test]
fn test_manual_clock_starts_at_zero() {
    let clock = ManualClock::new();
    assert_eq!(clock.now(), 0);
    clock.advance(Duration::from_millis(1_250));
    assert_eq!(clock.now(), 1_250);
}

#[test]
fn test_manual_clock_clones_share_time() {
    let clock = ManualClock::new();
    let other = clock.clone();
    other.advance(Duration::from_secs(2));
    assert_eq!(clock.now(), 2_000);
}

#[tokio::test]
async fn test_manual_timers_fire_in_deadline_order() {
    let clock = ManualClock::new();
    let late = clock.after(Duration::from_millis(30));
    let early = clock.after(Duration::from_millis(10));
    assert_eq!(clock.pending_timers(), 2);

    clock.advance(Duration::from_millis(10));
    early.await;
    assert_eq!(clock.fired_timers(), 1);
    assert!(!late.is_fired());

    clock.advance(Duration::from_millis(20));
    late.await;
    assert_eq!(clock.fired_timers(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_system_clock_tracks_tokio_time() {
    let clock = SystemClock::new();
    let before = clock.now();
    clock.after(Duration::from_millis(40)).await;
    assert!(clock.now() >= before + 40);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
}
