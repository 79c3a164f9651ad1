//! Tests for configuration validation

use prometheus_task_gate::config::{BackoffConfig, RateLimitConfig, RetryConfig, SchedulerConfig};

#[test]
fn test_default_config_is_valid() {
    let cfg = SchedulerConfig::default();
    assert!(cfg.concurrency_limit >= 1);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_zero_concurrency_is_invalid() {
    let cfg = SchedulerConfig {
        concurrency_limit: 0,
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_zero_queue_depth_is_invalid() {
    let cfg = SchedulerConfig {
        max_queue_depth: Some(0),
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_zero_retry_budget_is_invalid() {
    let cfg = SchedulerConfig {
        retry: Some(RetryConfig {
            max_attempts: 0,
            backoff: BackoffConfig::None,
        }),
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_exponential_cap_below_initial_is_invalid() {
    let cfg = SchedulerConfig {
        retry: Some(RetryConfig {
            max_attempts: 3,
            backoff: BackoffConfig::Exponential {
                initial_ms: 500,
                multiplier: 2,
                max_ms: 100,
            },
        }),
        ..SchedulerConfig::default()
    };
    let err = cfg.validate().unwrap_err();
    assert!(err.contains("max_ms"));
}

#[test]
fn test_zero_rate_interval_is_invalid() {
    let cfg = SchedulerConfig {
        rate_limit: Some(RateLimitConfig {
            limit: 5,
            interval_ms: 0,
        }),
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_from_json_rejects_invalid_values() {
    let err = SchedulerConfig::from_json_str(r#"{"concurrency_limit": 0}"#).unwrap_err();
    assert!(err.contains("concurrency_limit"));

    let err = SchedulerConfig::from_json_str("not json").unwrap_err();
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_config_round_trips_through_json() {
    let cfg = SchedulerConfig {
        concurrency_limit: 4,
        max_queue_depth: Some(64),
        default_deadline_ms: Some(2_000),
        retry: Some(RetryConfig {
            max_attempts: 3,
            backoff: BackoffConfig::Constant { delay_ms: 100 },
        }),
        rate_limit: Some(RateLimitConfig {
            limit: 10,
            interval_ms: 1_000,
        }),
    };
    let json = serde_json::to_string(&cfg).unwrap();
    assert_eq!(SchedulerConfig::from_json_str(&json).unwrap(), cfg);
}
