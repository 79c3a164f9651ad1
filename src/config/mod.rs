//! Configuration models for the scheduler and its wrappers.

pub mod scheduler;

pub use scheduler::{BackoffConfig, RateLimitConfig, RetryConfig, SchedulerConfig};
