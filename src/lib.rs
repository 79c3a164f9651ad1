//! # Prometheus Task Gate
//!
//! Bounded-concurrency task scheduling for async workloads that call rate-limited
//! or fragile upstreams.
//!
//! Tasks are submitted to a [`Scheduler`](core::Scheduler) that runs at most
//! `concurrency_limit` of them at once. Extra submissions wait in a FIFO queue and
//! start, in submission order, as running tasks settle. Each submission returns a
//! [`TaskHandle`](core::TaskHandle) that settles exactly once with the task's value
//! or error.
//!
//! Three composable wrappers cover the usual failure modes:
//!
//! - **Deadlines**: [`with_deadline`](core::with_deadline) races a task against a
//!   clock timer and reports [`SchedulerError::DeadlineExceeded`](core::SchedulerError::DeadlineExceeded).
//! - **Retries**: [`RetryPolicy`](core::RetryPolicy) re-invokes a task factory up to
//!   a fixed budget with a pluggable [`Backoff`](core::Backoff).
//! - **Rate limiting**: [`SlidingWindowRateLimiter`](core::SlidingWindowRateLimiter)
//!   admits at most `limit` calls per trailing interval.
//!
//! All time flows through the [`Clock`](util::clock::Clock) trait, so tests can
//! drive the whole stack with a [`ManualClock`](util::clock::ManualClock).
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use prometheus_task_gate::core::{RetryPolicy, Scheduler, TaskContext, TaskPolicy};
//!
//! let scheduler = Scheduler::new(4)?;
//! let policy = TaskPolicy::new()
//!     .with_deadline(Duration::from_secs(2))
//!     .with_retry(RetryPolicy::new(3)?);
//!
//! let handle = scheduler.submit_with(policy, |ctx: TaskContext| async move {
//!     tracing::info!(task = ctx.id(), "calling upstream");
//!     call_upstream().await
//! })?;
//! let response = handle.await?;
//! ```
//!
//! For configuration-driven setup see [`config::SchedulerConfig`] and
//! [`builders::build_scheduler`].

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: tasks, wrappers, and the bounded scheduler.
pub mod core;
/// Configuration models for the scheduler and its wrappers.
pub mod config;
/// Builders to construct scheduler components from configuration.
pub mod builders;
/// Runtime adapters.
pub mod runtime;
/// Shared utilities: clocks and telemetry.
pub mod util;
