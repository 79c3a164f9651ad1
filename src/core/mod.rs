//! Core scheduling abstractions: tasks, wrappers, and the bounded scheduler.

pub mod error;
pub mod task;
pub mod deadline;
pub mod retry;
pub mod rate_limiter;
pub mod policy;
pub mod audit;
pub mod scheduler;

pub use error::{AppResult, SchedulerError};
pub use task::{Task, TaskContext, TaskHandle, TaskId, TaskStatus};
pub use deadline::with_deadline;
pub use retry::{
    with_retry, with_retry_backoff, Backoff, ConstantBackoff, ExponentialBackoff, NoBackoff,
    RetryPolicy,
};
pub use rate_limiter::{Admission, SlidingWindowRateLimiter};
pub use policy::TaskPolicy;
pub use audit::{AuditAction, AuditEvent, AuditSink, InMemoryAuditSink};
pub use scheduler::{Scheduler, SchedulerStats, Spawn};
