//! Builders to construct schedulers and rate limiters.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SchedulerConfig;
use crate::core::scheduler::SchedulerParts;
use crate::core::{
    AuditSink, Scheduler, SchedulerError, SlidingWindowRateLimiter, Spawn, TaskPolicy,
};
use crate::runtime::TokioSpawner;
use crate::util::clock::{Clock, SystemClock};

/// Step-by-step construction of a [`Scheduler`].
///
/// ```rust,ignore
/// let scheduler = SchedulerBuilder::new(8)
///     .max_queue_depth(1_000)
///     .clock(Arc::new(ManualClock::new()))
///     .build()?;
/// ```
pub struct SchedulerBuilder {
    concurrency_limit: usize,
    max_queue_depth: Option<usize>,
    clock: Option<Arc<dyn Clock>>,
    default_policy: TaskPolicy,
    audit: Option<Box<dyn AuditSink>>,
}

impl SchedulerBuilder {
    /// Start a builder for a scheduler running at most `concurrency_limit` tasks.
    #[must_use]
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            concurrency_limit,
            max_queue_depth: None,
            clock: None,
            default_policy: TaskPolicy::default(),
            audit: None,
        }
    }

    /// Reject submissions once `depth` tasks are waiting.
    #[must_use]
    pub const fn max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = Some(depth);
        self
    }

    /// Time source for policies, audit timestamps, and timers.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Policy used by [`Scheduler::submit_with_defaults`].
    #[must_use]
    pub fn default_policy(mut self, policy: TaskPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Record lifecycle events to `sink`.
    #[must_use]
    pub fn audit<A>(mut self, sink: A) -> Self
    where
        A: AuditSink + 'static,
    {
        self.audit = Some(Box::new(sink));
        self
    }

    /// Build on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Runtime`] outside a tokio runtime,
    /// [`SchedulerError::InvalidArgument`] for a zero limit or queue depth.
    pub fn build(self) -> Result<Scheduler<TokioSpawner>, SchedulerError> {
        let spawner = TokioSpawner::try_current()?;
        self.build_with(spawner)
    }

    /// Build with an explicit spawner.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidArgument`] for a zero limit or queue depth.
    pub fn build_with<S>(self, spawner: S) -> Result<Scheduler<S>, SchedulerError>
    where
        S: Spawn + Send + Sync + 'static,
    {
        Scheduler::from_parts(SchedulerParts {
            concurrency_limit: self.concurrency_limit,
            max_queue_depth: self.max_queue_depth,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
            default_policy: self.default_policy,
            audit: self.audit,
            spawner,
        })
    }
}

impl fmt::Debug for SchedulerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerBuilder")
            .field("concurrency_limit", &self.concurrency_limit)
            .field("max_queue_depth", &self.max_queue_depth)
            .field("default_policy", &self.default_policy)
            .field("audit", &self.audit.is_some())
            .finish_non_exhaustive()
    }
}

/// Build a scheduler from configuration.
///
/// # Errors
///
/// [`SchedulerError::InvalidArgument`] when the configuration does not validate.
pub fn build_scheduler<S>(
    cfg: &SchedulerConfig,
    clock: Arc<dyn Clock>,
    spawner: S,
) -> Result<Scheduler<S>, SchedulerError>
where
    S: Spawn + Send + Sync + 'static,
{
    cfg.validate()
        .map_err(|e| SchedulerError::InvalidArgument(format!("config invalid: {e}")))?;

    let mut builder = SchedulerBuilder::new(cfg.concurrency_limit)
        .clock(clock)
        .default_policy(cfg.to_policy()?);
    if let Some(depth) = cfg.max_queue_depth {
        builder = builder.max_queue_depth(depth);
    }
    builder.build_with(spawner)
}

/// Build the admission limiter described by `cfg`, if one is configured.
///
/// # Errors
///
/// [`SchedulerError::InvalidArgument`] for a zero limit or interval.
pub fn build_rate_limiter(
    cfg: &SchedulerConfig,
    clock: Arc<dyn Clock>,
) -> Result<Option<SlidingWindowRateLimiter>, SchedulerError> {
    cfg.rate_limit
        .map(|rate| {
            SlidingWindowRateLimiter::new(rate.limit, Duration::from_millis(rate.interval_ms), clock)
        })
        .transpose()
}
