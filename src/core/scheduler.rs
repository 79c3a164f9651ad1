//! Bounded-concurrency scheduler.
//!
//! At most `concurrency_limit` tasks hold a slot at once; the rest wait in a FIFO
//! queue. Slot accounting happens only inside the critical sections guarded by
//! the scheduler state mutex (`admit`, `release`, `cancel`, `shutdown`), none of
//! which await while holding the lock. Releasing a slot and refilling it from the
//! head of the queue therefore happen atomically with respect to concurrent
//! submissions and other releases.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::builders::SchedulerBuilder;
use crate::core::audit::{AuditAction, AuditEvent, AuditSink};
use crate::core::policy::TaskPolicy;
use crate::core::rate_limiter::{Admission, SlidingWindowRateLimiter};
use crate::core::task::{Outcome, Settle, TaskRecord};
use crate::core::{SchedulerError, Task, TaskContext, TaskHandle, TaskId, TaskStatus};
use crate::runtime::TokioSpawner;
use crate::util::clock::{Clock, Timestamp};

/// Abstraction for spawning task execution on a runtime.
pub trait Spawn {
    /// Spawn a future to run in the background.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Counters describing scheduler activity since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Tasks accepted by `submit`.
    pub submitted: u64,
    /// Tasks that entered the running set.
    pub started: u64,
    /// Tasks that finished with a value.
    pub succeeded: u64,
    /// Tasks that finished with an error (including panics).
    pub failed: u64,
    /// Tasks cancelled while pending or running.
    pub cancelled: u64,
    /// Largest running-set size observed.
    pub peak_running: usize,
    /// Largest queue length observed.
    pub peak_queue_depth: usize,
}

/// Result of a finished execution, delivered after its slot is released.
struct Completion {
    status: TaskStatus,
    deliver: Box<dyn FnOnce() + Send>,
}

type JobFuture = Pin<Box<dyn Future<Output = Option<Completion>> + Send>>;
type JobFn = Box<dyn FnOnce(TaskContext) -> JobFuture + Send>;

/// A submitted task, type-erased.
struct Job {
    record: Arc<TaskRecord>,
    settle: Arc<dyn Settle>,
    run: JobFn,
}

/// Occupant of a running slot.
struct Slot {
    record: Arc<TaskRecord>,
    settle: Arc<dyn Settle>,
}

#[derive(Default)]
struct SchedulerState {
    queue: VecDeque<Job>,
    running: HashMap<TaskId, Slot>,
    closed: bool,
    // Set while one thread is launching refilled jobs; nested releases leave
    // the refill to that thread.
    draining: bool,
    stats: SchedulerStats,
}

/// How an execution gave up its slot.
#[derive(Debug, Clone, Copy)]
enum Exit {
    /// The task produced a value or an error.
    Settled(TaskStatus),
    /// The task was polled but ended without an outcome (cancelled or panicked).
    Interrupted,
    /// The spawner dropped the task before polling it.
    NotStarted,
}

type AuditBuffer = Vec<(TaskId, AuditAction)>;

/// Components assembled by [`SchedulerBuilder`].
pub(crate) struct SchedulerParts<S> {
    pub(crate) concurrency_limit: usize,
    pub(crate) max_queue_depth: Option<usize>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) default_policy: TaskPolicy,
    pub(crate) audit: Option<Box<dyn AuditSink>>,
    pub(crate) spawner: S,
}

struct Shared<S> {
    limit: usize,
    max_queue_depth: Option<usize>,
    clock: Arc<dyn Clock>,
    default_policy: TaskPolicy,
    next_id: AtomicU64,
    state: Mutex<SchedulerState>,
    audit: Option<Mutex<Box<dyn AuditSink>>>,
    spawner: S,
}

/// Runs submitted tasks with at most `concurrency_limit` in flight, starting
/// queued tasks in submission order as slots free up.
///
/// Cloning is cheap; clones share the same queue and running set.
///
/// # Example
///
/// ```rust,ignore
/// use prometheus_task_gate::core::{Scheduler, TaskContext};
///
/// let scheduler = Scheduler::new(4)?;
/// let handle = scheduler.submit(|_ctx: TaskContext| async move {
///     Ok::<_, anyhow::Error>(fetch_status(url).await?)
/// })?;
/// let status = handle.await?;
/// ```
pub struct Scheduler<S = TokioSpawner>
where
    S: Spawn + Send + Sync + 'static,
{
    shared: Arc<Shared<S>>,
}

impl Scheduler<TokioSpawner> {
    /// Scheduler on the current tokio runtime with a [`SystemClock`](crate::util::clock::SystemClock).
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidArgument`] when `concurrency_limit` is zero,
    /// [`SchedulerError::Runtime`] outside a tokio runtime.
    pub fn new(concurrency_limit: usize) -> Result<Self, SchedulerError> {
        SchedulerBuilder::new(concurrency_limit).build()
    }
}

impl<S> Scheduler<S>
where
    S: Spawn + Send + Sync + 'static,
{
    pub(crate) fn from_parts(parts: SchedulerParts<S>) -> Result<Self, SchedulerError> {
        if parts.concurrency_limit == 0 {
            return Err(SchedulerError::InvalidArgument(
                "concurrency_limit must be greater than 0".into(),
            ));
        }
        if parts.max_queue_depth == Some(0) {
            return Err(SchedulerError::InvalidArgument(
                "max_queue_depth must be greater than 0".into(),
            ));
        }
        debug!(
            concurrency_limit = parts.concurrency_limit,
            max_queue_depth = ?parts.max_queue_depth,
            "scheduler created"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                limit: parts.concurrency_limit,
                max_queue_depth: parts.max_queue_depth,
                clock: parts.clock,
                default_policy: parts.default_policy,
                next_id: AtomicU64::new(1),
                state: Mutex::new(SchedulerState::default()),
                audit: parts.audit.map(Mutex::new),
                spawner: parts.spawner,
            }),
        })
    }

    /// Submit a task. It starts immediately if a slot is free, otherwise it is
    /// queued behind every earlier submission.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Closed`] after [`Scheduler::shutdown`],
    /// [`SchedulerError::QueueFull`] when a bounded queue is at capacity.
    /// Task failures are reported through the returned handle instead.
    pub fn submit<K>(&self, task: K) -> Result<TaskHandle<K::Output>, SchedulerError>
    where
        K: Task,
    {
        self.submit_gated(task, None)
    }

    fn submit_gated<K>(
        &self,
        task: K,
        gate: Option<&SlidingWindowRateLimiter>,
    ) -> Result<TaskHandle<K::Output>, SchedulerError>
    where
        K: Task,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let record = TaskRecord::new(id);
        let (outcome, rx) = Outcome::channel(Arc::clone(&record));
        let settle: Arc<dyn Settle> = outcome.clone();

        let run: JobFn = Box::new(move |ctx: TaskContext| -> JobFuture {
            Box::pin(async move {
                let watch = ctx.clone();
                let result = tokio::select! {
                    biased;
                    () = watch.cancelled() => None,
                    result = task.execute(ctx) => Some(result),
                };
                let Some(result) = result else {
                    return None;
                };
                let status = if result.is_ok() {
                    TaskStatus::Succeeded
                } else {
                    TaskStatus::Failed
                };
                let deliver: Box<dyn FnOnce() + Send> = Box::new(move || {
                    // Once cancelled, the late result must not reach the caller.
                    if !watch.is_cancelled() {
                        outcome.complete(result);
                    }
                });
                Some(Completion { status, deliver })
            })
        });

        self.shared.admit(
            Job {
                record: Arc::clone(&record),
                settle,
                run,
            },
            gate,
        )?;
        Ok(TaskHandle::new(record, rx))
    }

    /// Submit a re-invocable task under `policy`: each attempt is bounded by the
    /// policy deadline and failed attempts are retried per its retry budget,
    /// using this scheduler's clock. The whole run occupies a single slot.
    ///
    /// # Errors
    ///
    /// Same as [`Scheduler::submit`].
    pub fn submit_with<F, Fut, T, E>(
        &self,
        policy: TaskPolicy,
        mut factory: F,
    ) -> Result<TaskHandle<T>, SchedulerError>
    where
        F: FnMut(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<SchedulerError> + Send + 'static,
    {
        let clock = Arc::clone(&self.shared.clock);
        self.submit(move |ctx: TaskContext| async move {
            policy.run(clock.as_ref(), || factory(ctx.clone())).await
        })
    }

    /// [`Scheduler::submit_with`] using the scheduler's default policy.
    ///
    /// # Errors
    ///
    /// Same as [`Scheduler::submit`].
    pub fn submit_with_defaults<F, Fut, T, E>(
        &self,
        factory: F,
    ) -> Result<TaskHandle<T>, SchedulerError>
    where
        F: FnMut(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<SchedulerError> + Send + 'static,
    {
        self.submit_with(self.shared.default_policy.clone(), factory)
    }

    /// Submit only if `limiter` admits the call.
    ///
    /// The limiter is consulted after the scheduler has decided it can accept
    /// the task, so a refused submission never spends rate budget.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::RateLimited`] with the suggested wait when the limiter
    /// rejects; otherwise as [`Scheduler::submit`].
    pub fn submit_admitted<K>(
        &self,
        limiter: &SlidingWindowRateLimiter,
        task: K,
    ) -> Result<TaskHandle<K::Output>, SchedulerError>
    where
        K: Task,
    {
        self.submit_gated(task, Some(limiter))
    }

    /// Cancel the task behind `handle`.
    ///
    /// A pending task is removed from the queue and never runs. A running task
    /// is signalled, its handle settles with [`SchedulerError::Cancelled`], and
    /// its slot is released at the task's next suspension point. Cancelling a
    /// finished task is a no-op.
    ///
    /// Returns `true` if this call cancelled the task.
    pub fn cancel<T>(&self, handle: &TaskHandle<T>) -> bool {
        self.shared.cancel(handle.id())
    }

    /// Stop accepting submissions and cancel every pending and running task.
    ///
    /// Returns the number of tasks cancelled.
    pub fn shutdown(&self) -> usize {
        self.shared.shutdown()
    }

    /// Tasks currently holding a slot.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.shared.state.lock().running.len()
    }

    /// Tasks waiting for a slot.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Snapshot of activity counters.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.shared.state.lock().stats
    }

    /// Configured maximum number of concurrently running tasks.
    #[must_use]
    pub fn concurrency_limit(&self) -> usize {
        self.shared.limit
    }

    /// Whether [`Scheduler::shutdown`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Clock used for policies and audit timestamps.
    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.shared.clock)
    }

    /// Policy applied by [`Scheduler::submit_with_defaults`].
    #[must_use]
    pub fn default_policy(&self) -> &TaskPolicy {
        &self.shared.default_policy
    }
}

impl<S> Clone for Scheduler<S>
where
    S: Spawn + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S> fmt::Debug for Scheduler<S>
where
    S: Spawn + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Scheduler")
            .field("concurrency_limit", &self.shared.limit)
            .field("running", &state.running.len())
            .field("queued", &state.queue.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<S> Shared<S>
where
    S: Spawn + Send + Sync + 'static,
{
    /// Start the job now if a slot is free, otherwise append it to the queue.
    ///
    /// `gate` is consulted last, once the job is known to be acceptable.
    fn admit(
        self: &Arc<Self>,
        job: Job,
        gate: Option<&SlidingWindowRateLimiter>,
    ) -> Result<(), SchedulerError> {
        let id = job.record.id();
        let now = self.clock.now();
        let mut events = AuditBuffer::new();
        let start = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(SchedulerError::Closed);
            }

            let starts_now = state.running.len() < self.limit && state.queue.is_empty();
            if !starts_now {
                if let Some(max) = self.max_queue_depth {
                    if state.queue.len() >= max {
                        warn!(task = id, depth = state.queue.len(), "task rejected: queue full");
                        return Err(SchedulerError::QueueFull(format!(
                            "max queue depth {max} reached"
                        )));
                    }
                }
            }
            if let Some(limiter) = gate {
                if let Admission::Rejected { retry_after } = limiter.check() {
                    debug!(task = id, ?retry_after, "submission rejected by rate limiter");
                    return Err(SchedulerError::RateLimited(retry_after));
                }
            }

            state.stats.submitted += 1;
            events.push((id, AuditAction::Submit));
            if starts_now {
                Some(Self::occupy(&mut state, job, &mut events))
            } else {
                events.push((id, AuditAction::Enqueue));
                state.queue.push_back(job);
                state.stats.peak_queue_depth = state.stats.peak_queue_depth.max(state.queue.len());
                debug!(task = id, depth = state.queue.len(), "task enqueued");
                None
            }
        };
        self.emit(events, now);

        if let Some(job) = start {
            info!(task = id, "task started immediately");
            self.launch(job);
        }
        Ok(())
    }

    /// Move a job into the running set. Caller holds the state lock.
    fn occupy(state: &mut SchedulerState, job: Job, events: &mut AuditBuffer) -> Job {
        let id = job.record.id();
        job.record.set_status(TaskStatus::Running);
        state.running.insert(
            id,
            Slot {
                record: Arc::clone(&job.record),
                settle: Arc::clone(&job.settle),
            },
        );
        state.stats.started += 1;
        state.stats.peak_running = state.stats.peak_running.max(state.running.len());
        events.push((id, AuditAction::Start));
        job
    }

    /// Pop queued jobs into free slots. Caller holds the state lock.
    fn take_refill(&self, state: &mut SchedulerState, events: &mut AuditBuffer) -> Vec<Job> {
        let mut refill = Vec::new();
        while state.running.len() < self.limit {
            let Some(job) = state.queue.pop_front() else {
                break;
            };
            refill.push(Self::occupy(state, job, events));
        }
        refill
    }

    fn launch(self: &Arc<Self>, job: Job) {
        let Job { record, run, .. } = job;
        let mut guard = SlotGuard {
            shared: Arc::clone(self),
            record: Arc::clone(&record),
            started: false,
            released: false,
        };
        let ctx = TaskContext::new(record);

        self.spawner.spawn(async move {
            guard.started = true;
            match run(ctx).await {
                Some(Completion { status, deliver }) => {
                    guard.finish(Exit::Settled(status));
                    deliver();
                }
                None => guard.finish(Exit::Interrupted),
            }
        });
    }

    /// Free the slot held by `id` and refill free slots from the queue head.
    fn release(self: &Arc<Self>, id: TaskId, exit: Exit) {
        let now = self.clock.now();
        let mut events = AuditBuffer::new();
        let mut abandoned = None;
        let refill = {
            let mut state = self.state.lock();
            let Some(slot) = state.running.remove(&id) else {
                return;
            };

            let cancelled = slot.record.signal().is_cancelled();
            match exit {
                _ if cancelled => {}
                Exit::Settled(TaskStatus::Succeeded) => {
                    state.stats.succeeded += 1;
                    events.push((id, AuditAction::Succeed));
                }
                Exit::Settled(_) => {
                    state.stats.failed += 1;
                    events.push((id, AuditAction::Fail));
                }
                Exit::Interrupted => {
                    warn!(task = id, "task ended without settling");
                    slot.record.set_status(TaskStatus::Failed);
                    state.stats.failed += 1;
                    events.push((id, AuditAction::Fail));
                }
                Exit::NotStarted => {
                    debug!(task = id, "task dropped by spawner before it started");
                    slot.record.signal().cancel();
                    state.stats.cancelled += 1;
                    events.push((id, AuditAction::Cancel));
                    abandoned = Some(slot.settle);
                }
            }

            if state.draining {
                Vec::new()
            } else {
                let refill = self.take_refill(&mut state, &mut events);
                state.draining = !refill.is_empty();
                refill
            }
        };
        self.emit(events, now);
        if let Some(settle) = abandoned {
            settle.cancel();
        }

        self.drain(refill);
    }

    /// Launch refilled jobs until no slot can be refilled. Releases that happen
    /// meanwhile, including ones triggered from inside `launch`, only account
    /// their slot and return, so refilling never recurses.
    fn drain(self: &Arc<Self>, mut batch: Vec<Job>) {
        while !batch.is_empty() {
            for job in batch.drain(..) {
                debug!(task = job.record.id(), "woke queued task");
                self.launch(job);
            }

            let now = self.clock.now();
            let mut events = AuditBuffer::new();
            batch = {
                let mut state = self.state.lock();
                let refill = self.take_refill(&mut state, &mut events);
                if refill.is_empty() {
                    state.draining = false;
                }
                refill
            };
            self.emit(events, now);
        }
    }

    fn cancel(&self, id: TaskId) -> bool {
        let settle = {
            let mut state = self.state.lock();
            if let Some(pos) = state.queue.iter().position(|job| job.record.id() == id) {
                state.queue.remove(pos).map(|job| {
                    job.record.signal().cancel();
                    job.settle
                })
            } else if let Some(slot) = state.running.get(&id) {
                slot.record.signal().cancel();
                Some(Arc::clone(&slot.settle))
            } else {
                None
            }
        };

        let Some(settle) = settle else {
            return false;
        };
        if !settle.cancel() {
            return false;
        }

        let now = self.clock.now();
        self.state.lock().stats.cancelled += 1;
        self.emit(vec![(id, AuditAction::Cancel)], now);
        info!(task = id, "task cancelled");
        true
    }

    fn shutdown(&self) -> usize {
        let victims: Vec<(TaskId, Arc<dyn Settle>)> = {
            let mut state = self.state.lock();
            state.closed = true;
            let pending = state.queue.drain(..).map(|job| {
                job.record.signal().cancel();
                (job.record.id(), job.settle)
            });
            let mut victims: Vec<_> = pending.collect();
            for (id, slot) in &state.running {
                slot.record.signal().cancel();
                victims.push((*id, Arc::clone(&slot.settle)));
            }
            victims
        };

        let now = self.clock.now();
        let cancelled: AuditBuffer = victims
            .into_iter()
            .filter(|(_, settle)| settle.cancel())
            .map(|(id, _)| (id, AuditAction::Cancel))
            .collect();
        let count = cancelled.len();
        self.state.lock().stats.cancelled += count as u64;
        self.emit(cancelled, now);
        info!(cancelled = count, "scheduler shut down");
        count
    }

    /// Hand buffered events to the audit sink. Never called with the state lock
    /// held, so sinks may query the scheduler.
    fn emit(&self, events: AuditBuffer, at_ms: Timestamp) {
        let Some(sink) = &self.audit else {
            return;
        };
        let mut sink = sink.lock();
        for (task_id, action) in events {
            sink.record(AuditEvent::new(task_id, action, at_ms));
        }
    }
}

/// Releases a running slot exactly once, even if the task panics or the
/// spawner drops it unpolled.
struct SlotGuard<S>
where
    S: Spawn + Send + Sync + 'static,
{
    shared: Arc<Shared<S>>,
    record: Arc<TaskRecord>,
    started: bool,
    released: bool,
}

impl<S> SlotGuard<S>
where
    S: Spawn + Send + Sync + 'static,
{
    fn finish(&mut self, exit: Exit) {
        if !self.released {
            self.released = true;
            self.shared.release(self.record.id(), exit);
        }
    }
}

impl<S> Drop for SlotGuard<S>
where
    S: Spawn + Send + Sync + 'static,
{
    fn drop(&mut self) {
        let exit = if self.started {
            Exit::Interrupted
        } else {
            Exit::NotStarted
        };
        self.finish(exit);
    }
}
