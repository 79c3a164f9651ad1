//! Task abstraction, lifecycle state, and caller-facing handles.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Notify};

use super::SchedulerError;

/// Identifier assigned to a task when it is submitted.
pub type TaskId = u64;

/// Lifecycle state of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue for a free slot.
    Pending,
    /// Holding a slot and executing.
    Running,
    /// Finished with a value.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Cancelled before it settled.
    Cancelled,
}

impl TaskStatus {
    /// Whether the status is final.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Cooperative cancellation flag shared between the scheduler and a task body.
#[derive(Default)]
pub(crate) struct CancelSignal {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    /// Raise the signal. Returns `true` for the call that raised it.
    pub(crate) fn cancel(&self) -> bool {
        let first = !self.cancelled.swap(true, Ordering::AcqRel);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) async fn cancelled(&self) {
        loop {
            // Register before checking the flag so a concurrent `cancel` is not missed.
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Scheduler-side bookkeeping for one task.
pub(crate) struct TaskRecord {
    id: TaskId,
    status: Mutex<TaskStatus>,
    signal: CancelSignal,
}

impl TaskRecord {
    pub(crate) fn new(id: TaskId) -> Arc<Self> {
        Arc::new(Self {
            id,
            status: Mutex::new(TaskStatus::Pending),
            signal: CancelSignal::default(),
        })
    }

    pub(crate) const fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn status(&self) -> TaskStatus {
        *self.status.lock()
    }

    pub(crate) fn set_status(&self, status: TaskStatus) {
        *self.status.lock() = status;
    }

    pub(crate) const fn signal(&self) -> &CancelSignal {
        &self.signal
    }
}

/// Execution context handed to a task body.
///
/// Cancellation is cooperative: long-running bodies can check
/// [`TaskContext::is_cancelled`] or race their work against
/// [`TaskContext::cancelled`].
#[derive(Clone)]
pub struct TaskContext {
    record: Arc<TaskRecord>,
}

impl TaskContext {
    pub(crate) const fn new(record: Arc<TaskRecord>) -> Self {
        Self { record }
    }

    /// Identifier of the running task.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.record.id()
    }

    /// Whether the scheduler has asked this task to stop.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.record.signal().is_cancelled()
    }

    /// Resolves once the task has been cancelled.
    pub async fn cancelled(&self) {
        self.record.signal().cancelled().await;
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("id", &self.id())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A unit of asynchronous work that can be submitted to a
/// [`Scheduler`](crate::core::Scheduler).
///
/// Closures of the form `|ctx: TaskContext| async move { ... }` returning
/// `Result<T, E>` with `E: Into<SchedulerError>` implement this trait
/// automatically.
///
/// # Example
///
/// ```rust,ignore
/// let handle = scheduler.submit(|ctx: TaskContext| async move {
///     tracing::info!(task = ctx.id(), "fetching");
///     Ok::<_, anyhow::Error>(fetch().await?)
/// })?;
/// let body = handle.await?;
/// ```
#[async_trait]
pub trait Task: Send + 'static {
    /// Value produced on success.
    type Output: Send + 'static;

    /// Run the task to completion.
    async fn execute(self, ctx: TaskContext) -> Result<Self::Output, SchedulerError>;
}

#[async_trait]
impl<F, Fut, T, E> Task for F
where
    F: FnOnce(TaskContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<SchedulerError> + Send + 'static,
{
    type Output = T;

    async fn execute(self, ctx: TaskContext) -> Result<T, SchedulerError> {
        (self)(ctx).await.map_err(Into::into)
    }
}

/// Type-erased settlement used by the scheduler to cancel tasks it only knows by id.
pub(crate) trait Settle: Send + Sync {
    /// Settle the task as cancelled. Returns `false` if it had already settled.
    fn cancel(&self) -> bool;
}

/// Single-shot delivery of a task's outcome to its handle.
///
/// Whichever path takes the sender first (completion or cancellation) settles
/// the task; every later attempt is a no-op.
pub(crate) struct Outcome<T> {
    record: Arc<TaskRecord>,
    tx: Mutex<Option<oneshot::Sender<Result<T, SchedulerError>>>>,
}

impl<T: Send + 'static> Outcome<T> {
    pub(crate) fn channel(
        record: Arc<TaskRecord>,
    ) -> (Arc<Self>, oneshot::Receiver<Result<T, SchedulerError>>) {
        let (tx, rx) = oneshot::channel();
        let outcome = Arc::new(Self {
            record,
            tx: Mutex::new(Some(tx)),
        });
        (outcome, rx)
    }

    /// Deliver a completed execution's result.
    pub(crate) fn complete(&self, result: Result<T, SchedulerError>) -> bool {
        let status = if result.is_ok() {
            TaskStatus::Succeeded
        } else {
            TaskStatus::Failed
        };
        self.settle(status, result)
    }

    fn settle(&self, status: TaskStatus, result: Result<T, SchedulerError>) -> bool {
        let mut tx = self.tx.lock();
        let Some(sender) = tx.take() else {
            return false;
        };
        self.record.set_status(status);
        // The caller may have dropped the handle; the outcome is simply discarded.
        let _ = sender.send(result);
        true
    }
}

impl<T: Send + 'static> Settle for Outcome<T> {
    fn cancel(&self) -> bool {
        self.settle(TaskStatus::Cancelled, Err(SchedulerError::Cancelled))
    }
}

/// Caller-visible reference to a submitted task's eventual outcome.
///
/// Awaiting the handle yields exactly one settlement. Dropping it detaches the
/// task; it keeps running and its result is discarded.
pub struct TaskHandle<T> {
    record: Arc<TaskRecord>,
    rx: oneshot::Receiver<Result<T, SchedulerError>>,
}

impl<T> TaskHandle<T> {
    pub(crate) const fn new(
        record: Arc<TaskRecord>,
        rx: oneshot::Receiver<Result<T, SchedulerError>>,
    ) -> Self {
        Self { record, rx }
    }

    /// Identifier assigned at submission.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.record.id()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.record.status()
    }

    /// Whether the task has reached a terminal state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, SchedulerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(SchedulerError::Aborted)))
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("status", &self.status())
            .finish()
    }
}
