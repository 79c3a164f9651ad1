//! Audit sink implementations.
//!
//! The scheduler reports every task lifecycle transition to an optional sink.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::TaskId;
use crate::util::clock::Timestamp;

/// Lifecycle transition being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Task accepted by `submit`.
    Submit,
    /// Task parked in the queue because every slot was taken.
    Enqueue,
    /// Task moved into the running set.
    Start,
    /// Task finished with a value.
    Succeed,
    /// Task finished with an error.
    Fail,
    /// Task cancelled.
    Cancel,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Submit => "submit",
            Self::Enqueue => "enqueue",
            Self::Start => "start",
            Self::Succeed => "succeed",
            Self::Fail => "fail",
            Self::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

/// Audit event structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: Uuid,
    /// Related task identifier.
    pub task_id: TaskId,
    /// Transition taken.
    pub action: AuditAction,
    /// Scheduler clock reading when the transition happened.
    pub at_ms: Timestamp,
}

impl AuditEvent {
    /// Build an event with a fresh identifier.
    #[must_use]
    pub fn new(task_id: TaskId, action: AuditAction, at_ms: Timestamp) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            task_id,
            action,
            at_ms,
        }
    }
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// In-memory audit sink for testing and dev.
///
/// Keeps the most recent `max_events` events; a capacity of zero keeps none.
/// Clones share the same buffer, so a test can keep one clone while the
/// scheduler owns another.
#[derive(Clone)]
pub struct InMemoryAuditSink {
    events: std::sync::Arc<parking_lot::Mutex<VecDeque<AuditEvent>>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: std::sync::Arc::new(parking_lot::Mutex::new(VecDeque::with_capacity(
                max_events.min(1024),
            ))),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Task ids recorded for `action`, in recording order.
    #[must_use]
    pub fn task_ids(&self, action: AuditAction) -> Vec<TaskId> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.action == action)
            .map(|event| event.task_id)
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

impl fmt::Debug for InMemoryAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryAuditSink")
            .field("len", &self.events.lock().len())
            .field("max_events", &self.max_events)
            .finish()
    }
}
