//! Tasks, queue events and the fault policy.

use crate::id::TaskId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A unit of work: a handler name plus self-contained JSON data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Caller-chosen id. Assigned by the queue when absent.
    #[serde(default)]
    pub id: Option<TaskId>,
    /// Registered handler to run. Falls back to the pool's default handler.
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl Task {
    /// A task for the default handler.
    pub fn new(data: impl Into<Value>) -> Self {
        Self {
            id: None,
            handler: None,
            data: data.into(),
        }
    }

    pub fn for_handler(handler: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            id: None,
            handler: Some(handler.into()),
            data: data.into(),
        }
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }
}

/// What crosses the thread boundary: the id, the resolved handler name and the data.
#[derive(Debug, Clone)]
pub(crate) struct TaskEnvelope {
    pub id: TaskId,
    pub handler: String,
    pub data: Value,
    /// Times this task went back to the pending list after a worker fault.
    pub requeues: u32,
}

/// Notification delivered to queue subscribers on the control thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum QueueEvent {
    /// The handler returned a value.
    Result { id: TaskId, value: Value },
    /// The handler failed, or its worker faulted under [`FaultPolicy::Report`].
    Error { id: TaskId, message: String },
    /// The task's worker faulted under [`FaultPolicy::Abandon`]; no result will follow.
    Abandoned { id: TaskId, reason: String },
    /// Everything submitted so far has completed and nothing is pending.
    Drain,
}

impl QueueEvent {
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            QueueEvent::Result { id, .. }
            | QueueEvent::Error { id, .. }
            | QueueEvent::Abandoned { id, .. } => Some(*id),
            QueueEvent::Drain => None,
        }
    }
}

/// What happens to a task whose worker thread died while running it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaultPolicy {
    /// Complete the task with an error event.
    #[default]
    Report,
    /// Put the task back at the front of the pending list, up to
    /// `PoolSettings::max_requeues` times; after that, report it as an error.
    Requeue,
    /// Complete the task with an [`QueueEvent::Abandoned`] event instead of an error.
    Abandon,
}
