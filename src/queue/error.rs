//! Task queue error types.

use crate::id::TaskId;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Task queue has been terminated")]
    Terminated,

    #[error("Unknown handler: {0}")]
    UnknownHandler(String),

    #[error("Task names no handler and no default handler is configured")]
    NoHandler,

    #[error("Task {0} is already pending or in flight")]
    DuplicateTask(TaskId),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("Timed out after {0:?} waiting for the queue to drain")]
    Timeout(Duration),

    #[error("No live workers remain for {0} pending task(s)")]
    NoWorkers(usize),
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;
