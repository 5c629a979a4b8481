//! Worker thread implementation.
//!
//! Each worker owns a command receiver and shares the pool's message sender.
//! It blocks on its command channel, runs one task at a time and reports
//! back over the message channel.
//!
//! # Failure handling
//!
//! - A handler returning `Err` is a handler failure: reported as
//!   `Finished` with an `Err` outcome, and the worker keeps running.
//! - A handler panic is an execution fault: it is caught at the thread
//!   boundary, reported as `Faulted`, and the thread exits. The pool
//!   replaces it.

use super::error::QueueResult;
use super::handler::HandlerRegistry;
use super::task::TaskEnvelope;
use crate::id::{TaskId, WorkerId};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde_json::Value;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Commands sent from the control thread to one worker.
#[derive(Debug)]
pub(crate) enum WorkerCommand {
    Run(TaskEnvelope),
    Shutdown,
}

/// Messages sent from workers back to the control thread.
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    Finished {
        worker: WorkerId,
        task: TaskId,
        outcome: Result<Value, String>,
    },
    Faulted {
        worker: WorkerId,
        task: Option<TaskId>,
        reason: String,
    },
}

/// Control-thread side of a worker.
pub(crate) struct WorkerHandle {
    id: WorkerId,
    commands: Sender<WorkerCommand>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn spawn(
        id: WorkerId,
        thread_name: &str,
        registry: Arc<HandlerRegistry>,
        messages: Sender<WorkerMessage>,
    ) -> QueueResult<Self> {
        let (commands, command_rx) = unbounded();
        let thread = thread::Builder::new()
            .name(format!("{}-{}", thread_name, id.0))
            .spawn(move || worker_loop(id, registry, command_rx, messages))?;
        tracing::debug!(worker = %id, "Worker spawned");
        Ok(Self {
            id,
            commands,
            thread: Some(thread),
        })
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Hand a task to the worker. Gives the task back if the worker is gone.
    pub fn run(&self, envelope: TaskEnvelope) -> Result<(), TaskEnvelope> {
        self.commands
            .send(WorkerCommand::Run(envelope))
            .map_err(|e| match e.into_inner() {
                WorkerCommand::Run(envelope) => envelope,
                WorkerCommand::Shutdown => unreachable!("sent a Run command"),
            })
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(WorkerCommand::Shutdown);
    }

    /// Whether the thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the thread to exit.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(worker = %self.id, "Worker thread panicked outside a task");
            }
        }
    }

    /// Let the thread finish on its own.
    pub fn detach(mut self) {
        self.thread.take();
    }
}

fn worker_loop(
    id: WorkerId,
    registry: Arc<HandlerRegistry>,
    commands: Receiver<WorkerCommand>,
    messages: Sender<WorkerMessage>,
) {
    while let Ok(command) = commands.recv() {
        let envelope = match command {
            WorkerCommand::Run(envelope) => envelope,
            WorkerCommand::Shutdown => break,
        };
        let task = envelope.id;
        match panic::catch_unwind(AssertUnwindSafe(|| execute(&registry, envelope))) {
            Ok(outcome) => {
                let message = WorkerMessage::Finished {
                    worker: id,
                    task,
                    outcome,
                };
                if messages.send(message).is_err() {
                    break;
                }
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                tracing::error!(worker = %id, task = %task, "Handler panicked: {}", reason);
                let _ = messages.send(WorkerMessage::Faulted {
                    worker: id,
                    task: Some(task),
                    reason,
                });
                return;
            }
        }
    }
    tracing::debug!(worker = %id, "Worker stopped");
}

fn execute(registry: &HandlerRegistry, envelope: TaskEnvelope) -> Result<Value, String> {
    match registry.get(&envelope.handler) {
        Some(handler) => handler(envelope.data).map_err(|e| format!("{:#}", e)),
        None => Err(format!("Unknown handler: {}", envelope.handler)),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
