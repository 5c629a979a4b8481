//! Task queue backed by a fixed-size pool of worker threads.
//!
//! The queue lives on the control thread. Workers never share memory with
//! it: tasks go out over one command channel per worker and results come
//! back over a single shared message channel.
//!
//! # Design
//!
//! - **Single writer**: pending list, in-flight table and idle pool sit in a
//!   `RefCell` touched only by the control thread.
//! - **Pumped delivery**: worker messages are applied and turned into
//!   [`QueueEvent`]s only when the control thread calls [`TaskQueue::poll`],
//!   [`TaskQueue::poll_timeout`], [`TaskQueue::drain`] or
//!   [`TaskQueue::drain_timeout`].
//! - **Re-entrant listeners**: no borrow of queue state is held while
//!   subscribers run, so a subscriber may submit more work.
//! - **Self-healing**: a worker whose thread faults is replaced, keeping the
//!   pool at its configured size; its in-flight task is handled according to
//!   the configured [`FaultPolicy`].
//!
//! # Example
//!
//! ```ignore
//! let handlers = HandlerRegistry::new()
//!     .with("square", |v| Ok(json!(v.as_i64().unwrap_or(0).pow(2))));
//! let queue = TaskQueue::new(handlers, &PoolSettings::default())?;
//! queue.subscribe(|event| println!("{:?}", event));
//! queue.submit(Task::for_handler("square", 12))?;
//! queue.drain()?;
//! ```

mod error;
mod handler;
mod task;
pub(crate) mod worker;

pub use error::{QueueError, QueueResult};
pub use handler::{Handler, HandlerRegistry};
pub use task::{FaultPolicy, QueueEvent, Task};

use crate::config::PoolSettings;
use crate::id::{SubscriptionId, TaskId, WorkerId};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use task::TaskEnvelope;
use worker::{WorkerHandle, WorkerMessage};

/// Longest a blocking drain waits before checking worker health again.
const MANAGEMENT_INTERVAL: Duration = Duration::from_millis(50);

type Listener = Rc<RefCell<dyn FnMut(&QueueEvent)>>;

/// Snapshot of the queue's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QueueStats {
    pub pool_size: usize,
    pub idle: usize,
    pub busy: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub submitted: u64,
    pub completed: u64,
    pub faults: u64,
}

struct InFlight {
    worker: WorkerId,
    envelope: TaskEnvelope,
}

#[derive(Default)]
struct QueueState {
    workers: BTreeMap<WorkerId, WorkerHandle>,
    idle: VecDeque<WorkerId>,
    pending: VecDeque<TaskEnvelope>,
    in_flight: HashMap<TaskId, InFlight>,
    next_task: u64,
    next_worker: u32,
    submitted: u64,
    completed: u64,
    faults: u64,
    terminated: bool,
}

impl QueueState {
    fn is_quiescent(&self) -> bool {
        self.pending.is_empty() && self.submitted == self.completed
    }

    fn is_known(&self, id: TaskId) -> bool {
        self.in_flight.contains_key(&id) || self.pending.iter().any(|t| t.id == id)
    }

    fn allocate_task_id(&mut self) -> TaskId {
        loop {
            self.next_task += 1;
            let id = TaskId(self.next_task);
            if !self.is_known(id) {
                return id;
            }
        }
    }
}

struct QueueInner {
    registry: Arc<HandlerRegistry>,
    settings: PoolSettings,
    state: RefCell<QueueState>,
    listeners: RefCell<Vec<(SubscriptionId, Listener)>>,
    next_subscription: Cell<u64>,
    message_tx: Sender<WorkerMessage>,
    message_rx: Receiver<WorkerMessage>,
}

/// Handle to a worker pool. Clones share the same pool.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Rc<QueueInner>,
}

impl TaskQueue {
    /// Spawn `settings.workers` threads sharing `handlers`.
    pub fn new(handlers: HandlerRegistry, settings: &PoolSettings) -> QueueResult<Self> {
        if settings.workers == 0 {
            return Err(QueueError::InvalidConfig(
                "worker pool needs at least one worker".to_string(),
            ));
        }
        if let Some(default) = &settings.default_handler {
            if !handlers.contains(default) {
                return Err(QueueError::InvalidConfig(format!(
                    "default handler `{}` is not registered",
                    default
                )));
            }
        }

        let (message_tx, message_rx) = unbounded();
        let inner = QueueInner {
            registry: Arc::new(handlers),
            settings: settings.clone(),
            state: RefCell::new(QueueState::default()),
            listeners: RefCell::new(Vec::new()),
            next_subscription: Cell::new(0),
            message_tx,
            message_rx,
        };

        {
            let mut state = inner.state.borrow_mut();
            for _ in 0..settings.workers {
                // Dropping `inner` on error terminates what was spawned so far.
                let id = inner.spawn_worker(&mut state)?;
                state.idle.push_back(id);
            }
        }

        tracing::info!(
            "Task queue started with {} worker(s), handlers: {:?}",
            settings.workers,
            inner.registry.names()
        );
        Ok(Self {
            inner: Rc::new(inner),
        })
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.inner.settings
    }

    /// Queue a task and try to dispatch it right away.
    ///
    /// Returns the task's id whether or not execution has started.
    pub fn submit(&self, task: Task) -> QueueResult<TaskId> {
        let id = {
            let mut state = self.inner.state.borrow_mut();
            if state.terminated {
                return Err(QueueError::Terminated);
            }
            let handler = task
                .handler
                .or_else(|| self.inner.settings.default_handler.clone())
                .ok_or(QueueError::NoHandler)?;
            if !self.inner.registry.contains(&handler) {
                return Err(QueueError::UnknownHandler(handler));
            }
            let id = match task.id {
                Some(id) if state.is_known(id) => return Err(QueueError::DuplicateTask(id)),
                Some(id) => id,
                None => state.allocate_task_id(),
            };
            state.pending.push_back(TaskEnvelope {
                id,
                handler,
                data: task.data,
                requeues: 0,
            });
            state.submitted += 1;
            self.inner.dispatch(&mut state);
            id
        };
        tracing::trace!(task = %id, "Task submitted");
        Ok(id)
    }

    /// Submit tasks in order. Stops at the first rejected task; tasks accepted
    /// before it stay queued.
    pub fn submit_all(&self, tasks: impl IntoIterator<Item = Task>) -> QueueResult<Vec<TaskId>> {
        tasks.into_iter().map(|task| self.submit(task)).collect()
    }

    /// Apply every worker message already received. Never blocks.
    ///
    /// Returns the number of messages handled.
    pub fn poll(&self) -> usize {
        let mut handled = 0;
        while let Ok(message) = self.inner.message_rx.try_recv() {
            self.inner.process(message);
            handled += 1;
        }
        self.inner.reap();
        handled
    }

    /// Wait up to `timeout` for the first message, then behave like [`poll`](Self::poll).
    pub fn poll_timeout(&self, timeout: Duration) -> usize {
        match self.inner.message_rx.recv_timeout(timeout) {
            Ok(message) => {
                self.inner.process(message);
                1 + self.poll()
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => self.poll(),
        }
    }

    /// Block, delivering events, until everything submitted has completed.
    ///
    /// Returns immediately when the queue is already quiescent.
    pub fn drain(&self) -> QueueResult<()> {
        self.drain_until(None)
    }

    /// Like [`drain`](Self::drain), giving up after `timeout`.
    pub fn drain_timeout(&self, timeout: Duration) -> QueueResult<()> {
        self.drain_until(Some((Instant::now() + timeout, timeout)))
    }

    fn drain_until(&self, deadline: Option<(Instant, Duration)>) -> QueueResult<()> {
        loop {
            self.poll();
            {
                let state = self.inner.state.borrow();
                if state.is_quiescent() {
                    return Ok(());
                }
                if state.terminated {
                    return Err(QueueError::Terminated);
                }
                if state.workers.is_empty() {
                    return Err(QueueError::NoWorkers(state.pending.len()));
                }
            }

            let wait = match deadline {
                Some((at, timeout)) => {
                    let now = Instant::now();
                    if now >= at {
                        return Err(QueueError::Timeout(timeout));
                    }
                    (at - now).min(MANAGEMENT_INTERVAL)
                }
                None => MANAGEMENT_INTERVAL,
            };
            if let Ok(message) = self.inner.message_rx.recv_timeout(wait) {
                self.inner.process(message);
            }
        }
    }

    /// Whether everything submitted has completed and nothing is pending.
    pub fn is_drained(&self) -> bool {
        self.inner.state.borrow().is_quiescent()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.borrow();
        QueueStats {
            pool_size: state.workers.len(),
            idle: state.idle.len(),
            busy: state.in_flight.len(),
            pending: state.pending.len(),
            in_flight: state.in_flight.len(),
            submitted: state.submitted,
            completed: state.completed,
            faults: state.faults,
        }
    }

    /// Register a listener for queue events.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: FnMut(&QueueEvent) + 'static,
    {
        let next = self.inner.next_subscription.get() + 1;
        self.inner.next_subscription.set(next);
        let id = SubscriptionId(next);
        self.inner
            .listeners
            .borrow_mut()
            .push((id, Rc::new(RefCell::new(listener))));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.inner.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    /// Stop every worker and clear all internal tables. Further submissions fail.
    pub fn terminate(&self) {
        self.inner.terminate();
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.state.borrow().terminated
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("stats", &self.stats())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

impl QueueInner {
    fn spawn_worker(&self, state: &mut QueueState) -> QueueResult<WorkerId> {
        let id = WorkerId(state.next_worker);
        state.next_worker += 1;
        let handle = WorkerHandle::spawn(
            id,
            &self.settings.thread_name,
            self.registry.clone(),
            self.message_tx.clone(),
        )?;
        state.workers.insert(handle.id(), handle);
        Ok(id)
    }

    /// Pair idle workers with pending tasks, oldest task first.
    fn dispatch(&self, state: &mut QueueState) {
        while !state.pending.is_empty() {
            let Some(worker) = state.idle.pop_front() else {
                break;
            };
            let Some(envelope) = state.pending.pop_front() else {
                state.idle.push_front(worker);
                break;
            };
            self.assign(state, worker, envelope);
        }
    }

    fn assign(&self, state: &mut QueueState, worker: WorkerId, envelope: TaskEnvelope) {
        let retained = envelope.clone();
        let sent = match state.workers.get(&worker) {
            Some(handle) => handle.run(envelope),
            None => Err(envelope),
        };
        match sent {
            Ok(()) => {
                state.in_flight.insert(
                    retained.id,
                    InFlight {
                        worker,
                        envelope: retained,
                    },
                );
            }
            Err(envelope) => {
                // The worker's thread is gone; keep the task and the pool size.
                tracing::warn!(worker = %worker, "Worker unreachable, replacing it");
                state.pending.push_front(envelope);
                self.replace_worker(state, worker);
            }
        }
    }

    fn replace_worker(&self, state: &mut QueueState, worker: WorkerId) {
        if let Some(handle) = state.workers.remove(&worker) {
            handle.join();
        }
        state.idle.retain(|w| *w != worker);
        match self.spawn_worker(state) {
            Ok(replacement) => {
                tracing::warn!("Worker {} replaced by {}", worker, replacement);
                state.idle.push_back(replacement);
            }
            Err(e) => tracing::error!("Failed to replace worker {}: {}", worker, e),
        }
    }

    fn process(&self, message: WorkerMessage) {
        let events = {
            let mut state = self.state.borrow_mut();
            if state.terminated {
                return;
            }
            match message {
                WorkerMessage::Finished {
                    worker,
                    task,
                    outcome,
                } => self.finished(&mut state, worker, task, outcome),
                WorkerMessage::Faulted {
                    worker,
                    task,
                    reason,
                } => self.faulted(&mut state, worker, task, &reason),
            }
        };
        self.emit(events);
    }

    fn finished(
        &self,
        state: &mut QueueState,
        worker: WorkerId,
        task: TaskId,
        outcome: Result<serde_json::Value, String>,
    ) -> Vec<QueueEvent> {
        if state.in_flight.remove(&task).is_none() {
            tracing::warn!(task = %task, "Result for a task that is not in flight, ignored");
            return Vec::new();
        }
        state.completed += 1;

        let mut events = vec![match outcome {
            Ok(value) => QueueEvent::Result { id: task, value },
            Err(message) => QueueEvent::Error { id: task, message },
        }];

        // The freed worker takes the oldest pending task, if any.
        state.idle.push_front(worker);
        self.dispatch(state);
        if state.is_quiescent() {
            events.push(QueueEvent::Drain);
        }
        events
    }

    fn faulted(
        &self,
        state: &mut QueueState,
        worker: WorkerId,
        task: Option<TaskId>,
        reason: &str,
    ) -> Vec<QueueEvent> {
        if !state.workers.contains_key(&worker) {
            tracing::debug!(worker = %worker, "Fault for a worker already replaced, ignored");
            return Vec::new();
        }
        state.faults += 1;
        tracing::error!(worker = %worker, "Worker faulted: {}", reason);
        self.replace_worker(state, worker);

        let mut events = Vec::new();
        let mut completed = false;
        let lost = task.and_then(|id| state.in_flight.remove(&id));
        if let Some(InFlight { mut envelope, .. }) = lost {
            let id = envelope.id;
            let message = format!("{} faulted: {}", worker, reason);
            match self.settings.fault_policy {
                FaultPolicy::Requeue if envelope.requeues < self.settings.max_requeues => {
                    envelope.requeues += 1;
                    tracing::info!(
                        task = %id,
                        attempt = envelope.requeues,
                        "Requeueing task lost to worker fault"
                    );
                    state.pending.push_front(envelope);
                }
                FaultPolicy::Report | FaultPolicy::Requeue => {
                    state.completed += 1;
                    completed = true;
                    let message = if envelope.requeues > 0 {
                        tracing::warn!(
                            task = %id,
                            "Giving up on task after {} requeue(s)",
                            envelope.requeues
                        );
                        format!(
                            "{} (gave up after {} requeue(s))",
                            message, envelope.requeues
                        )
                    } else {
                        message
                    };
                    events.push(QueueEvent::Error { id, message });
                }
                FaultPolicy::Abandon => {
                    state.completed += 1;
                    completed = true;
                    tracing::warn!(task = %id, "Task abandoned after worker fault");
                    events.push(QueueEvent::Abandoned {
                        id,
                        reason: message,
                    });
                }
            }
        }

        self.dispatch(state);
        if completed && state.is_quiescent() {
            events.push(QueueEvent::Drain);
        }
        events
    }

    /// Replace workers whose threads exited without reporting a fault.
    fn reap(&self) {
        let events = {
            let mut state = self.state.borrow_mut();
            if state.terminated {
                return;
            }
            let dead: Vec<WorkerId> = state
                .workers
                .values()
                .filter(|h| h.is_finished())
                .map(WorkerHandle::id)
                .collect();
            let mut events = Vec::new();
            for worker in dead {
                let task = state
                    .in_flight
                    .iter()
                    .find(|(_, f)| f.worker == worker)
                    .map(|(id, _)| *id);
                events.extend(self.faulted(
                    &mut state,
                    worker,
                    task,
                    "worker thread exited unexpectedly",
                ));
            }
            events
        };
        self.emit(events);
    }

    fn emit(&self, events: Vec<QueueEvent>) {
        for event in events {
            let snapshot: Vec<Listener> = self
                .listeners
                .borrow()
                .iter()
                .map(|(_, l)| l.clone())
                .collect();
            for listener in snapshot {
                match listener.try_borrow_mut() {
                    Ok(mut guard) => {
                        let f = &mut *guard;
                        f(&event);
                    }
                    Err(_) => tracing::warn!("Queue listener re-entered, event skipped"),
                }
            }
        }
    }

    fn terminate(&self) {
        let (workers, busy) = {
            let mut state = self.state.borrow_mut();
            if state.terminated {
                return;
            }
            state.terminated = true;
            state.pending.clear();
            state.idle.clear();
            let busy: Vec<WorkerId> = state.in_flight.values().map(|f| f.worker).collect();
            state.in_flight.clear();
            (std::mem::take(&mut state.workers), busy)
        };

        for handle in workers.values() {
            handle.shutdown();
        }
        let count = workers.len();
        for (id, handle) in workers {
            if busy.contains(&id) {
                handle.detach();
            } else {
                handle.join();
            }
        }
        while self.message_rx.try_recv().is_ok() {}
        self.listeners.borrow_mut().clear();
        tracing::info!("Task queue terminated ({} worker(s) stopped)", count);
    }
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        self.terminate();
    }
}
