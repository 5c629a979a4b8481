//! Motions that hand their work to the task queue.
//!
//! The adapter is the boundary between the single-threaded graph and the
//! worker pool. It submits the payload of each incoming packet and keeps a
//! correlation table from task id back to the packet it came from. When the
//! queue delivers the matching event, the adapter rebuilds the outgoing
//! packet and sends it downstream through the outlet it kept.
//!
//! # Modes
//!
//! - **Per packet**: one task per packet. The result replaces only the
//!   `payload` field; a failure adds an `error` field and changes nothing
//!   else. Packets complete in whatever order the workers finish.
//! - **Batch**: an array payload becomes one task per item. The outgoing
//!   packet is sent once every item has completed, with the results in the
//!   original index order.

use crate::graph::{Config, Motion, Outlet, Packet};
use crate::id::{SubscriptionId, TaskId};
use crate::queue::{QueueEvent, Task, TaskQueue};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};

/// How an adapter maps packets to tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffloadMode {
    #[default]
    Packet,
    Batch,
}

/// Configuration accepted by [`Offload::factory`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffloadConfig {
    /// Handler to run; the pool's default handler when absent.
    pub handler: Option<String>,
    pub mode: OffloadMode,
}

/// Constructors for worker-backed motions.
pub struct Offload;

impl Offload {
    /// One task per packet, result written to `payload`.
    pub fn per_packet(queue: &TaskQueue, handler: impl Into<String>) -> Motion {
        Motion::processor(adapter(queue, Some(handler.into()), OffloadMode::Packet))
    }

    /// One task per array item, results reassembled in index order.
    pub fn batch(queue: &TaskQueue, handler: impl Into<String>) -> Motion {
        Motion::processor(adapter(queue, Some(handler.into()), OffloadMode::Batch))
    }

    /// Factory reading an [`OffloadConfig`] from its configuration object.
    pub fn factory(queue: &TaskQueue) -> Motion {
        let queue = queue.clone();
        Motion::factory(move |config: &Config| {
            let config = serde_json::from_value::<OffloadConfig>(config.clone())
                .unwrap_or_else(|e| {
                    tracing::warn!("Invalid offload configuration, using defaults: {}", e);
                    OffloadConfig::default()
                });
            adapter(&queue, config.handler, config.mode)
        })
    }
}

enum Correlation {
    Single { packet: Packet, outlet: Outlet },
    Item { batch: u64, index: usize },
}

struct Batch {
    packet: Packet,
    outlet: Outlet,
    size: usize,
    results: BTreeMap<usize, Value>,
    failures: Vec<(usize, String)>,
}

impl Batch {
    fn is_complete(&self) -> bool {
        self.results.len() + self.failures.len() >= self.size
    }

    fn finish(mut self) -> (Outlet, Packet) {
        if self.failures.is_empty() {
            let ordered: Vec<Value> = self.results.into_values().collect();
            return (self.outlet, self.packet.with_payload(ordered));
        }
        self.failures.sort_by_key(|(index, _)| *index);
        let error = json!({
            "message": format!("{} of {} item(s) failed", self.failures.len(), self.size),
            "failures": self
                .failures
                .iter()
                .map(|(index, message)| json!({ "index": index, "message": message }))
                .collect::<Vec<_>>(),
        });
        (self.outlet, self.packet.with_error(error))
    }
}

#[derive(Default)]
struct OffloadState {
    pending: HashMap<TaskId, Correlation>,
    batches: HashMap<u64, Batch>,
    next_batch: u64,
}

/// Removes the adapter's queue listener when the adapter is dropped.
struct Subscription {
    queue: TaskQueue,
    id: SubscriptionId,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.queue.unsubscribe(self.id);
    }
}

fn adapter(
    queue: &TaskQueue,
    handler: Option<String>,
    mode: OffloadMode,
) -> impl FnMut(&Outlet, Packet) {
    let state = Rc::new(RefCell::new(OffloadState::default()));
    let listener_state = Rc::downgrade(&state);
    let id = queue.subscribe(move |event| deliver(&listener_state, event));
    let subscription = Subscription {
        queue: queue.clone(),
        id,
    };

    move |out: &Outlet, packet: Packet| {
        let queue = &subscription.queue;
        match mode {
            OffloadMode::Batch if packet.payload().is_array() => {
                submit_batch(queue, handler.as_deref(), &state, out, packet)
            }
            _ => submit_single(queue, handler.as_deref(), &state, out, packet),
        }
    }
}

fn task_for(handler: Option<&str>, data: Value) -> Task {
    match handler {
        Some(name) => Task::for_handler(name, data),
        None => Task::new(data),
    }
}

fn submit_single(
    queue: &TaskQueue,
    handler: Option<&str>,
    state: &RefCell<OffloadState>,
    out: &Outlet,
    packet: Packet,
) {
    match queue.submit(task_for(handler, packet.payload().clone())) {
        Ok(id) => {
            state.borrow_mut().pending.insert(
                id,
                Correlation::Single {
                    packet,
                    outlet: out.clone(),
                },
            );
        }
        Err(e) => {
            tracing::warn!("Offload submission failed: {}", e);
            out.send(packet.with_error(e.to_string()));
        }
    }
}

fn submit_batch(
    queue: &TaskQueue,
    handler: Option<&str>,
    state: &RefCell<OffloadState>,
    out: &Outlet,
    packet: Packet,
) {
    let items = match packet.payload() {
        Value::Array(items) => items.clone(),
        _ => Vec::new(),
    };
    if items.is_empty() {
        out.send(packet);
        return;
    }

    let mut submitted = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match queue.submit(task_for(handler, item)) {
            Ok(id) => submitted.push((id, index)),
            Err(e) => {
                // Results of items already submitted find no correlation and are ignored.
                tracing::warn!("Offload batch submission failed at item {}: {}", index, e);
                out.send(packet.with_error(e.to_string()));
                return;
            }
        }
    }

    let mut state = state.borrow_mut();
    state.next_batch += 1;
    let batch = state.next_batch;
    state.batches.insert(
        batch,
        Batch {
            packet,
            outlet: out.clone(),
            size: submitted.len(),
            results: BTreeMap::new(),
            failures: Vec::new(),
        },
    );
    for (id, index) in submitted {
        state.pending.insert(id, Correlation::Item { batch, index });
    }
}

fn deliver(state: &Weak<RefCell<OffloadState>>, event: &QueueEvent) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let (id, outcome) = match event {
        QueueEvent::Result { id, value } => (*id, Ok(value.clone())),
        QueueEvent::Error { id, message } => (*id, Err(message.clone())),
        QueueEvent::Abandoned { id, reason } => {
            (*id, Err(format!("abandoned: {}", reason)))
        }
        QueueEvent::Drain => return,
    };

    // Release the borrow before sending: downstream may feed this adapter again.
    let delivery = {
        let mut state = state.borrow_mut();
        match state.pending.remove(&id) {
            None => None,
            Some(Correlation::Single { packet, outlet }) => {
                let packet = match outcome {
                    Ok(value) => packet.with_payload(value),
                    Err(message) => packet.with_error(message),
                };
                Some((outlet, packet))
            }
            Some(Correlation::Item { batch, index }) => {
                let complete = match state.batches.get_mut(&batch) {
                    Some(entry) => {
                        match outcome {
                            Ok(value) => {
                                entry.results.insert(index, value);
                            }
                            Err(message) => entry.failures.push((index, message)),
                        }
                        entry.is_complete()
                    }
                    None => false,
                };
                if complete {
                    state.batches.remove(&batch).map(Batch::finish)
                } else {
                    None
                }
            }
        }
    };

    if let Some((outlet, packet)) = delivery {
        outlet.send(packet);
    }
}
