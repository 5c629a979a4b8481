//! Node abstraction for the graph.
//!
//! Two layers:
//! - **`Motion` / `Producer`** are what callers hand to the compiler: either a
//!   ready processor or a factory that builds one from a configuration object.
//!   The kind is an explicit tag, never guessed from the closure.
//! - **`Node`** is the compiled, runtime form. Its body is an enum (`Pipe`,
//!   `Motion`, `Source`) so the hot dispatch path is a plain `match`.
//!
//! Dispatch is synchronous and depth-first: `send` calls `receive` on every
//! destination in connection order before returning.

use crate::graph::packet::{empty_config, Config, Packet};
use crate::id::{ListenerId, NodeId};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// Per-packet processing function: may call `outlet.send` zero or more times.
pub type Processor = Box<dyn FnMut(&Outlet, Packet)>;

/// Action run when a graph stops.
pub type Cleanup = Box<dyn FnOnce()>;

/// Producer function: invoked on graph start with the outlet it feeds.
pub type ProducerFn = Box<dyn FnMut(Outlet) -> Option<Cleanup>>;

pub type MotionFactory = Box<dyn FnOnce(&Config) -> Processor>;
pub type ProducerFactory = Box<dyn FnOnce(&Config) -> ProducerFn>;

/// External observer of a pipe.
pub(crate) type Observer = Rc<RefCell<dyn FnMut(&Packet)>>;

/// A transform, sink, or any other per-packet step of a line.
pub enum Motion {
    /// Ready-to-run processor, used as-is.
    Processor(Processor),
    /// Factory invoked once at compile time to obtain the processor.
    Factory {
        build: MotionFactory,
        /// Pre-configuration. `None` means auto-configuration with `{}`.
        config: Option<Config>,
    },
}

impl Motion {
    pub fn processor<F>(f: F) -> Self
    where
        F: FnMut(&Outlet, Packet) + 'static,
    {
        Motion::Processor(Box::new(f))
    }

    pub fn factory<F, P>(build: F) -> Self
    where
        F: FnOnce(&Config) -> P + 'static,
        P: FnMut(&Outlet, Packet) + 'static,
    {
        Motion::Factory {
            build: Box::new(move |config| Box::new(build(config)) as Processor),
            config: None,
        }
    }

    /// Supply the configuration a factory is built with.
    pub fn configure(self, config: Config) -> Self {
        match self {
            Motion::Factory { build, .. } => Motion::Factory {
                build,
                config: Some(config),
            },
            processor => {
                tracing::debug!("Configuration ignored: motion is already a processor");
                processor
            }
        }
    }

    pub fn is_factory(&self) -> bool {
        matches!(self, Motion::Factory { .. })
    }

    /// Turn this motion into its runtime processor.
    pub fn resolve(self) -> Processor {
        match self {
            Motion::Processor(p) => p,
            Motion::Factory { build, config } => {
                let config = config.unwrap_or_else(empty_config);
                build(&config)
            }
        }
    }
}

impl fmt::Debug for Motion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Motion::Processor(_) => write!(f, "Motion::Processor"),
            Motion::Factory { config, .. } => f
                .debug_struct("Motion::Factory")
                .field("config", config)
                .finish(),
        }
    }
}

/// A packet source activated when the graph starts.
pub enum Producer {
    Func(ProducerFn),
    Factory {
        build: ProducerFactory,
        config: Option<Config>,
    },
}

impl Producer {
    pub fn new<F>(f: F) -> Self
    where
        F: FnMut(Outlet) -> Option<Cleanup> + 'static,
    {
        Producer::Func(Box::new(f))
    }

    pub fn factory<F, P>(build: F) -> Self
    where
        F: FnOnce(&Config) -> P + 'static,
        P: FnMut(Outlet) -> Option<Cleanup> + 'static,
    {
        Producer::Factory {
            build: Box::new(move |config| Box::new(build(config)) as ProducerFn),
            config: None,
        }
    }

    pub fn configure(self, config: Config) -> Self {
        match self {
            Producer::Factory { build, .. } => Producer::Factory {
                build,
                config: Some(config),
            },
            func => {
                tracing::debug!("Configuration ignored: producer is already a function");
                func
            }
        }
    }

    pub fn is_factory(&self) -> bool {
        matches!(self, Producer::Factory { .. })
    }

    pub fn resolve(self) -> ProducerFn {
        match self {
            Producer::Func(f) => f,
            Producer::Factory { build, config } => {
                let config = config.unwrap_or_else(empty_config);
                build(&config)
            }
        }
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Producer::Func(_) => write!(f, "Producer::Func"),
            Producer::Factory { config, .. } => f
                .debug_struct("Producer::Factory")
                .field("config", config)
                .finish(),
        }
    }
}

/// The `send` capability handed to processors and producers.
///
/// Holds only a weak reference: an outlet never keeps a graph alive, and
/// sending through one whose graph is gone does nothing.
#[derive(Clone)]
pub struct Outlet {
    node: Weak<Node>,
}

impl Outlet {
    /// Forward a packet to every destination of the owning node.
    pub fn send(&self, packet: Packet) {
        if let Some(node) = self.node.upgrade() {
            node.send(packet);
        }
    }

    /// Whether the owning node is still alive.
    pub fn is_attached(&self) -> bool {
        self.node.strong_count() > 0
    }

    /// An outlet connected to nothing.
    pub fn detached() -> Self {
        Self { node: Weak::new() }
    }
}

impl fmt::Debug for Outlet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node.upgrade() {
            Some(node) => write!(f, "Outlet({})", node.label()),
            None => write!(f, "Outlet(detached)"),
        }
    }
}

pub(crate) enum NodeBody {
    /// Named checkpoint: notifies observers, then forwards unchanged.
    Pipe {
        name: String,
        observers: RefCell<Vec<(ListenerId, Observer)>>,
    },
    /// Transform or sink.
    Motion(RefCell<Processor>),
    /// Entry point of a producer; relays whatever it is given.
    Source,
}

/// Runtime form of a graph element.
pub struct Node {
    id: NodeId,
    label: String,
    body: NodeBody,
    outputs: RefCell<Vec<Weak<Node>>>,
    this: Weak<Node>,
}

impl Node {
    fn build(id: NodeId, label: String, body: NodeBody) -> Rc<Self> {
        Rc::new_cyclic(|this| Node {
            id,
            label,
            body,
            outputs: RefCell::new(Vec::new()),
            this: this.clone(),
        })
    }

    pub(crate) fn pipe(id: NodeId, name: &str) -> Rc<Self> {
        Self::build(
            id,
            format!("pipe:{}", name),
            NodeBody::Pipe {
                name: name.to_string(),
                observers: RefCell::new(Vec::new()),
            },
        )
    }

    pub(crate) fn motion(id: NodeId, label: String, processor: Processor) -> Rc<Self> {
        Self::build(id, label, NodeBody::Motion(RefCell::new(processor)))
    }

    pub(crate) fn source(id: NodeId, label: String) -> Rc<Self> {
        Self::build(id, label, NodeBody::Source)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pipe_name(&self) -> Option<&str> {
        match &self.body {
            NodeBody::Pipe { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn is_pipe(&self) -> bool {
        matches!(self.body, NodeBody::Pipe { .. })
    }

    /// Number of live downstream connections.
    pub fn output_count(&self) -> usize {
        self.outputs
            .borrow()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn outlet(&self) -> Outlet {
        Outlet {
            node: self.this.clone(),
        }
    }

    /// Add `to` as a destination. Returns `false` if it already was one.
    pub(crate) fn connect(&self, to: &Rc<Node>) -> bool {
        let mut outputs = self.outputs.borrow_mut();
        if outputs.iter().any(|w| std::ptr::eq(w.as_ptr(), Rc::as_ptr(to))) {
            return false;
        }
        outputs.push(Rc::downgrade(to));
        true
    }

    /// Entry point: run this node's body on `packet`.
    pub fn receive(&self, packet: Packet) {
        match &self.body {
            NodeBody::Pipe { observers, .. } => {
                let snapshot: Vec<Observer> =
                    observers.borrow().iter().map(|(_, o)| o.clone()).collect();
                for observer in snapshot {
                    match observer.try_borrow_mut() {
                        Ok(mut guard) => {
                            let f = &mut *guard;
                            f(&packet);
                        }
                        Err(_) => {
                            tracing::warn!(node = %self.label, "Observer re-entered, packet not observed")
                        }
                    }
                }
                self.send(packet);
            }
            NodeBody::Motion(processor) => match processor.try_borrow_mut() {
                Ok(mut guard) => {
                    let outlet = self.outlet();
                    let f = &mut *guard;
                    f(&outlet, packet);
                }
                Err(_) => {
                    tracing::warn!(node = %self.label, "Motion re-entered while running, packet dropped")
                }
            },
            NodeBody::Source => self.send(packet),
        }
    }

    /// Fan a packet out to every destination, in connection order.
    pub(crate) fn send(&self, packet: Packet) {
        let targets: Vec<Rc<Node>> = self
            .outputs
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        let Some((last, rest)) = targets.split_last() else {
            return;
        };
        for target in rest {
            target.receive(packet.clone());
        }
        last.receive(packet);
    }

    /// Register an observer. Returns `None` if this node is not a pipe.
    pub(crate) fn observe(&self, observer: Observer) -> Option<ListenerId> {
        match &self.body {
            NodeBody::Pipe { observers, .. } => {
                let id = ListenerId::next();
                observers.borrow_mut().push((id, observer));
                Some(id)
            }
            _ => None,
        }
    }

    pub(crate) fn unobserve(&self, id: ListenerId) -> bool {
        match &self.body {
            NodeBody::Pipe { observers, .. } => {
                let mut observers = observers.borrow_mut();
                let before = observers.len();
                observers.retain(|(lid, _)| *lid != id);
                observers.len() != before
            }
            _ => false,
        }
    }

    pub(crate) fn observer_count(&self) -> usize {
        match &self.body {
            NodeBody::Pipe { observers, .. } => observers.borrow().len(),
            _ => 0,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("outputs", &self.output_count())
            .finish()
    }
}
