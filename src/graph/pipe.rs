use crate::graph::node::Node;
use crate::graph::packet::Packet;
use crate::id::ListenerId;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Handle to a named pipe of a compiled graph.
///
/// Cloning the handle does not clone the pipe; every clone refers to the same
/// checkpoint.
#[derive(Clone)]
pub struct Pipe {
    node: Rc<Node>,
}

impl Pipe {
    /// Only pipe nodes are ever wrapped.
    pub(crate) fn new(node: Rc<Node>) -> Self {
        debug_assert!(node.is_pipe());
        Self { node }
    }

    pub fn name(&self) -> &str {
        self.node.pipe_name().unwrap_or_default()
    }

    /// Inject a packet. Observers see it first, then it flows downstream.
    pub fn send(&self, packet: Packet) {
        self.node.receive(packet);
    }

    /// Observe every packet passing through this pipe.
    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: FnMut(&Packet) + 'static,
    {
        match self.node.observe(Rc::new(RefCell::new(listener))) {
            Some(id) => id,
            None => unreachable!("pipe handle wraps a non-pipe node"),
        }
    }

    /// Remove a listener. Returns `false` if it was not registered here.
    pub fn off(&self, id: ListenerId) -> bool {
        self.node.unobserve(id)
    }

    pub fn listener_count(&self) -> usize {
        self.node.observer_count()
    }

    /// Whether two handles refer to the same pipe.
    pub fn ptr_eq(&self, other: &Pipe) -> bool {
        Rc::ptr_eq(&self.node, &other.node)
    }
}

impl fmt::Debug for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pipe({:?})", self.name())
    }
}
