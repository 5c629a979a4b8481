//! Compiled graph: pipe lookup, packet injection, listeners and lifecycle.
//!
//! A `Graph` owns every node it compiled plus the embedded graphs it was
//! spliced with. Connections between nodes are weak, so dropping the graph
//! tears the whole network down; dropping it also stops it.

use super::compiler::{CompileOptions, GraphCompiler, Line};
use super::diagnostic::Diagnostic;
use super::error::{GraphError, GraphResult};
use super::link::LinkRegistry;
use super::node::{Cleanup, Node, ProducerFn};
use super::packet::Packet;
use super::pipe::Pipe;
use crate::config::GraphSettings;
use crate::id::ListenerId;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::rc::Rc;

/// Pipe through which an embedded graph is entered.
pub const INPUT_PIPE: &str = "in";
/// Pipe through which an embedded graph is left.
pub const OUTPUT_PIPE: &str = "out";

pub(crate) struct ProducerBinding {
    pub node: Rc<Node>,
    pub producer: RefCell<ProducerFn>,
}

pub(crate) struct GraphParts {
    pub name: Option<String>,
    pub nodes: Vec<Rc<Node>>,
    pub pipes: BTreeMap<String, Rc<Node>>,
    pub producers: Vec<ProducerBinding>,
    pub children: Vec<Rc<Graph>>,
    pub edges: Vec<(usize, usize)>,
    pub diagnostics: Vec<Diagnostic>,
    pub links: LinkRegistry,
}

pub struct Graph {
    name: Option<String>,
    nodes: Vec<Rc<Node>>,
    pipes: BTreeMap<String, Rc<Node>>,
    producers: Vec<ProducerBinding>,
    children: Vec<Rc<Graph>>,
    edges: Vec<(usize, usize)>,
    diagnostics: Vec<Diagnostic>,
    links: LinkRegistry,
    running: Cell<bool>,
    /// Running parents this graph is embedded in.
    holders: Cell<usize>,
    cleanups: RefCell<Vec<Cleanup>>,
}

impl Graph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::default()
    }

    /// Compile lines with default options.
    pub fn compile(lines: impl IntoIterator<Item = Line>) -> GraphResult<Graph> {
        Self::builder().lines(lines).build()
    }

    pub(crate) fn from_parts(parts: GraphParts) -> Self {
        Self {
            name: parts.name,
            nodes: parts.nodes,
            pipes: parts.pipes,
            producers: parts.producers,
            children: parts.children,
            edges: parts.edges,
            diagnostics: parts.diagnostics,
            links: parts.links,
            running: Cell::new(false),
            holders: Cell::new(0),
            cleanups: RefCell::new(Vec::new()),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn pipe(&self, name: &str) -> Option<Pipe> {
        self.pipes.get(name).cloned().map(Pipe::new)
    }

    pub fn has_pipe(&self, name: &str) -> bool {
        self.pipes.contains_key(name)
    }

    /// Names of every pipe, sorted.
    pub fn pipe_names(&self) -> Vec<&str> {
        self.pipes.keys().map(String::as_str).collect()
    }

    /// Inject a packet into the named pipe.
    pub fn send(&self, pipe: &str, packet: Packet) -> GraphResult<()> {
        let node = self
            .pipes
            .get(pipe)
            .ok_or_else(|| GraphError::UnknownPipe(pipe.to_string()))?;
        node.receive(packet);
        Ok(())
    }

    /// Observe the named pipe.
    pub fn on<F>(&self, pipe: &str, listener: F) -> GraphResult<ListenerId>
    where
        F: FnMut(&Packet) + 'static,
    {
        self.pipe(pipe)
            .map(|p| p.on(listener))
            .ok_or_else(|| GraphError::UnknownPipe(pipe.to_string()))
    }

    /// Remove a listener from whichever pipe it was registered on.
    pub fn off(&self, id: ListenerId) -> bool {
        self.pipes.values().any(|node| node.unobserve(id))
    }

    pub fn input(&self) -> Option<Pipe> {
        self.pipe(INPUT_PIPE)
    }

    pub fn output(&self) -> Option<Pipe> {
        self.pipe(OUTPUT_PIPE)
    }

    pub(crate) fn input_node(&self) -> Option<Rc<Node>> {
        self.pipes.get(INPUT_PIPE).cloned()
    }

    pub(crate) fn output_node(&self) -> Option<Rc<Node>> {
        self.pipes.get(OUTPUT_PIPE).cloned()
    }

    /// Whether a packet entering `from` can reach `to` inside this graph.
    pub(crate) fn reaches(&self, from: usize, to: usize) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(key) = stack.pop() {
            if key == to {
                return true;
            }
            if !seen.insert(key) {
                continue;
            }
            stack.extend(
                self.edges
                    .iter()
                    .filter(|(f, _)| *f == key)
                    .map(|(_, t)| *t),
            );
        }
        false
    }

    /// Start embedded graphs, then every producer. Idempotent.
    pub fn start(&self) {
        if self.running.replace(true) {
            return;
        }
        for child in &self.children {
            child.acquire();
        }

        let mut cleanups = Vec::new();
        for binding in &self.producers {
            let outlet = binding.node.outlet();
            let mut guard = binding.producer.borrow_mut();
            let producer = &mut *guard;
            if let Some(cleanup) = producer(outlet) {
                cleanups.push(cleanup);
            }
        }

        // A listener may have stopped the graph while producers were emitting.
        if self.running.get() {
            self.cleanups.borrow_mut().extend(cleanups);
        } else {
            for cleanup in cleanups.into_iter().rev() {
                cleanup();
            }
        }
        tracing::debug!(
            graph = self.name().unwrap_or("graph"),
            "Graph started ({} producer(s))",
            self.producers.len()
        );
    }

    /// Run producer cleanups in reverse start order, then release embedded graphs.
    ///
    /// An embedded graph shared with another parent keeps running until the
    /// last running parent stops.
    pub fn stop(&self) {
        if !self.running.replace(false) {
            return;
        }
        let cleanups = std::mem::take(&mut *self.cleanups.borrow_mut());
        for cleanup in cleanups.into_iter().rev() {
            cleanup();
        }
        for child in self.children.iter().rev() {
            child.release();
        }
        tracing::debug!(graph = self.name().unwrap_or("graph"), "Graph stopped");
    }

    fn acquire(&self) {
        self.holders.set(self.holders.get() + 1);
        self.start();
    }

    fn release(&self) {
        let holders = self.holders.get().saturating_sub(1);
        self.holders.set(holders);
        if holders == 0 {
            self.stop();
        } else {
            tracing::debug!(
                graph = self.name().unwrap_or("graph"),
                "Embedded graph still held by {} parent(s)",
                holders
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Warnings and skipped-line errors collected during compilation.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn producer_count(&self) -> usize {
        self.producers.len()
    }

    pub fn embedded_count(&self) -> usize {
        self.children.len()
    }

    pub fn links(&self) -> &LinkRegistry {
        &self.links
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("name", &self.name)
            .field("nodes", &self.nodes.len())
            .field("pipes", &self.pipe_names())
            .field("producers", &self.producers.len())
            .field("embedded", &self.children.len())
            .field("running", &self.running.get())
            .finish()
    }
}

/// Collects lines and options, then compiles them in one go.
#[derive(Default)]
pub struct GraphBuilder {
    options: CompileOptions,
    links: Option<LinkRegistry>,
    lines: Vec<Line>,
}

impl GraphBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.options.strict = strict;
        self
    }

    pub fn settings(mut self, settings: &GraphSettings) -> Self {
        self.options.strict = settings.strict;
        self
    }

    /// Link registry shared with other graphs. A private one is used otherwise.
    pub fn links(mut self, links: LinkRegistry) -> Self {
        self.links = Some(links);
        self
    }

    pub fn line(mut self, line: Line) -> Self {
        self.lines.push(line);
        self
    }

    pub fn lines(mut self, lines: impl IntoIterator<Item = Line>) -> Self {
        self.lines.extend(lines);
        self
    }

    pub fn build(self) -> GraphResult<Graph> {
        let mut compiler = GraphCompiler::new(self.options, self.links.unwrap_or_default());
        for (index, line) in self.lines.into_iter().enumerate() {
            compiler.add_line(index, line);
        }
        compiler.finish()
    }
}
