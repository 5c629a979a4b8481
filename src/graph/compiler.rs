use super::diagnostic::{Diagnostic, DiagnosticKind};
use super::error::{GraphError, GraphResult};
use super::link::LinkRegistry;
use super::node::{Motion, Node, Producer};
use super::runtime::{Graph, GraphParts, ProducerBinding, INPUT_PIPE, OUTPUT_PIPE};
use crate::id::NodeId;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;

/// One position in a graph line.
pub enum Element {
    /// Named checkpoint, created on first reference and shared afterwards.
    Pipe(String),
    /// Transform in the interior, or a terminal sink in the last position.
    Motion(Motion),
    /// Packet source; only valid in the first position.
    Producer(Producer),
    /// Embedded graph, entered through its `in` pipe and left through `out`.
    /// The same graph may be embedded in several parents; it is started with
    /// the first of them and stopped with the last.
    Graph(Rc<Graph>),
    /// Every branch receives the same incoming packet.
    Parallel(Vec<Element>),
    /// Each step's output feeds the next step.
    Series(Vec<Element>),
}

/// `[source, transforms..., destination]`
pub type Line = Vec<Element>;

impl Element {
    /// Human-readable kind, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Element::Pipe(_) => "pipe",
            Element::Motion(_) => "motion",
            Element::Producer(_) => "producer",
            Element::Graph(_) => "graph",
            Element::Parallel(_) => "parallel block",
            Element::Series(_) => "series block",
        }
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::Pipe(name) => write!(f, "Pipe({:?})", name),
            Element::Motion(m) => fmt::Debug::fmt(m, f),
            Element::Producer(p) => fmt::Debug::fmt(p, f),
            Element::Graph(g) => write!(f, "Graph({:?})", g.name()),
            Element::Parallel(items) => f.debug_tuple("Parallel").field(items).finish(),
            Element::Series(items) => f.debug_tuple("Series").field(items).finish(),
        }
    }
}

impl From<&str> for Element {
    fn from(name: &str) -> Self {
        Element::Pipe(name.to_string())
    }
}

impl From<String> for Element {
    fn from(name: String) -> Self {
        Element::Pipe(name)
    }
}

impl From<Motion> for Element {
    fn from(motion: Motion) -> Self {
        Element::Motion(motion)
    }
}

impl From<Producer> for Element {
    fn from(producer: Producer) -> Self {
        Element::Producer(producer)
    }
}

impl From<Rc<Graph>> for Element {
    fn from(graph: Rc<Graph>) -> Self {
        Element::Graph(graph)
    }
}

impl From<Graph> for Element {
    fn from(graph: Graph) -> Self {
        Element::Graph(Rc::new(graph))
    }
}

/// A bracketed list is a parallel block.
impl From<Vec<Element>> for Element {
    fn from(items: Vec<Element>) -> Self {
        Element::Parallel(items)
    }
}

pub fn parallel(items: impl IntoIterator<Item = Element>) -> Element {
    Element::Parallel(items.into_iter().collect())
}

pub fn series(items: impl IntoIterator<Item = Element>) -> Element {
    Element::Series(items.into_iter().collect())
}

/// Build a graph line from anything convertible into an [`Element`].
///
/// ```ignore
/// let line = wire!["in", double, parallel!["a", "b"], "out"];
/// ```
#[macro_export]
macro_rules! wire {
    ($($element:expr),* $(,)?) => {
        vec![$($crate::graph::Element::from($element)),*]
    };
}

/// Build a parallel block from anything convertible into an [`Element`].
#[macro_export]
macro_rules! parallel {
    ($($element:expr),* $(,)?) => {
        $crate::graph::Element::Parallel(vec![$($crate::graph::Element::from($element)),*])
    };
}

/// Options controlling how lines are compiled.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Fail compilation on the first invalid line instead of skipping it.
    pub strict: bool,
    /// Name used in logs.
    pub name: Option<String>,
}

/// Wires graph lines into a connected network of nodes and pipes.
pub struct GraphCompiler {
    options: CompileOptions,
    links: LinkRegistry,
    nodes: Vec<Rc<Node>>,
    pipes: BTreeMap<String, Rc<Node>>,
    producers: Vec<ProducerBinding>,
    children: Vec<Rc<Graph>>,
    edges: Vec<(usize, usize)>,
    diagnostics: Vec<Diagnostic>,
}

/// Address of a node, stable for its lifetime. Used as the key in edge lists
/// so that nodes of embedded graphs can share one table.
pub(crate) fn node_key(node: &Rc<Node>) -> usize {
    Rc::as_ptr(node) as *const () as usize
}

impl GraphCompiler {
    pub fn new(options: CompileOptions, links: LinkRegistry) -> Self {
        Self {
            options,
            links,
            nodes: Vec::new(),
            pipes: BTreeMap::new(),
            producers: Vec::new(),
            children: Vec::new(),
            edges: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Record a finding produced outside the compiler (e.g. while reading a document).
    pub fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Validate and wire one line. Lines with errors are skipped entirely.
    pub fn add_line(&mut self, index: usize, line: Line) {
        let findings = validate_line(index, &line);
        let rejected = findings.iter().any(Diagnostic::is_error);
        self.diagnostics.extend(findings);
        if rejected {
            return;
        }

        let mut interior: VecDeque<Element> = line.into();
        let (Some(source), Some(destination)) = (interior.pop_front(), interior.pop_back())
        else {
            return;
        };

        let Some(entry) = self.resolve_source(index, source) else {
            return;
        };
        let mut motion_count = 0;
        let mut exits = vec![entry];
        for element in interior {
            exits = self.compile_element(index, exits, element, &mut motion_count);
        }
        if let Some(target) = self.resolve_destination(index, destination) {
            for exit in &exits {
                self.connect(exit, &target);
            }
        }
    }

    /// Finish compilation: enforce strictness, reject cycles, hand back the graph.
    pub fn finish(self) -> GraphResult<Graph> {
        let graph_name = self.options.name.as_deref().unwrap_or("graph");

        if self.options.strict && self.diagnostics.iter().any(Diagnostic::is_error) {
            return Err(GraphError::InvalidLines(
                self.diagnostics.into_iter().filter(Diagnostic::is_error).collect(),
            ));
        }

        for diagnostic in &self.diagnostics {
            tracing::warn!(graph = graph_name, "{}", diagnostic);
        }

        if let Some(cycle) = self.find_cycle() {
            tracing::warn!(
                graph = graph_name,
                "Graph has a cycle through {} node(s)",
                cycle.len()
            );
            return Err(GraphError::CycleDetected(cycle));
        }

        let skipped: HashSet<usize> = self
            .diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| d.line)
            .collect();
        tracing::info!(
            graph = graph_name,
            "Graph compiled: {} nodes, {} pipes, {} producers, {} line(s) skipped",
            self.nodes.len(),
            self.pipes.len(),
            self.producers.len(),
            skipped.len(),
        );

        Ok(Graph::from_parts(GraphParts {
            name: self.options.name,
            nodes: self.nodes,
            pipes: self.pipes,
            producers: self.producers,
            children: self.children,
            edges: self.edges,
            diagnostics: self.diagnostics,
            links: self.links,
        }))
    }

    fn next_id(&self) -> NodeId {
        NodeId(self.nodes.len() as u32)
    }

    fn pipe(&mut self, name: &str) -> Rc<Node> {
        if let Some(existing) = self.pipes.get(name) {
            return existing.clone();
        }
        let node = Node::pipe(self.next_id(), name);
        self.nodes.push(node.clone());
        self.pipes.insert(name.to_string(), node.clone());
        node
    }

    fn motion_node(&mut self, label: String, motion: Motion) -> Rc<Node> {
        let node = Node::motion(self.next_id(), label, motion.resolve());
        self.nodes.push(node.clone());
        node
    }

    fn connect(&mut self, from: &Rc<Node>, to: &Rc<Node>) {
        if from.connect(to) {
            self.edges.push((node_key(from), node_key(to)));
        }
    }

    /// Keep an embedded graph alive and account for its internal path.
    fn adopt(&mut self, graph: &Rc<Graph>) {
        if self.children.iter().any(|g| Rc::ptr_eq(g, graph)) {
            return;
        }
        if let (Some(input), Some(output)) = (graph.input_node(), graph.output_node()) {
            let (from, to) = (node_key(&input), node_key(&output));
            if graph.reaches(from, to) {
                self.edges.push((from, to));
            }
        }
        self.children.push(graph.clone());
    }

    fn resolve_source(&mut self, index: usize, source: Element) -> Option<Rc<Node>> {
        match source {
            Element::Pipe(name) => Some(self.pipe(&name)),
            Element::Producer(producer) => {
                let node = Node::source(self.next_id(), format!("line {} producer", index));
                self.nodes.push(node.clone());
                self.producers.push(ProducerBinding {
                    node: node.clone(),
                    producer: RefCell::new(producer.resolve()),
                });
                Some(node)
            }
            Element::Graph(graph) => {
                self.adopt(&graph);
                graph.output_node()
            }
            _ => None,
        }
    }

    fn resolve_destination(&mut self, index: usize, destination: Element) -> Option<Rc<Node>> {
        match destination {
            Element::Pipe(name) => Some(self.pipe(&name)),
            Element::Motion(motion) => {
                Some(self.motion_node(format!("line {} sink", index), motion))
            }
            Element::Graph(graph) => {
                self.adopt(&graph);
                graph.input_node()
            }
            _ => None,
        }
    }

    /// Wire `element` after `entries`; returns the nodes the next step connects from.
    fn compile_element(
        &mut self,
        index: usize,
        entries: Vec<Rc<Node>>,
        element: Element,
        motion_count: &mut usize,
    ) -> Vec<Rc<Node>> {
        match element {
            Element::Pipe(name) => {
                let pipe = self.pipe(&name);
                for entry in &entries {
                    self.connect(entry, &pipe);
                }
                vec![pipe]
            }
            Element::Motion(motion) => {
                *motion_count += 1;
                let label = format!("line {} motion {}", index, motion_count);
                let node = self.motion_node(label, motion);
                for entry in &entries {
                    self.connect(entry, &node);
                }
                vec![node]
            }
            Element::Graph(graph) => {
                self.adopt(&graph);
                let (Some(input), Some(output)) = (graph.input_node(), graph.output_node())
                else {
                    return entries;
                };
                for entry in &entries {
                    self.connect(entry, &input);
                }
                vec![output]
            }
            Element::Parallel(branches) => {
                let mut exits = Vec::new();
                for branch in branches {
                    exits.extend(self.compile_element(index, entries.clone(), branch, motion_count));
                }
                exits
            }
            Element::Series(steps) => {
                let mut exits = entries;
                for step in steps {
                    exits = self.compile_element(index, exits, step, motion_count);
                }
                exits
            }
            // Rejected by validation.
            Element::Producer(_) => entries,
        }
    }

    fn labels(&self) -> HashMap<usize, String> {
        let mut labels: HashMap<usize, String> = self
            .nodes
            .iter()
            .map(|n| (node_key(n), n.label().to_string()))
            .collect();
        for child in &self.children {
            let prefix = child.name().unwrap_or("embedded");
            for node in [child.input_node(), child.output_node()].into_iter().flatten() {
                labels
                    .entry(node_key(&node))
                    .or_insert_with(|| format!("{}/{}", prefix, node.label()));
            }
        }
        labels
    }

    /// Kahn's algorithm over the recorded edges. Returns one cycle, if any.
    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut index_of: HashMap<usize, usize> = HashMap::new();
        let mut keys: Vec<usize> = Vec::new();
        for &(from, to) in &self.edges {
            for key in [from, to] {
                index_of.entry(key).or_insert_with(|| {
                    keys.push(key);
                    keys.len() - 1
                });
            }
        }

        let n = keys.len();
        let mut fwd_adj = vec![Vec::new(); n];
        let mut bwd_adj = vec![Vec::new(); n];
        let mut in_degree = vec![0usize; n];
        for &(from, to) in &self.edges {
            let (f, t) = (index_of[&from], index_of[&to]);
            fwd_adj[f].push(t);
            bwd_adj[t].push(f);
            in_degree[t] += 1;
        }

        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut scheduled = vec![false; n];
        while let Some(node) = queue.pop_front() {
            scheduled[node] = true;
            for &next in &fwd_adj[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        // Every unscheduled node has an unscheduled predecessor, so walking
        // predecessors from any of them must revisit a node.
        let start = (0..n).find(|&i| !scheduled[i])?;
        let mut path = vec![start];
        let mut position: HashMap<usize, usize> = HashMap::from([(start, 0)]);
        let mut current = start;
        loop {
            let prev = *bwd_adj[current].iter().find(|&&p| !scheduled[p])?;
            if let Some(&at) = position.get(&prev) {
                let labels = self.labels();
                let mut cycle: Vec<String> = path[at..]
                    .iter()
                    .rev()
                    .map(|&i| {
                        labels
                            .get(&keys[i])
                            .cloned()
                            .unwrap_or_else(|| "<node>".to_string())
                    })
                    .collect();
                if let Some(first) = cycle.first().cloned() {
                    cycle.push(first);
                }
                return Some(cycle);
            }
            position.insert(prev, path.len());
            path.push(prev);
            current = prev;
        }
    }
}

fn validate_line(index: usize, line: &[Element]) -> Vec<Diagnostic> {
    let mut findings = Vec::new();
    if line.len() < 2 {
        findings.push(Diagnostic::error(
            index,
            DiagnosticKind::TooShort { len: line.len() },
        ));
        return findings;
    }

    match &line[0] {
        Element::Pipe(name) if name.is_empty() => {
            findings.push(Diagnostic::error(index, DiagnosticKind::EmptyPipeName))
        }
        Element::Pipe(_) | Element::Producer(_) => {}
        Element::Graph(graph) => {
            if graph.output_node().is_none() {
                findings.push(Diagnostic::error(
                    index,
                    DiagnosticKind::MissingGraphPipe { pipe: OUTPUT_PIPE },
                ));
            }
        }
        other => findings.push(Diagnostic::error(
            index,
            DiagnosticKind::InvalidSource { found: other.kind() },
        )),
    }

    match &line[line.len() - 1] {
        Element::Pipe(name) if name.is_empty() => {
            findings.push(Diagnostic::error(index, DiagnosticKind::EmptyPipeName))
        }
        Element::Pipe(_) => {}
        Element::Motion(_) => findings.push(Diagnostic::warning(index, DiagnosticKind::UnnamedSink)),
        Element::Graph(graph) => {
            if graph.input_node().is_none() {
                findings.push(Diagnostic::error(
                    index,
                    DiagnosticKind::MissingGraphPipe { pipe: INPUT_PIPE },
                ));
            }
        }
        other => findings.push(Diagnostic::error(
            index,
            DiagnosticKind::InvalidDestination { found: other.kind() },
        )),
    }

    for element in &line[1..line.len() - 1] {
        validate_interior(index, element, &mut findings);
    }
    findings
}

fn validate_interior(index: usize, element: &Element, findings: &mut Vec<Diagnostic>) {
    match element {
        Element::Pipe(name) if name.is_empty() => {
            findings.push(Diagnostic::error(index, DiagnosticKind::EmptyPipeName))
        }
        Element::Pipe(_) | Element::Motion(_) => {}
        Element::Producer(_) => {
            findings.push(Diagnostic::error(index, DiagnosticKind::ProducerInTransform))
        }
        Element::Graph(graph) => {
            for (pipe, node) in [
                (INPUT_PIPE, graph.input_node()),
                (OUTPUT_PIPE, graph.output_node()),
            ] {
                if node.is_none() {
                    findings.push(Diagnostic::error(
                        index,
                        DiagnosticKind::MissingGraphPipe { pipe },
                    ));
                }
            }
        }
        Element::Parallel(items) | Element::Series(items) => {
            if items.is_empty() {
                findings.push(Diagnostic::error(
                    index,
                    DiagnosticKind::EmptyBlock {
                        found: element.kind(),
                    },
                ));
            }
            for item in items {
                validate_interior(index, item, findings);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::diagnostic::Severity;
    use crate::graph::motions::{collect, map, sink};
    use crate::graph::node::Outlet;
    use crate::graph::packet::{Config, Packet};
    use serde_json::json;

    fn add(n: i64) -> Motion {
        map(move |p: Packet| {
            let v = p.payload().as_i64().unwrap_or(0);
            p.with_payload(v + n)
        })
    }

    fn compile(lines: Vec<Line>) -> GraphResult<Graph> {
        let mut compiler = GraphCompiler::new(CompileOptions::default(), LinkRegistry::new());
        for (i, line) in lines.into_iter().enumerate() {
            compiler.add_line(i, line);
        }
        compiler.finish()
    }

    #[test]
    fn test_direct_connection() {
        let (out, seen) = collect();
        let graph = compile(vec![wire!["in", "out"], wire!["out", out]]).unwrap();
        graph.send("in", Packet::new(1)).unwrap();
        assert_eq!(seen.payloads(), vec![json!(1)]);
    }

    #[test]
    fn test_series_composes_left_to_right() {
        let double = map(|p: Packet| {
            let v = p.payload().as_i64().unwrap_or(0);
            p.with_payload(v * 2)
        });
        let (out, seen) = collect();
        let graph = compile(vec![wire!["in", add(1), double, add(3), out]]).unwrap();
        graph.send("in", Packet::new(5)).unwrap();
        // ((5 + 1) * 2) + 3
        assert_eq!(seen.payloads(), vec![json!(15)]);
    }

    #[test]
    fn test_parallel_block_fans_out() {
        let (out, seen) = collect();
        let graph = compile(vec![
            wire!["in", parallel![add(1), add(2), add(3)], "out"],
            wire!["out", out],
        ])
        .unwrap();
        graph.send("in", Packet::new(10)).unwrap();
        assert_eq!(seen.payloads(), vec![json!(11), json!(12), json!(13)]);
    }

    #[test]
    fn test_parallel_block_nested_in_series() {
        let (out, seen) = collect();
        let graph = compile(vec![wire![
            "in",
            add(1),
            parallel![add(10), add(20)],
            add(100),
            out
        ]])
        .unwrap();
        graph.send("in", Packet::new(0)).unwrap();
        assert_eq!(seen.payloads(), vec![json!(111), json!(121)]);
    }

    #[test]
    fn test_series_inside_parallel_branch() {
        let (out, seen) = collect();
        let graph = compile(vec![wire![
            "in",
            parallel![Element::Series(vec![add(1).into(), add(1).into()]), add(5)],
            out
        ]])
        .unwrap();
        graph.send("in", Packet::new(0)).unwrap();
        assert_eq!(seen.payloads(), vec![json!(2), json!(5)]);
    }

    #[test]
    fn test_dropping_branch_does_not_affect_siblings() {
        let (out, seen) = collect();
        let drop_all = Motion::processor(|_: &Outlet, _: Packet| {});
        let graph = compile(vec![wire!["in", parallel![drop_all, add(1)], out]]).unwrap();
        graph.send("in", Packet::new(1)).unwrap();
        assert_eq!(seen.payloads(), vec![json!(2)]);
    }

    #[test]
    fn test_same_pipe_name_is_same_pipe() {
        let graph = compile(vec![wire!["a", "b"], wire!["c", "a"]]).unwrap();
        let first = graph.pipe("a").unwrap();
        let again = graph.pipe("a").unwrap();
        assert!(first.ptr_eq(&again));
        assert_eq!(graph.pipe_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_interior_pipe_is_a_checkpoint() {
        let graph = compile(vec![wire!["in", add(1), "mid", add(1), "out"]]).unwrap();
        let mid = Rc::new(RefCell::new(Vec::new()));
        let seen = mid.clone();
        graph
            .on("mid", move |p: &Packet| seen.borrow_mut().push(p.payload().clone()))
            .unwrap();
        graph.send("in", Packet::new(0)).unwrap();
        assert_eq!(*mid.borrow(), vec![json!(1)]);
    }

    #[test]
    fn test_malformed_lines_are_skipped_with_diagnostics() {
        let graph = compile(vec![
            wire!["only"],
            wire![add(1), "out"],
            wire!["in", Producer::new(|_| None), "out"],
            wire!["in", Element::Parallel(vec![]), "out"],
            wire!["in", "out"],
        ])
        .unwrap();

        let errors: Vec<_> = graph
            .diagnostics()
            .iter()
            .filter(|d| d.is_error())
            .map(|d| (d.line, d.kind.clone()))
            .collect();
        assert_eq!(
            errors,
            vec![
                (0, DiagnosticKind::TooShort { len: 1 }),
                (1, DiagnosticKind::InvalidSource { found: "motion" }),
                (2, DiagnosticKind::ProducerInTransform),
                (3, DiagnosticKind::EmptyBlock { found: "parallel block" }),
            ]
        );
        // Only the last line was wired.
        assert_eq!(graph.pipe_names(), vec!["in", "out"]);
    }

    #[test]
    fn test_strict_mode_rejects_invalid_lines() {
        let mut compiler = GraphCompiler::new(
            CompileOptions {
                strict: true,
                name: Some("strict".into()),
            },
            LinkRegistry::new(),
        );
        compiler.add_line(0, wire!["in", "out"]);
        compiler.add_line(1, wire!["lonely"]);
        match compiler.finish() {
            Err(GraphError::InvalidLines(diags)) => {
                assert_eq!(diags.len(), 1);
                assert_eq!(diags[0].line, 1);
            }
            other => panic!("expected InvalidLines, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_sink_destination_warns() {
        let graph = compile(vec![wire!["in", sink(|_| {})]]).unwrap();
        assert_eq!(graph.diagnostics().len(), 1);
        assert_eq!(graph.diagnostics()[0].severity, Severity::Warning);
        assert_eq!(graph.diagnostics()[0].kind, DiagnosticKind::UnnamedSink);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let result = compile(vec![wire!["a", add(1), "b"], wire!["b", "a"]]);
        match result {
            Err(GraphError::CycleDetected(path)) => {
                assert!(path.contains(&"pipe:a".to_string()));
                assert!(path.contains(&"pipe:b".to_string()));
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected CycleDetected, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_self_loop_is_rejected() {
        assert!(matches!(
            compile(vec![wire!["a", "a"]]),
            Err(GraphError::CycleDetected(_))
        ));
    }

    #[test]
    fn test_embedded_graph_splices_in_and_out() {
        let inner = Rc::new(compile(vec![wire!["in", add(100), "out"]]).unwrap());
        let (out, seen) = collect();
        let graph = compile(vec![wire!["start", inner.clone(), out]]).unwrap();
        graph.send("start", Packet::new(1)).unwrap();
        assert_eq!(seen.payloads(), vec![json!(101)]);
        assert_eq!(graph.embedded_count(), 1);
    }

    #[test]
    fn test_embedded_graph_as_source_and_destination() {
        let inner = Rc::new(compile(vec![wire!["in", add(1), "out"]]).unwrap());
        let (out, seen) = collect();
        let graph = compile(vec![
            wire!["start", inner.clone()],
            wire![inner.clone(), out],
        ])
        .unwrap();
        graph.send("start", Packet::new(1)).unwrap();
        assert_eq!(seen.payloads(), vec![json!(2)]);
    }

    #[test]
    fn test_cycle_through_embedded_graph_is_rejected() {
        let inner = Rc::new(compile(vec![wire!["in", add(1), "out"]]).unwrap());
        let result = compile(vec![wire![inner.clone(), inner.clone()]]);
        assert!(matches!(result, Err(GraphError::CycleDetected(_))));
    }

    #[test]
    fn test_embedded_graph_without_out_is_diagnosed() {
        let inner = Rc::new(compile(vec![wire!["in", sink(|_| {})]]).unwrap());
        let graph = compile(vec![wire![inner, "x"]]).unwrap();
        assert!(graph.diagnostics().iter().any(|d| d.kind
            == DiagnosticKind::MissingGraphPipe { pipe: OUTPUT_PIPE }));
    }

    #[test]
    fn test_factory_is_auto_configured_once() {
        let builds = Rc::new(RefCell::new(Vec::new()));
        let record = builds.clone();
        let factory = Motion::factory(move |config: &Config| {
            record.borrow_mut().push(config.clone());
            |out: &Outlet, p: Packet| out.send(p)
        });
        let _graph = compile(vec![wire!["in", factory, "out"]]).unwrap();
        assert_eq!(*builds.borrow(), vec![json!({})]);
    }

    #[test]
    fn test_factory_uses_pre_configuration() {
        let scale = Motion::factory(|config: &Config| {
            let by = config["by"].as_i64().unwrap_or(1);
            move |out: &Outlet, p: Packet| {
                let v = p.payload().as_i64().unwrap_or(0);
                out.send(p.with_payload(v * by))
            }
        })
        .configure(json!({"by": 7}));
        let (out, seen) = collect();
        let graph = compile(vec![wire!["in", scale, out]]).unwrap();
        graph.send("in", Packet::new(3)).unwrap();
        assert_eq!(seen.payloads(), vec![json!(21)]);
    }
}
