//! Serialized graph form.
//!
//! A document is an ordered list of lines. Each element of a line is one of:
//!
//! - a string: a pipe name
//! - an array: a parallel block
//! - `{ series = [...] }`: a series block
//! - `{ motion = "kind", config = {...} }`: a motion built by the registry
//! - `{ producer = "kind", config = {...} }`: a producer built by the registry
//!
//! ```toml
//! name = "numbers"
//! lines = [
//!     [{ producer = "numbers", config = { count = 5 } }, "in"],
//!     ["in", { motion = "offload", config = { handler = "square" } }, "out"],
//!     ["out", { motion = "log" }],
//! ]
//! ```
//!
//! Kind names are resolved through a [`MotionRegistry`]. An unknown kind is
//! reported as a diagnostic on its line, and the line is skipped (or the whole
//! document rejected in strict mode).

use super::compiler::{CompileOptions, Element, GraphCompiler};
use super::diagnostic::{Diagnostic, DiagnosticKind};
use super::error::{GraphError, GraphResult};
use super::link::{link_in_factory, link_out_factory, LinkRegistry};
use super::node::{Motion, Producer};
use super::runtime::Graph;
use crate::config::GraphSettings;
use crate::offload::Offload;
use crate::queue::TaskQueue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// One element of a document line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ElementSpec {
    Pipe(String),
    Parallel(Vec<ElementSpec>),
    Series {
        series: Vec<ElementSpec>,
    },
    Motion {
        motion: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        config: Option<Value>,
    },
    Producer {
        producer: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        config: Option<Value>,
    },
}

/// A graph in serialized form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphDocument {
    pub name: Option<String>,
    /// Overrides [`GraphSettings::strict`] when present.
    pub strict: Option<bool>,
    pub lines: Vec<Vec<ElementSpec>>,
}

impl GraphDocument {
    pub fn from_toml_str(content: &str) -> GraphResult<Self> {
        toml::from_str(content).map_err(|e| GraphError::Document(e.to_string()))
    }

    pub fn from_json_str(content: &str) -> GraphResult<Self> {
        serde_json::from_str(content).map_err(|e| GraphError::Document(e.to_string()))
    }

    /// Read a document; `.toml` files are TOML, anything else JSON.
    pub fn load(path: impl AsRef<Path>) -> GraphResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let document = if is_toml {
            Self::from_toml_str(&content)
        } else {
            Self::from_json_str(&content)
        };
        document.map_err(|e| GraphError::Document(format!("{:?}: {}", path, e)))
    }

    /// Build every element through `registry` and compile the result.
    pub fn compile(&self, registry: &MotionRegistry, settings: &GraphSettings) -> GraphResult<Graph> {
        let options = CompileOptions {
            strict: self.strict.unwrap_or(settings.strict),
            name: self.name.clone(),
        };
        let mut compiler = GraphCompiler::new(options, registry.links.clone().unwrap_or_default());

        for (index, specs) in self.lines.iter().enumerate() {
            let mut findings = Vec::new();
            let line: Vec<Option<Element>> = specs
                .iter()
                .map(|spec| registry.build(index, spec, &mut findings))
                .collect();
            if findings.is_empty() {
                compiler.add_line(index, line.into_iter().flatten().collect());
            } else {
                for finding in findings {
                    compiler.report(finding);
                }
            }
        }
        compiler.finish()
    }
}

type MotionBuilder = Box<dyn Fn() -> Motion>;
type ProducerBuilder = Box<dyn Fn() -> Producer>;

/// Named motion and producer kinds available to documents.
#[derive(Default)]
pub struct MotionRegistry {
    motions: BTreeMap<String, MotionBuilder>,
    producers: BTreeMap<String, ProducerBuilder>,
    links: Option<LinkRegistry>,
}

impl MotionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a motion kind. `build` is called once per document element.
    pub fn register_motion<F>(&mut self, kind: impl Into<String>, build: F) -> &mut Self
    where
        F: Fn() -> Motion + 'static,
    {
        self.motions.insert(kind.into(), Box::new(build));
        self
    }

    pub fn register_producer<F>(&mut self, kind: impl Into<String>, build: F) -> &mut Self
    where
        F: Fn() -> Producer + 'static,
    {
        self.producers.insert(kind.into(), Box::new(build));
        self
    }

    /// Register `link-in` and `link-out` over `links`. Graphs compiled from
    /// documents share this registry.
    pub fn register_links(&mut self, links: &LinkRegistry) -> &mut Self {
        let out = links.clone();
        self.register_motion("link-out", move || link_out_factory(&out));
        let input = links.clone();
        self.register_producer("link-in", move || link_in_factory(&input));
        self.links = Some(links.clone());
        self
    }

    /// Register `offload` over `queue`.
    pub fn register_offload(&mut self, queue: &TaskQueue) -> &mut Self {
        let queue = queue.clone();
        self.register_motion("offload", move || Offload::factory(&queue))
    }

    pub fn motion(&self, kind: &str, config: Option<Value>) -> Option<Motion> {
        let motion = (self.motions.get(kind)?)();
        Some(match config {
            Some(config) => motion.configure(config),
            None => motion,
        })
    }

    pub fn producer(&self, kind: &str, config: Option<Value>) -> Option<Producer> {
        let producer = (self.producers.get(kind)?)();
        Some(match config {
            Some(config) => producer.configure(config),
            None => producer,
        })
    }

    pub fn motion_kinds(&self) -> Vec<&str> {
        self.motions.keys().map(String::as_str).collect()
    }

    pub fn producer_kinds(&self) -> Vec<&str> {
        self.producers.keys().map(String::as_str).collect()
    }

    fn build(
        &self,
        index: usize,
        spec: &ElementSpec,
        findings: &mut Vec<Diagnostic>,
    ) -> Option<Element> {
        match spec {
            ElementSpec::Pipe(name) => Some(Element::Pipe(name.clone())),
            ElementSpec::Parallel(items) => self
                .build_all(index, items, findings)
                .map(Element::Parallel),
            ElementSpec::Series { series } => self
                .build_all(index, series, findings)
                .map(Element::Series),
            ElementSpec::Motion { motion, config } => {
                let built = self.motion(motion, config.clone());
                if built.is_none() {
                    findings.push(Diagnostic::error(
                        index,
                        DiagnosticKind::UnknownMotion(motion.clone()),
                    ));
                }
                built.map(Element::Motion)
            }
            ElementSpec::Producer { producer, config } => {
                let built = self.producer(producer, config.clone());
                if built.is_none() {
                    findings.push(Diagnostic::error(
                        index,
                        DiagnosticKind::UnknownProducer(producer.clone()),
                    ));
                }
                built.map(Element::Producer)
            }
        }
    }

    fn build_all(
        &self,
        index: usize,
        specs: &[ElementSpec],
        findings: &mut Vec<Diagnostic>,
    ) -> Option<Vec<Element>> {
        let built: Vec<Option<Element>> = specs
            .iter()
            .map(|spec| self.build(index, spec, findings))
            .collect();
        built.into_iter().collect()
    }
}

impl fmt::Debug for MotionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MotionRegistry")
            .field("motions", &self.motion_kinds())
            .field("producers", &self.producer_kinds())
            .finish()
    }
}
