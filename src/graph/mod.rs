//! Named-pipe dataflow graphs.
//!
//! A graph is declared as a list of lines. Each line names a source, any
//! number of transforms, and a destination:
//!
//! ```text
//! ["in", double, ["a", "b"], "out"]
//!   │      │        │         └─ pipe
//!   │      │        └─ parallel block: every branch gets the packet
//!   │      └─ motion
//!   └─ pipe (or producer, or embedded graph)
//! ```
//!
//! Pipes are created on first reference and shared by every line naming
//! them, which is how lines join into one graph.
//!
//! # Components
//!
//! - [`Packet`] - JSON object carried between nodes
//! - [`Motion`] / [`Producer`] - transforms and sources, optionally built from a config
//! - [`GraphCompiler`] - validates lines and wires nodes
//! - [`Graph`] / [`Pipe`] - the compiled graph and its named entry points
//! - [`LinkRegistry`] - named links between separately compiled graphs
//! - [`GraphDocument`] / [`MotionRegistry`] - graphs loaded from TOML or JSON
//!
//! # Execution
//!
//! Dispatch is synchronous and depth-first on the calling thread. A motion
//! that sends downstream returns only after the whole downstream subtree has
//! handled the packet. Graphs are `!Send`; work that must leave the thread
//! goes through [`crate::offload`].
//!
//! # Example
//!
//! ```ignore
//! use pipemotion::graph::{map, Graph, Packet};
//! use pipemotion::wire;
//!
//! let double = map(|p: Packet| {
//!     let v = p.payload().as_i64().unwrap_or(0);
//!     p.with_payload(v * 2)
//! });
//! let graph = Graph::compile(vec![wire!["in", double, "out"]])?;
//! graph.on("out", |p| println!("{}", p.payload()))?;
//! graph.start();
//! graph.send("in", Packet::new(21))?;
//! ```

pub mod compiler;
pub mod diagnostic;
pub mod document;
pub mod error;
pub mod link;
pub mod motions;
pub mod node;
pub mod packet;
pub mod pipe;
pub mod runtime;

pub use compiler::{parallel, series, CompileOptions, Element, GraphCompiler, Line};
pub use diagnostic::{Diagnostic, DiagnosticKind, Severity};
pub use document::{ElementSpec, GraphDocument, MotionRegistry};
pub use error::{GraphError, GraphResult};
pub use link::{link_in, link_in_factory, link_out, link_out_factory, LinkRegistry, LinkToken};
pub use motions::{collect, filter, map, sink, tap, Collected};
pub use node::{Cleanup, Motion, Node, Outlet, Processor, Producer, ProducerFn};
pub use packet::{empty_config, Config, Packet};
pub use pipe::Pipe;
pub use runtime::{Graph, GraphBuilder, INPUT_PIPE, OUTPUT_PIPE};
