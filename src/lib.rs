//! # pipemotion: named-pipe dataflow graphs with a worker pool
//!
//! Graphs are declared as lines of pipes, motions and producers, compiled
//! into a network of nodes and driven synchronously on one thread. Work that
//! is too slow for the graph thread is offloaded to a pool of worker threads
//! and its results are fed back into the graph as they arrive.
//!
//! ## Architecture
//!
//! - **Graph**: compiler, runtime and link registry, all single-threaded
//! - **Queue**: worker pool running named handlers on OS threads
//! - **Offload**: motions that turn packets into tasks and results back into packets
//! - **Communication**: crossbeam channels between the control thread and workers
//!
//! ## Configuration
//!
//! Engine settings live in `engine.toml` under the platform config directory:
//!
//! - **Linux**: `~/.config/pipemotion/`
//! - **macOS**: `~/Library/Application Support/pipemotion/`
//! - **Windows**: `%APPDATA%\pipemotion\`
//!
//! ## Example
//!
//! ```ignore
//! use pipemotion::{
//!     config::EngineConfig,
//!     graph::{Graph, Packet},
//!     offload::Offload,
//!     queue::{HandlerRegistry, TaskQueue},
//!     wire,
//! };
//! use serde_json::json;
//!
//! let config = EngineConfig::default();
//! let handlers = HandlerRegistry::new().with("square", |v| {
//!     let n = v.as_i64().unwrap_or(0);
//!     Ok(json!(n * n))
//! });
//! let queue = TaskQueue::new(handlers, &config.pool)?;
//!
//! let graph = Graph::compile(vec![
//!     wire!["in", Offload::per_packet(&queue, "square"), "out"],
//! ])?;
//! graph.on("out", |p| println!("{}", p.payload()))?;
//! graph.start();
//! graph.send("in", Packet::new(12))?;
//! queue.drain()?;
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod id;
pub mod logging;
pub mod offload;
pub mod queue;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{Error, Result, ResultExt};
pub use graph::{Graph, GraphDocument, LinkRegistry, Motion, MotionRegistry, Packet, Producer};
pub use offload::Offload;
pub use queue::{HandlerRegistry, Task, TaskQueue};
