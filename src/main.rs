//! pipemotion - Main Entry Point
//!
//! Loads the engine configuration, compiles a graph document (or the built-in
//! demo graph), feeds it and waits for the worker pool to drain.
//!
//! ```text
//! pipemotion [engine.toml] [graph.toml]
//! ```

use anyhow::Context;
use pipemotion::{
    config::EngineConfig,
    graph::{tap, Graph, GraphDocument, MotionRegistry, Outlet, Packet, Producer},
    logging,
    offload::Offload,
    queue::{HandlerRegistry, TaskQueue},
    wire, LinkRegistry,
};
use serde_json::{json, Value};
use std::path::PathBuf;

fn handlers() -> HandlerRegistry {
    HandlerRegistry::new()
        .with("square", |value: Value| {
            let n = value
                .as_i64()
                .with_context(|| format!("square expects an integer, got {}", value))?;
            Ok(json!(n * n))
        })
        .with("double", |value: Value| {
            let n = value
                .as_i64()
                .with_context(|| format!("double expects an integer, got {}", value))?;
            Ok(json!(n * 2))
        })
}

fn motions(queue: &TaskQueue, links: &LinkRegistry) -> MotionRegistry {
    let mut registry = MotionRegistry::new();
    registry
        .register_links(links)
        .register_offload(queue)
        .register_motion("log", || {
            tap(|packet: &Packet| tracing::info!(payload = %packet.payload(), "Packet"))
        })
        .register_producer("numbers", || {
            Producer::factory(|config: &Value| {
                let count = config.get("count").and_then(Value::as_u64).unwrap_or(10);
                move |outlet: Outlet| {
                    for n in 1..=count {
                        outlet.send(Packet::stamped(n));
                    }
                    None
                }
            })
        });
    registry
}

fn demo_graph(queue: &TaskQueue) -> anyhow::Result<Graph> {
    let graph = Graph::builder()
        .name("demo")
        .line(wire![
            "in",
            Offload::per_packet(queue, "square"),
            "squared"
        ])
        .line(wire!["batch", Offload::batch(queue, "double"), "doubled"])
        .build()?;
    Ok(graph)
}

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1).map(PathBuf::from);
    let config_path = args.next().or_else(EngineConfig::default_path);
    let graph_path = args.next();

    let config = match &config_path {
        Some(path) => EngineConfig::load_or_default(path),
        None => EngineConfig::default(),
    };
    let _log_guard = logging::init(&config.logging)?;

    tracing::info!("Starting pipemotion with {} worker(s)", config.pool.workers);

    let queue = TaskQueue::new(handlers(), &config.pool).context("Failed to start worker pool")?;
    let links = LinkRegistry::new();

    let graph = match &graph_path {
        Some(path) => {
            let document = GraphDocument::load(path)
                .with_context(|| format!("Failed to load graph {:?}", path))?;
            document.compile(&motions(&queue, &links), &config.graph)?
        }
        None => {
            let graph = demo_graph(&queue)?;
            for pipe in ["squared", "doubled"] {
                graph.on(pipe, move |packet| {
                    tracing::info!(pipe, payload = %packet.payload(), "Result");
                })?;
            }
            graph
        }
    };

    for diagnostic in graph.diagnostics() {
        tracing::warn!("{}", diagnostic);
    }

    graph.start();
    if graph_path.is_none() {
        for n in 1..=5 {
            graph.send("in", Packet::stamped(n))?;
        }
        graph.send("batch", Packet::stamped(json!([1, 2, 3])))?;
    }

    queue.drain()?;
    let stats = queue.stats();
    tracing::info!(
        submitted = stats.submitted,
        completed = stats.completed,
        faults = stats.faults,
        "Queue drained"
    );

    tracing::info!("Shutting down...");
    graph.stop();
    queue.terminate();
    Ok(())
}
