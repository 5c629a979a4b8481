//! Integration tests for worker-backed motions
//!
//! These tests run graphs whose motions hand work to the pool:
//! - Payload replacement with metadata preserved
//! - Out-of-order completion in per-packet mode
//! - Index-ordered reassembly in batch mode
//! - Adapter lifetime and queue subscriptions

mod common;

use common::builders::QueueBuilder;
use common::{ints, record, test_timeout};
use pipemotion::config::PoolSettings;
use pipemotion::graph::{map, Graph, Packet};
use pipemotion::offload::Offload;
use pipemotion::queue::{FaultPolicy, HandlerRegistry, TaskQueue};
use pipemotion::wire;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// Squares `n` after sleeping longer for smaller inputs, so larger inputs finish first.
fn inverse_delay_queue(workers: usize) -> TaskQueue {
    let handlers = HandlerRegistry::new().with("square", |v: Value| {
        let n = v.as_i64().unwrap_or(0);
        std::thread::sleep(Duration::from_millis((30 - n).clamp(0, 30) as u64 * 3));
        Ok(json!(n * n))
    });
    TaskQueue::new(
        handlers,
        &PoolSettings {
            workers,
            ..PoolSettings::default()
        },
    )
    .unwrap()
}

#[test]
fn test_per_packet_keeps_request_metadata() {
    let queue = QueueBuilder::new().build();
    let graph = Graph::compile(vec![wire![
        "in",
        Offload::per_packet(&queue, "square"),
        "out"
    ]])
    .unwrap();
    let packets = Rc::new(RefCell::new(Vec::new()));
    let store = packets.clone();
    graph
        .on("out", move |p| store.borrow_mut().push(p.clone()))
        .unwrap();

    graph
        .send("in", Packet::new(100).with("requestId", "r1"))
        .unwrap();
    queue.drain_timeout(test_timeout()).unwrap();

    let packets = packets.borrow();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].payload(), &json!(10000));
    assert_eq!(packets[0].get("requestId"), Some(&json!("r1")));
}

#[test]
fn test_batch_reassembles_in_index_order() {
    let queue = inverse_delay_queue(5);
    let graph = Graph::compile(vec![wire!["in", Offload::batch(&queue, "square"), "out"]])
        .unwrap();
    let seen = record(&graph, "out");

    graph
        .send("in", Packet::new(json!([5, 10, 15, 20, 25])))
        .unwrap();
    queue.drain_timeout(test_timeout()).unwrap();

    assert_eq!(*seen.borrow(), vec![json!([25, 100, 225, 400, 625])]);
}

#[test]
fn test_per_packet_completes_in_worker_order() {
    let queue = inverse_delay_queue(3);
    let graph = Graph::compile(vec![wire![
        "in",
        Offload::per_packet(&queue, "square"),
        "out"
    ]])
    .unwrap();
    let seen = record(&graph, "out");

    for n in [5, 15, 25] {
        graph.send("in", Packet::new(n)).unwrap();
    }
    queue.drain_timeout(test_timeout()).unwrap();

    let mut got = ints(&seen.borrow());
    assert_eq!(got.len(), 3);
    // The fastest task was submitted last.
    assert_eq!(got[0], 625);
    got.sort_unstable();
    assert_eq!(got, vec![25, 225, 625]);
}

#[test]
fn test_results_continue_through_downstream_motions() {
    let queue = QueueBuilder::new().build();
    let graph = Graph::compile(vec![
        wire!["in", Offload::per_packet(&queue, "square"), "squared"],
        wire![
            "squared",
            map(|p: Packet| {
                let v = p.payload().as_i64().unwrap_or(0);
                p.with_payload(v + 1)
            }),
            "out"
        ],
    ])
    .unwrap();
    let squared = record(&graph, "squared");
    let out = record(&graph, "out");

    graph.send("in", Packet::new(7)).unwrap();
    assert!(out.borrow().is_empty());
    queue.drain_timeout(test_timeout()).unwrap();

    assert_eq!(ints(&squared.borrow()), vec![49]);
    assert_eq!(ints(&out.borrow()), vec![50]);
}

#[test]
fn test_chained_offloads_drain_together() {
    let queue = QueueBuilder::new().workers(2).build();
    let graph = Graph::compile(vec![wire![
        "in",
        Offload::per_packet(&queue, "square"),
        Offload::per_packet(&queue, "square"),
        "out"
    ]])
    .unwrap();
    let seen = record(&graph, "out");

    graph.send("in", Packet::new(3)).unwrap();
    queue.drain_timeout(test_timeout()).unwrap();
    assert_eq!(ints(&seen.borrow()), vec![81]);
}

#[test]
fn test_handler_failure_marks_packet() {
    let queue = QueueBuilder::new().build();
    let graph = Graph::compile(vec![wire!["in", Offload::per_packet(&queue, "fail"), "out"]])
        .unwrap();
    let packets = Rc::new(RefCell::new(Vec::new()));
    let store = packets.clone();
    graph
        .on("out", move |p| store.borrow_mut().push(p.clone()))
        .unwrap();

    graph.send("in", Packet::new(4).with("requestId", "r2")).unwrap();
    queue.drain_timeout(test_timeout()).unwrap();

    let packets = packets.borrow();
    assert!(packets[0].is_error());
    assert_eq!(packets[0].payload(), &json!(4));
    assert_eq!(packets[0].get("requestId"), Some(&json!("r2")));
}

#[test]
fn test_abandoned_batch_item_still_delivers_packet() {
    let handlers = HandlerRegistry::new().with("fragile", |v: Value| {
        let n = v.as_i64().unwrap_or(0);
        if n == 3 {
            panic!("cannot handle three");
        }
        Ok(json!(n * 10))
    });
    let queue = TaskQueue::new(
        handlers,
        &PoolSettings {
            workers: 2,
            fault_policy: FaultPolicy::Abandon,
            ..PoolSettings::default()
        },
    )
    .unwrap();
    let graph = Graph::compile(vec![wire!["in", Offload::batch(&queue, "fragile"), "out"]])
        .unwrap();
    let packets = Rc::new(RefCell::new(Vec::new()));
    let store = packets.clone();
    graph
        .on("out", move |p| store.borrow_mut().push(p.clone()))
        .unwrap();

    graph.send("in", Packet::new(json!([1, 2, 3, 4]))).unwrap();
    queue.drain_timeout(test_timeout()).unwrap();

    let packets = packets.borrow();
    assert_eq!(packets.len(), 1);
    assert!(packets[0].is_error());
    let error = packets[0].error().unwrap();
    assert_eq!(error["failures"][0]["index"], json!(2));
    assert!(error["failures"][0]["message"]
        .as_str()
        .unwrap()
        .starts_with("abandoned"));
}

#[test]
fn test_dropping_graph_releases_subscription() {
    let queue = QueueBuilder::new().build();
    let graph = Graph::compile(vec![wire!["in", Offload::per_packet(&queue, "square"), "out"]])
        .unwrap();
    assert_eq!(queue.subscriber_count(), 1);
    drop(graph);
    assert_eq!(queue.subscriber_count(), 0);
}

#[test]
fn test_factory_reads_mode_and_handler() {
    let queue = QueueBuilder::new().build();
    let motion = Offload::factory(&queue).configure(json!({"handler": "square", "mode": "batch"}));
    let graph = Graph::compile(vec![wire!["in", motion, "out"]]).unwrap();
    let seen = record(&graph, "out");

    graph.send("in", Packet::new(json!([1, 2, 3]))).unwrap();
    queue.drain_timeout(test_timeout()).unwrap();
    assert_eq!(*seen.borrow(), vec![json!([1, 4, 9])]);
}
