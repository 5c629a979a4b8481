//! Integration tests for graph dataflow
//!
//! These tests drive compiled graphs through their public pipes:
//! - Series composition order
//! - Parallel fan-out and drop semantics
//! - Shared pipes and embedded graphs
//! - Producers and cleanup over the start/stop lifecycle

mod common;

use common::{ints, record};
use pipemotion::graph::{
    filter, map, sink, tap, Graph, GraphError, Motion, Outlet, Packet, Producer,
};
use pipemotion::{parallel, wire};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn add(n: i64) -> Motion {
    map(move |p: Packet| {
        let v = p.payload().as_i64().unwrap_or(0);
        p.with_payload(v + n)
    })
}

fn mul(n: i64) -> Motion {
    map(move |p: Packet| {
        let v = p.payload().as_i64().unwrap_or(0);
        p.with_payload(v * n)
    })
}

#[test]
fn test_series_composes_left_to_right() {
    let graph = Graph::compile(vec![wire!["in", add(1), mul(10), add(-3), "out"]]).unwrap();
    let seen = record(&graph, "out");
    graph.send("in", Packet::new(2)).unwrap();
    assert_eq!(ints(&seen.borrow()), vec![27]);
}

#[test]
fn test_parallel_block_fans_out() {
    let graph = Graph::compile(vec![wire!["in", parallel![add(1), add(2), add(3)], "out"]])
        .unwrap();
    let seen = record(&graph, "out");
    graph.send("in", Packet::new(10)).unwrap();
    assert_eq!(ints(&seen.borrow()), vec![11, 12, 13]);
}

#[test]
fn test_dropping_branch_does_not_affect_siblings() {
    let graph = Graph::compile(vec![wire![
        "in",
        parallel![filter(|_| false), add(1)],
        "out"
    ]])
    .unwrap();
    let seen = record(&graph, "out");
    graph.send("in", Packet::new(1)).unwrap();
    assert_eq!(ints(&seen.borrow()), vec![2]);

    let blocked = Graph::compile(vec![wire!["in", filter(|_| false), "out"]]).unwrap();
    let nothing = record(&blocked, "out");
    blocked.send("in", Packet::new(1)).unwrap();
    assert!(nothing.borrow().is_empty());
}

#[test]
fn test_parallel_spliced_into_series() {
    let graph = Graph::compile(vec![wire![
        "in",
        add(1),
        parallel![mul(2), mul(3)],
        add(100),
        "out"
    ]])
    .unwrap();
    let seen = record(&graph, "out");
    graph.send("in", Packet::new(1)).unwrap();
    assert_eq!(ints(&seen.borrow()), vec![104, 106]);
}

#[test]
fn test_shared_pipe_joins_lines() {
    let graph = Graph::compile(vec![
        wire!["in", add(1), "middle"],
        wire!["middle", mul(2), "out"],
        wire!["side", "middle"],
    ])
    .unwrap();
    let middle = record(&graph, "middle");
    let out = record(&graph, "out");

    graph.send("in", Packet::new(1)).unwrap();
    graph.send("side", Packet::new(7)).unwrap();

    assert_eq!(ints(&middle.borrow()), vec![2, 7]);
    assert_eq!(ints(&out.borrow()), vec![4, 14]);

    let a = graph.pipe("middle").unwrap();
    let b = graph.pipe("middle").unwrap();
    assert!(a.ptr_eq(&b));
}

#[test]
fn test_metadata_survives_transforms() {
    let graph = Graph::compile(vec![wire!["in", add(1), "out"]]).unwrap();
    let packets = Rc::new(RefCell::new(Vec::new()));
    let store = packets.clone();
    graph
        .on("out", move |p| store.borrow_mut().push(p.clone()))
        .unwrap();
    graph
        .send("in", Packet::new(1).with("requestId", "r1").with_topic("t"))
        .unwrap();

    let packets = packets.borrow();
    assert_eq!(packets[0].payload(), &json!(2));
    assert_eq!(packets[0].get("requestId"), Some(&json!("r1")));
    assert_eq!(packets[0].topic(), Some("t"));
}

#[test]
fn test_motion_may_send_many_times() {
    let repeat = Motion::processor(|out: &Outlet, p: Packet| {
        out.send(p.clone());
        out.send(p.clone());
        out.send(p);
    });
    let graph = Graph::compile(vec![wire!["in", repeat, "out"]]).unwrap();
    let seen = record(&graph, "out");
    graph.send("in", Packet::new("x")).unwrap();
    assert_eq!(seen.borrow().len(), 3);
}

#[test]
fn test_terminal_motion_ends_line() {
    let total = Rc::new(Cell::new(0));
    let acc = total.clone();
    let graph = Graph::compile(vec![wire![
        "in",
        add(1),
        sink(move |p: Packet| acc.set(acc.get() + p.payload().as_i64().unwrap_or(0)))
    ]])
    .unwrap();
    graph.send("in", Packet::new(1)).unwrap();
    graph.send("in", Packet::new(2)).unwrap();
    assert_eq!(total.get(), 5);
}

#[test]
fn test_embedded_graph_as_transform() {
    let inner = Graph::compile(vec![wire!["in", mul(3), "out"]]).unwrap();
    let outer = Graph::compile(vec![
        wire!["in", "stage"],
        wire!["stage", Rc::new(inner), "out"],
    ])
    .unwrap();
    let seen = record(&outer, "out");
    outer.send("in", Packet::new(5)).unwrap();
    assert_eq!(ints(&seen.borrow()), vec![15]);
    assert_eq!(outer.embedded_count(), 1);
}

#[test]
fn test_producers_run_on_start_and_clean_up_on_stop() {
    let stopped = Rc::new(Cell::new(false));
    let flag = stopped.clone();
    let ticker = Producer::new(move |outlet: Outlet| {
        for n in 1..=3 {
            outlet.send(Packet::new(n));
        }
        let flag = flag.clone();
        Some(Box::new(move || flag.set(true)) as pipemotion::graph::Cleanup)
    });
    let graph = Graph::compile(vec![wire![ticker, "in"], wire!["in", mul(2), "out"]]).unwrap();
    let seen = record(&graph, "out");

    assert!(seen.borrow().is_empty());
    graph.start();
    assert_eq!(ints(&seen.borrow()), vec![2, 4, 6]);
    assert!(graph.is_running());

    graph.stop();
    assert!(stopped.get());
    assert!(!graph.is_running());
}

#[test]
fn test_factory_configured_motion() {
    let scale = |config: Value| {
        Motion::factory(|config: &Value| {
            let by = config.get("by").and_then(Value::as_i64).unwrap_or(1);
            move |out: &Outlet, p: Packet| {
                let v = p.payload().as_i64().unwrap_or(0);
                out.send(p.with_payload(v * by));
            }
        })
        .configure(config)
    };
    let auto = Motion::factory(|_: &Value| {
        move |out: &Outlet, p: Packet| out.send(p.with("auto", true))
    });
    let graph = Graph::compile(vec![wire!["in", scale(json!({"by": 4})), auto, "out"]]).unwrap();
    let packets = Rc::new(RefCell::new(Vec::new()));
    let store = packets.clone();
    graph
        .on("out", move |p| store.borrow_mut().push(p.clone()))
        .unwrap();
    graph.send("in", Packet::new(2)).unwrap();
    assert_eq!(packets.borrow()[0].payload(), &json!(8));
    assert_eq!(packets.borrow()[0].get("auto"), Some(&json!(true)));
}

#[test]
fn test_malformed_lines_are_skipped_with_diagnostics() {
    let graph = Graph::compile(vec![
        wire!["lonely"],
        wire!["in", add(1), "out"],
        wire![add(1), "out"],
    ])
    .unwrap();
    let lines: Vec<usize> = graph.diagnostics().iter().map(|d| d.line).collect();
    assert_eq!(lines, vec![0, 2]);

    let seen = record(&graph, "out");
    graph.send("in", Packet::new(1)).unwrap();
    assert_eq!(ints(&seen.borrow()), vec![2]);
}

#[test]
fn test_strict_build_rejects_malformed_lines() {
    let result = Graph::builder()
        .strict(true)
        .line(wire!["lonely"])
        .build();
    assert!(matches!(result, Err(GraphError::InvalidLines(_))));
}

#[test]
fn test_cycle_is_rejected() {
    let result = Graph::compile(vec![wire!["a", add(1), "b"], wire!["b", tap(|_| {}), "a"]]);
    match result {
        Err(GraphError::CycleDetected(path)) => assert!(path.len() >= 2),
        other => panic!("expected a cycle error, got {:?}", other.map(|g| g.node_count())),
    }
}

#[test]
fn test_unknown_pipe_is_an_error() {
    let graph = Graph::compile(vec![wire!["in", "out"]]).unwrap();
    assert!(matches!(
        graph.send("nowhere", Packet::new(1)),
        Err(GraphError::UnknownPipe(_))
    ));
}

proptest! {
    #[test]
    fn prop_series_matches_composition(start in -1000i64..1000, steps in prop::collection::vec((any::<bool>(), -9i64..10), 1..8)) {
        let mut expected = start;
        let mut line = wire!["in"];
        for (is_add, n) in &steps {
            if *is_add {
                expected += n;
                line.push(add(*n).into());
            } else {
                expected *= n;
                line.push(mul(*n).into());
            }
        }
        line.push("out".into());

        let graph = Graph::compile(vec![line]).unwrap();
        let seen = record(&graph, "out");
        graph.send("in", Packet::new(start)).unwrap();
        prop_assert_eq!(ints(&seen.borrow()), vec![expected]);
    }

    #[test]
    fn prop_parallel_yields_one_packet_per_branch(branches in 1usize..12) {
        let block: Vec<pipemotion::graph::Element> =
            (0..branches).map(|i| add(i as i64).into()).collect();
        let graph = Graph::compile(vec![wire!["in", block, "out"]]).unwrap();
        let seen = record(&graph, "out");
        graph.send("in", Packet::new(0)).unwrap();
        prop_assert_eq!(seen.borrow().len(), branches);
    }
}
