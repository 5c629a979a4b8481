//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use pipemotion::graph::Graph;
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// Upper bound for any blocking drain in tests
pub fn test_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Record every payload reaching `pipe`.
pub fn record(graph: &Graph, pipe: &str) -> Rc<RefCell<Vec<Value>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    graph
        .on(pipe, move |packet| sink.borrow_mut().push(packet.payload().clone()))
        .expect("pipe exists");
    seen
}

/// Payloads as integers, for terse assertions.
pub fn ints(values: &[Value]) -> Vec<i64> {
    values.iter().filter_map(Value::as_i64).collect()
}
