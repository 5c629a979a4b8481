//! Test data builders for queues and handler sets

use pipemotion::config::PoolSettings;
use pipemotion::queue::{FaultPolicy, HandlerRegistry, TaskQueue};
use serde_json::{json, Value};
use std::time::Duration;

/// Handlers shared by the integration tests.
///
/// - `square`: integer squared
/// - `slow_square`: sleeps `payload` milliseconds, then squares
/// - `fail`: always fails
/// - `panic`: always panics
pub fn standard_handlers() -> HandlerRegistry {
    HandlerRegistry::new()
        .with("square", |v: Value| {
            let n = v.as_i64().unwrap_or(0);
            Ok(json!(n * n))
        })
        .with("slow_square", |v: Value| {
            let n = v.as_i64().unwrap_or(0);
            std::thread::sleep(Duration::from_millis(n.max(0) as u64));
            Ok(json!(n * n))
        })
        .with("fail", |v: Value| Err(anyhow::anyhow!("rejected {}", v)))
        .with("panic", |_| panic!("handler exploded"))
}

/// Builder for creating test queues
pub struct QueueBuilder {
    handlers: HandlerRegistry,
    settings: PoolSettings,
}

impl QueueBuilder {
    pub fn new() -> Self {
        Self {
            handlers: standard_handlers(),
            settings: PoolSettings {
                workers: 2,
                thread_name: "test-worker".to_string(),
                ..PoolSettings::default()
            },
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.settings.workers = workers;
        self
    }

    pub fn fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.settings.fault_policy = policy;
        self
    }

    pub fn max_requeues(mut self, limit: u32) -> Self {
        self.settings.max_requeues = limit;
        self
    }

    pub fn default_handler(mut self, name: &str) -> Self {
        self.settings.default_handler = Some(name.to_string());
        self
    }

    pub fn build(self) -> TaskQueue {
        TaskQueue::new(self.handlers, &self.settings).expect("queue starts")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_builder() {
        let queue = QueueBuilder::new().workers(3).build();
        assert_eq!(queue.stats().pool_size, 3);
        assert!(queue.handlers().contains("square"));
    }
}
