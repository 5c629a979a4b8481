//! The unit of data flowing through a graph.
//!
//! A `Packet` is an open record: a JSON object with at least a `payload`
//! field. Transforms never mutate a packet they did not take by value; the
//! `with_*` combinators consume the packet and hand back the changed copy,
//! leaving every unrelated field untouched.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};

/// Field holding the packet's data.
pub const PAYLOAD: &str = "payload";
/// Optional routing/classification label.
pub const TOPIC: &str = "topic";
/// Optional packet identifier (set by `Packet::stamped`).
pub const ID: &str = "id";
/// Optional creation time in epoch milliseconds.
pub const CREATED: &str = "created";
/// Failure description attached by transforms that could not do their job.
pub const ERROR: &str = "error";

/// Configuration object handed to motion and producer factories.
pub type Config = Value;

static NULL: Value = Value::Null;

/// Empty configuration used for auto-configuration of factories.
pub fn empty_config() -> Config {
    Value::Object(Map::new())
}

/// An open record flowing through the graph.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Packet {
    fields: Map<String, Value>,
}

impl Packet {
    /// Create a packet carrying only a payload.
    pub fn new(payload: impl Into<Value>) -> Self {
        let mut fields = Map::new();
        fields.insert(PAYLOAD.to_string(), payload.into());
        Self { fields }
    }

    /// Create a packet with a payload, a fresh identifier and a creation time.
    pub fn stamped(payload: impl Into<Value>) -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        let now = Utc::now().timestamp_millis();
        let seq = NEXT.fetch_add(1, Ordering::Relaxed);
        Self::new(payload)
            .with(ID, format!("{:x}.{:x}", now, seq))
            .with(CREATED, now)
    }

    /// Wrap an existing field map.
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// The payload, or JSON null when the field is absent.
    pub fn payload(&self) -> &Value {
        self.fields.get(PAYLOAD).unwrap_or(&NULL)
    }

    pub fn topic(&self) -> Option<&str> {
        self.fields.get(TOPIC).and_then(Value::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.fields.get(ID).and_then(Value::as_str)
    }

    /// Creation time, if the packet was stamped.
    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.fields
            .get(CREATED)
            .and_then(Value::as_i64)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    pub fn error(&self) -> Option<&Value> {
        self.fields.get(ERROR)
    }

    pub fn is_error(&self) -> bool {
        self.fields.contains_key(ERROR)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    pub fn into_payload(mut self) -> Value {
        self.fields.remove(PAYLOAD).unwrap_or(Value::Null)
    }

    /// Return this packet with `key` set to `value`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Return this packet with `key` removed.
    pub fn without(mut self, key: &str) -> Self {
        self.fields.remove(key);
        self
    }

    pub fn with_payload(self, payload: impl Into<Value>) -> Self {
        self.with(PAYLOAD, payload)
    }

    pub fn with_topic(self, topic: impl Into<String>) -> Self {
        self.with(TOPIC, topic.into())
    }

    pub fn with_error(self, error: impl Into<Value>) -> Self {
        self.with(ERROR, error)
    }
}

impl From<Value> for Packet {
    /// Objects are taken as the full field set; anything else becomes the payload.
    fn from(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self { fields },
            other => Self::new(other),
        }
    }
}
