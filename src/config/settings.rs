//! Section types of the engine configuration.
//!
//! - [`PoolSettings`] - Worker pool size, fault policy, default handler
//! - [`GraphSettings`] - Compile options applied to every graph
//! - [`LoggingSettings`] - Log filter, colour and optional log file

use crate::queue::FaultPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Number of worker threads (at least one).
    pub workers: usize,

    /// What happens to a task whose worker thread faults.
    pub fault_policy: FaultPolicy,

    /// Under `FaultPolicy::Requeue`, how many times a task may be retried
    /// before it is reported as an error.
    pub max_requeues: u32,

    /// Handler used by tasks that do not name one.
    pub default_handler: Option<String>,

    /// Worker thread name prefix; threads are named `<prefix>-<id>`.
    pub thread_name: String,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(1)
}

fn default_thread_name() -> String {
    "pipemotion-worker".to_string()
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            fault_policy: FaultPolicy::default(),
            max_requeues: 3,
            default_handler: None,
            thread_name: default_thread_name(),
        }
    }
}

/// Graph compilation options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    /// Reject the whole graph on any invalid line instead of skipping it.
    pub strict: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub filter: String,

    /// Colourised terminal output.
    pub ansi: bool,

    /// Also write logs to this file.
    pub file: Option<PathBuf>,
}

fn default_filter() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            ansi: default_true(),
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_defaults() {
        let pool = PoolSettings::default();
        assert!(pool.workers >= 1);
        assert_eq!(pool.fault_policy, FaultPolicy::Report);
        assert_eq!(pool.thread_name, "pipemotion-worker");
        assert!(pool.default_handler.is_none());
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let pool: PoolSettings = toml::from_str("workers = 3").unwrap();
        assert_eq!(pool.workers, 3);
        assert_eq!(pool.thread_name, default_thread_name());

        let logging: LoggingSettings = toml::from_str("ansi = false").unwrap();
        assert_eq!(logging.filter, "info");
        assert!(!logging.ansi);
    }
}
