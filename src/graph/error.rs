//! Graph-specific error types.

use crate::graph::diagnostic::Diagnostic;
use thiserror::Error;

/// Errors that can occur while compiling or driving a graph.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Cycle detected in graph: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    #[error("{} invalid line(s); first: {}", .0.len(), first_diagnostic(.0))]
    InvalidLines(Vec<Diagnostic>),

    #[error("Unknown pipe: {0}")]
    UnknownPipe(String),

    #[error("Graph document error: {0}")]
    Document(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn first_diagnostic(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .first()
        .map(|d| d.to_string())
        .unwrap_or_else(|| "none".to_string())
}

pub type GraphResult<T> = std::result::Result<T, GraphError>;
