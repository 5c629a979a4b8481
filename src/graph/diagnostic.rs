//! Structured findings from the graph validation pass.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// How bad a finding is. Only errors cause a line to be skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// What was wrong with a line.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DiagnosticKind {
    #[error("line has {len} element(s); a source and a destination are required")]
    TooShort { len: usize },

    #[error("a {found} cannot be a source (expected a pipe, producer, or graph)")]
    InvalidSource { found: &'static str },

    #[error("a {found} cannot be a destination (expected a pipe, motion, or graph)")]
    InvalidDestination { found: &'static str },

    #[error("a producer cannot appear between source and destination")]
    ProducerInTransform,

    #[error("empty {found}")]
    EmptyBlock { found: &'static str },

    #[error("pipe name is empty")]
    EmptyPipeName,

    #[error("embedded graph has no `{pipe}` pipe")]
    MissingGraphPipe { pipe: &'static str },

    #[error("unknown motion kind `{0}`")]
    UnknownMotion(String),

    #[error("unknown producer kind `{0}`")]
    UnknownProducer(String),

    #[error("line ends in a motion; no pipe named as destination")]
    UnnamedSink,
}

/// A finding attached to a line index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub line: usize,
    pub severity: Severity,
    pub kind: DiagnosticKind,
}

impl Diagnostic {
    pub fn error(line: usize, kind: DiagnosticKind) -> Self {
        Self {
            line,
            severity: Severity::Error,
            kind,
        }
    }

    pub fn warning(line: usize, kind: DiagnosticKind) -> Self {
        Self {
            line,
            severity: Severity::Warning,
            kind,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "line {}: {}: {}", self.line, level, self.kind)
    }
}
