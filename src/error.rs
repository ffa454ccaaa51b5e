use std::path::PathBuf;

use thiserror::Error;

use crate::runtime::Fault;
use crate::syntax::ParseError;

/// Errors that abort a whole search. Per-candidate faults never surface
/// here; they are recorded as [`crate::oracle::Verdict`]s instead.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("malformed specification: {0}")]
    Specification(String),
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("search cancelled")]
    Cancelled,
    #[error("lost connection to the running program")]
    Disconnected,
    #[error("failed to load corpus {path:?}: {message}")]
    Corpus { path: PathBuf, message: String },
    #[error("failed to load configuration {path:?}: {message}")]
    Config { path: PathBuf, message: String },
}

impl SearchError {
    pub fn spec(message: impl Into<String>) -> Self {
        SearchError::Specification(message.into())
    }
}

/// Non-fatal observations collected during a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// The user predicate itself faulted on a candidate.
    PredicateCrashed { candidate: String, fault: Fault },
    /// A candidate exceeded the per-call budget.
    TimedOut { candidate: String },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::PredicateCrashed { candidate, fault } => {
                write!(f, "predicate {fault} on `{candidate}`; is the predicate correct?")
            },
            Warning::TimedOut { candidate } => write!(f, "`{candidate}` timed out"),
        }
    }
}
