//! Structured failure information attached to FAILED records

use crate::{FetchError, IngestError};
use std::fmt;

/// Which stage of a node's processing failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Navigation, rendering, timeout or browser session loss
    Fetch,

    /// Embedding request or vector store write
    Ingest,

    /// Anything else caught at the node boundary (including panics)
    Unhandled,
}

impl FailureKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Ingest => "ingest",
            Self::Unhandled => "unhandled",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "fetch" => Some(Self::Fetch),
            "ingest" => Some(Self::Ingest),
            "unhandled" => Some(Self::Unhandled),
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// A failure recorded against one crawl record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl NodeFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Builds an `Unhandled` failure from a caught panic payload
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::new(FailureKind::Unhandled, format!("panic: {}", message))
    }
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

impl From<FetchError> for NodeFailure {
    fn from(err: FetchError) -> Self {
        Self::new(FailureKind::Fetch, err.to_string())
    }
}

impl From<IngestError> for NodeFailure {
    fn from(err: IngestError) -> Self {
        Self::new(FailureKind::Ingest, err.to_string())
    }
}
