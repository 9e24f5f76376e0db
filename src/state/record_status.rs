/// Record status definitions for tracking ingestion progress
///
/// This module defines the states a crawl record can be in.
use std::fmt;

/// Represents the ingestion status of one discovered URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordStatus {
    /// URL has been registered and its fetch/ingest attempt has not finished
    Pending,

    /// Page was fetched and its content ingested
    Success,

    /// Fetch or ingest failed; see the record's failure kind and detail
    Failed,
}

impl RecordStatus {
    /// Returns true if this is a terminal state (no further transition in the same attempt)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Converts the status to its database representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    /// Parses a status from its database representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "SUCCESS" => Some(Self::Success),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all possible statuses
    pub fn all_statuses() -> [Self; 3] {
        [Self::Pending, Self::Success, Self::Failed]
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
