//! State module for tracking ingestion progress
//!
//! # Components
//!
//! - `RecordStatus`: PENDING / SUCCESS / FAILED status of a crawl record
//! - `FailureKind` and `NodeFailure`: structured failure detail for FAILED records

mod failure;
mod record_status;

// Re-export main types
pub use failure::{FailureKind, NodeFailure};
pub use record_status::RecordStatus;
