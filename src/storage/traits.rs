//! Storage traits and error types
//!
//! This module defines the trait interface for crawl state backends and
//! associated error types.

use crate::state::{NodeFailure, RecordStatus};
use crate::storage::CrawlRecord;
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Invalid status transition for record {id}: {from} -> {to}")]
    InvalidTransition {
        id: i64,
        from: RecordStatus,
        to: RecordStatus,
    },

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("State store lock poisoned")]
    Poisoned,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for crawl state backends
///
/// One record exists per URL discovered by a crawl run. The orchestrator
/// deduplicates within a run; the store does not enforce URL uniqueness.
pub trait CrawlStateStore: Send {
    // ===== Record Lifecycle =====

    /// Creates a new record and returns it with its assigned id
    fn create_record(
        &mut self,
        tenant_id: &str,
        url: &str,
        status: RecordStatus,
    ) -> StorageResult<CrawlRecord>;

    /// Sets the status of a record by id
    ///
    /// `failure` is stored only when `status` is `Failed`. Fails with
    /// `InvalidTransition` if the record already holds a terminal status.
    fn update_status(
        &mut self,
        id: i64,
        status: RecordStatus,
        failure: Option<&NodeFailure>,
    ) -> StorageResult<CrawlRecord>;

    /// Sets the status of the most recently created record for `url`
    ///
    /// Not scoped by tenant or run; prefer [`CrawlStateStore::update_status`].
    fn update_status_by_url(
        &mut self,
        url: &str,
        status: RecordStatus,
        failure: Option<&NodeFailure>,
    ) -> StorageResult<CrawlRecord>;

    /// Moves a record back to `Pending` for a new attempt
    ///
    /// Clears the failure detail and increments the attempt counter.
    fn reopen_record(&mut self, id: i64) -> StorageResult<CrawlRecord>;

    // ===== Queries =====

    /// Gets a record by id
    fn get_record_by_id(&self, id: i64) -> StorageResult<Option<CrawlRecord>>;

    /// Gets all records of a tenant in a specific status
    fn get_records_by_status(
        &self,
        tenant_id: &str,
        status: RecordStatus,
    ) -> StorageResult<Vec<CrawlRecord>>;

    /// Counts a tenant's records by status
    fn count_by_status(&self, tenant_id: &str) -> StorageResult<HashMap<RecordStatus, u64>>;

    /// Lists every tenant that owns at least one record
    fn list_tenants(&self) -> StorageResult<Vec<String>>;

    /// Returns the statuses a record has held, oldest first, as `(attempt, status)`
    fn get_transitions(&self, id: i64) -> StorageResult<Vec<(u32, RecordStatus)>>;
}
