//! Storage module for persisting crawl state
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Per-URL crawl record persistence
//! - Status transition auditing for resumption and observability

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{CrawlStateStore, StorageError, StorageResult};

use crate::state::{FailureKind, RecordStatus};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// A state store shared between crawl runs
pub type SharedStore = Arc<Mutex<dyn CrawlStateStore>>;

/// Wraps a store so it can be shared between concurrent crawl runs
pub fn shared<S: CrawlStateStore + 'static>(store: S) -> SharedStore {
    Arc::new(Mutex::new(store))
}

/// Runs `f` with exclusive access to the shared store
///
/// The lock is released before this function returns, so callers never hold
/// it across an `.await`.
pub fn with_store<T>(
    store: &SharedStore,
    f: impl FnOnce(&mut dyn CrawlStateStore) -> StorageResult<T>,
) -> StorageResult<T> {
    let mut guard = store.lock().map_err(|_| StorageError::Poisoned)?;
    f(&mut *guard)
}

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file; created if missing
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Storage with the schema in place
/// * `Err(StorageError)` - Failed to open or initialize the database
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// One discovered URL within one crawl run
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlRecord {
    pub id: i64,
    pub tenant_id: String,
    pub url: String,
    pub status: RecordStatus,
    pub failure_kind: Option<FailureKind>,
    pub error_detail: Option<String>,
    pub attempts: u32,
    pub created_at: String,
    pub updated_at: String,
}

impl CrawlRecord {
    /// Returns true if this record can be handed to `resume_failed`
    pub fn is_resumable(&self) -> bool {
        !matches!(self.status, RecordStatus::Success)
    }
}
