//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the CrawlStateStore trait.

use crate::state::{FailureKind, NodeFailure, RecordStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{CrawlStateStore, StorageError, StorageResult};
use crate::storage::CrawlRecord;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::HashMap;
use std::path::Path;

const RECORD_COLUMNS: &str =
    "id, tenant_id, url, status, failure_kind, error_detail, attempts, created_at, updated_at";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens or creates the database at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // WAL lets status readers run while a crawl writes
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn fetch_record(&self, id: i64) -> StorageResult<CrawlRecord> {
        load_record(&self.conn, id)?
            .ok_or_else(|| StorageError::RecordNotFound(format!("id {}", id)))
    }
}

fn load_record(conn: &Connection, id: i64) -> StorageResult<Option<CrawlRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {} FROM crawl_records WHERE id = ?1", RECORD_COLUMNS),
            params![id],
            row_to_record,
        )
        .optional()?;
    Ok(record)
}

fn insert_transition(
    conn: &Connection,
    id: i64,
    attempt: u32,
    status: RecordStatus,
    at: &str,
) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO crawl_record_transitions (record_id, attempt, status, recorded_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![id, attempt, status.to_db_string(), at],
    )?;
    Ok(())
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<CrawlRecord> {
    let status_str: String = row.get(3)?;
    let status = RecordStatus::from_db_string(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            Box::new(StorageError::Corrupt(format!("unknown status '{}'", status_str))),
        )
    })?;
    let failure_kind: Option<String> = row.get(4)?;

    Ok(CrawlRecord {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        url: row.get(2)?,
        status,
        failure_kind: failure_kind.as_deref().and_then(FailureKind::from_db_string),
        error_detail: row.get(5)?,
        attempts: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl CrawlStateStore for SqliteStorage {
    // ===== Record Lifecycle =====

    fn create_record(
        &mut self,
        tenant_id: &str,
        url: &str,
        status: RecordStatus,
    ) -> StorageResult<CrawlRecord> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO crawl_records (tenant_id, url, status, attempts, created_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?4)",
            params![tenant_id, url, status.to_db_string(), now],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO crawl_record_transitions (record_id, attempt, status, recorded_at)
             VALUES (?1, 1, ?2, ?3)",
            params![id, status.to_db_string(), now],
        )?;
        tx.commit()?;

        self.fetch_record(id)
    }

    fn update_status(
        &mut self,
        id: i64,
        status: RecordStatus,
        failure: Option<&NodeFailure>,
    ) -> StorageResult<CrawlRecord> {
        let (kind, detail) = match (status, failure) {
            (RecordStatus::Failed, Some(f)) => (Some(f.kind.to_db_string()), Some(f.detail.as_str())),
            _ => (None, None),
        };
        let now = Utc::now().to_rfc3339();

        // Write lock from the first read; the UPDATE only matches a PENDING row
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = load_record(&tx, id)?
            .ok_or_else(|| StorageError::RecordNotFound(format!("id {}", id)))?;

        let updated = tx.execute(
            "UPDATE crawl_records SET status = ?1, failure_kind = ?2, error_detail = ?3, updated_at = ?4
             WHERE id = ?5 AND status = ?6",
            params![
                status.to_db_string(),
                kind,
                detail,
                now,
                id,
                RecordStatus::Pending.to_db_string()
            ],
        )?;
        if updated == 0 {
            return Err(StorageError::InvalidTransition {
                id,
                from: current.status,
                to: status,
            });
        }
        insert_transition(&tx, id, current.attempts, status, &now)?;
        tx.commit()?;

        self.fetch_record(id)
    }

    fn update_status_by_url(
        &mut self,
        url: &str,
        status: RecordStatus,
        failure: Option<&NodeFailure>,
    ) -> StorageResult<CrawlRecord> {
        let id: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM crawl_records WHERE url = ?1 ORDER BY id DESC LIMIT 1",
                params![url],
                |row| row.get(0),
            )
            .optional()?;

        match id {
            Some(id) => self.update_status(id, status, failure),
            None => Err(StorageError::RecordNotFound(url.to_string())),
        }
    }

    fn reopen_record(&mut self, id: i64) -> StorageResult<CrawlRecord> {
        let now = Utc::now().to_rfc3339();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = load_record(&tx, id)?
            .ok_or_else(|| StorageError::RecordNotFound(format!("id {}", id)))?;
        let attempt = current.attempts + 1;

        let updated = tx.execute(
            "UPDATE crawl_records SET status = ?1, failure_kind = NULL, error_detail = NULL,
             attempts = ?2, updated_at = ?3 WHERE id = ?4 AND status <> ?5",
            params![
                RecordStatus::Pending.to_db_string(),
                attempt,
                now,
                id,
                RecordStatus::Success.to_db_string()
            ],
        )?;
        if updated == 0 {
            return Err(StorageError::InvalidTransition {
                id,
                from: current.status,
                to: RecordStatus::Pending,
            });
        }
        insert_transition(&tx, id, attempt, RecordStatus::Pending, &now)?;
        tx.commit()?;

        self.fetch_record(id)
    }

    // ===== Queries =====

    fn get_record_by_id(&self, id: i64) -> StorageResult<Option<CrawlRecord>> {
        load_record(&self.conn, id)
    }

    fn get_records_by_status(
        &self,
        tenant_id: &str,
        status: RecordStatus,
    ) -> StorageResult<Vec<CrawlRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM crawl_records WHERE tenant_id = ?1 AND status = ?2 ORDER BY id",
            RECORD_COLUMNS
        ))?;

        let records = stmt
            .query_map(params![tenant_id, status.to_db_string()], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn count_by_status(&self, tenant_id: &str) -> StorageResult<HashMap<RecordStatus, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM crawl_records WHERE tenant_id = ?1 GROUP BY status")?;

        let rows = stmt.query_map(params![tenant_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (status_str, count) = row?;
            let status = RecordStatus::from_db_string(&status_str)
                .ok_or_else(|| StorageError::Corrupt(format!("unknown status '{}'", status_str)))?;
            counts.insert(status, count as u64);
        }

        Ok(counts)
    }

    fn list_tenants(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT tenant_id FROM crawl_records ORDER BY tenant_id")?;

        let tenants = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(tenants)
    }

    fn get_transitions(&self, id: i64) -> StorageResult<Vec<(u32, RecordStatus)>> {
        let mut stmt = self.conn.prepare(
            "SELECT attempt, status FROM crawl_record_transitions WHERE record_id = ?1 ORDER BY id",
        )?;

        let rows = stmt.query_map(params![id], |row| {
            Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut transitions = Vec::new();
        for row in rows {
            let (attempt, status_str) = row?;
            let status = RecordStatus::from_db_string(&status_str)
                .ok_or_else(|| StorageError::Corrupt(format!("unknown status '{}'", status_str)))?;
            transitions.push((attempt, status));
        }

        Ok(transitions)
    }
}
