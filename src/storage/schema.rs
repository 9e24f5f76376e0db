//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the crawl state database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per URL discovered by a crawl run
CREATE TABLE IF NOT EXISTS crawl_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL,
    url TEXT NOT NULL,
    status TEXT NOT NULL,
    failure_kind TEXT,
    error_detail TEXT,
    attempts INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_crawl_records_url ON crawl_records(url);
CREATE INDEX IF NOT EXISTS idx_crawl_records_tenant_status ON crawl_records(tenant_id, status);

-- Audit trail of every status a record has held
CREATE TABLE IF NOT EXISTS crawl_record_transitions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id INTEGER NOT NULL REFERENCES crawl_records(id),
    attempt INTEGER NOT NULL,
    status TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transitions_record ON crawl_record_transitions(record_id);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
