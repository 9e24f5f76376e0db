//! Statistics from the crawl state database
//!
//! This module provides functionality for extracting and displaying
//! per-tenant ingestion status for the `status` command.

use crate::state::RecordStatus;
use crate::storage::{CrawlRecord, CrawlStateStore, StorageResult};
use std::collections::HashMap;
use std::fmt::Write;

/// Ingestion status summary for one tenant
#[derive(Debug, Clone)]
pub struct TenantStatistics {
    pub tenant_id: String,

    /// Total number of records
    pub total_records: u64,

    /// Count of records by status
    pub records_by_status: HashMap<RecordStatus, u64>,

    /// FAILED and PENDING records, only loaded when requested
    pub resumable: Vec<CrawlRecord>,
}

impl TenantStatistics {
    pub fn count(&self, status: RecordStatus) -> u64 {
        self.records_by_status.get(&status).copied().unwrap_or(0)
    }
}

/// Loads statistics for one tenant, or for every tenant when `tenant_id` is None
///
/// # Arguments
///
/// * `store` - The crawl state store to read from
/// * `tenant_id` - Restrict the output to this tenant
/// * `include_resumable` - Also load the FAILED and PENDING records themselves
///
/// # Returns
///
/// * `Ok(Vec<TenantStatistics>)` - One entry per tenant, ordered by tenant id
/// * `Err(StorageError)` - The store could not be read
pub fn load_statistics(
    store: &dyn CrawlStateStore,
    tenant_id: Option<&str>,
    include_resumable: bool,
) -> StorageResult<Vec<TenantStatistics>> {
    let tenants = match tenant_id {
        Some(tenant) => vec![tenant.to_string()],
        None => store.list_tenants()?,
    };

    let mut stats = Vec::with_capacity(tenants.len());
    for tenant in tenants {
        let records_by_status = store.count_by_status(&tenant)?;
        let total_records = records_by_status.values().sum();

        let mut resumable = Vec::new();
        if include_resumable {
            resumable.extend(store.get_records_by_status(&tenant, RecordStatus::Failed)?);
            resumable.extend(store.get_records_by_status(&tenant, RecordStatus::Pending)?);
            resumable.sort_by_key(|record| record.id);
        }

        stats.push(TenantStatistics {
            tenant_id: tenant,
            total_records,
            records_by_status,
            resumable,
        });
    }

    Ok(stats)
}

/// Renders statistics as plain text
pub fn format_statistics(stats: &[TenantStatistics]) -> String {
    let mut out = String::new();

    if stats.is_empty() {
        out.push_str("No crawl records found\n");
        return out;
    }

    for tenant in stats {
        let _ = writeln!(out, "=== Tenant {} ===", tenant.tenant_id);
        let _ = writeln!(out, "  Total records: {}", tenant.total_records);

        for status in RecordStatus::all_statuses() {
            let count = tenant.count(status);
            let percentage = if tenant.total_records > 0 {
                (count as f64 / tenant.total_records as f64) * 100.0
            } else {
                0.0
            };
            let _ = writeln!(out, "  {}: {} ({:.1}%)", status, count, percentage);
        }

        if !tenant.resumable.is_empty() {
            let _ = writeln!(out, "\n  Resumable records ({}):", tenant.resumable.len());
            for record in &tenant.resumable {
                let detail = match (&record.failure_kind, &record.error_detail) {
                    (Some(kind), Some(detail)) => format!(" [{}] {}", kind, detail),
                    _ => String::new(),
                };
                let _ = writeln!(
                    out,
                    "  - #{} {} {} (attempt {}){}",
                    record.id, record.status, record.url, record.attempts, detail
                );
            }
        }

        out.push('\n');
    }

    out
}

/// Prints statistics to stdout
pub fn print_statistics(stats: &[TenantStatistics]) {
    print!("{}", format_statistics(stats));
}
