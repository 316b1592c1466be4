//! Per-store usage measurement.
//!
//! Usage is an estimate: text and blob payload lengths summed in SQL, plus a
//! flat per-row allowance for numeric columns and record framing. Photo blobs
//! dominate real databases, and those are counted exactly.

use libsql::Connection;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::db::StoreKind;
use crate::error::Result;
use crate::util::now_ms;

/// Flat allowance per stored row for numeric columns and framing.
const ROW_OVERHEAD_BYTES: u64 = 64;

/// Rows and estimated bytes held by one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreUsage {
    pub store: StoreKind,
    pub rows: u64,
    pub bytes: u64,
}

/// Aggregate usage snapshot across every store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUsage {
    /// When the measurement ran (unix ms).
    pub measured_at: i64,
    /// Configured ceiling in bytes.
    pub limit_bytes: u64,
    /// Estimated bytes across all stores.
    pub total_bytes: u64,
    pub stores: Vec<StoreUsage>,
}

impl StorageUsage {
    /// Fraction of the ceiling in use, in `0.0..`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction_used(&self) -> f64 {
        if self.limit_bytes == 0 {
            return 0.0;
        }
        self.total_bytes as f64 / self.limit_bytes as f64
    }

    /// Percentage of the ceiling in use.
    #[must_use]
    pub fn percent_used(&self) -> f64 {
        self.fraction_used() * 100.0
    }

    /// Bytes left under the ceiling.
    #[must_use]
    pub const fn bytes_free(&self) -> u64 {
        self.limit_bytes.saturating_sub(self.total_bytes)
    }

    /// Usage of one store, if measured.
    #[must_use]
    pub fn store(&self, kind: StoreKind) -> Option<&StoreUsage> {
        self.stores.iter().find(|usage| usage.store == kind)
    }
}

/// SQL expression summing the payload bytes of one row.
///
/// TEXT lengths count characters rather than bytes, which is close enough
/// for an estimate; BLOB lengths are exact.
const fn payload_expr(kind: StoreKind) -> &'static str {
    match kind {
        StoreKind::Assessments => {
            "LENGTH(id) + COALESCE(LENGTH(server_id), 0) + LENGTH(project_id)
             + COALESCE(LENGTH(asset_id), 0) + COALESCE(LENGTH(component_code), 0)
             + LENGTH(title) + COALESCE(LENGTH(notes), 0)
             + COALESCE(LENGTH(inspector), 0) + LENGTH(sync_status)
             + COALESCE(LENGTH(sync_error), 0)"
        }
        StoreKind::Photos => {
            "LENGTH(id) + COALESCE(LENGTH(server_id), 0) + LENGTH(assessment_id)
             + LENGTH(project_id) + COALESCE(LENGTH(caption), 0)
             + LENGTH(content_type) + LENGTH(compressed)
             + COALESCE(LENGTH(original), 0) + COALESCE(LENGTH(remote_url), 0)
             + LENGTH(sync_status) + COALESCE(LENGTH(sync_error), 0)"
        }
        StoreKind::Deficiencies => {
            "LENGTH(id) + COALESCE(LENGTH(server_id), 0) + LENGTH(assessment_id)
             + LENGTH(project_id) + LENGTH(description) + LENGTH(severity)
             + COALESCE(LENGTH(recommendation), 0) + LENGTH(sync_status)
             + COALESCE(LENGTH(sync_error), 0)"
        }
        StoreKind::SyncQueue => {
            "LENGTH(id) + LENGTH(kind) + LENGTH(item_id) + LENGTH(status)
             + COALESCE(LENGTH(error), 0)"
        }
        StoreKind::CachedProjects => "LENGTH(id) + LENGTH(name) + LENGTH(data)",
        StoreKind::CachedComponents => {
            "LENGTH(id) + LENGTH(code) + LENGTH(name) + LENGTH(data)"
        }
        StoreKind::CachedAssets => {
            "LENGTH(id) + LENGTH(project_id) + LENGTH(name) + LENGTH(data)"
        }
        StoreKind::Metadata => "LENGTH(key) + LENGTH(value)",
    }
}

async fn measure_store(conn: &Connection, kind: StoreKind) -> Result<StoreUsage> {
    let sql = format!(
        "SELECT COUNT(*), COALESCE(SUM({expr}), 0) FROM {table}",
        expr = payload_expr(kind),
        table = kind.table()
    );

    let mut rows = conn.query(&sql, ()).await?;
    let (row_count, payload) = match rows.next().await? {
        Some(row) => (row.get::<i64>(0)?, row.get::<i64>(1)?),
        None => (0, 0),
    };

    let row_count = u64::try_from(row_count).unwrap_or(0);
    let payload = u64::try_from(payload).unwrap_or(0);

    Ok(StoreUsage {
        store: kind,
        rows: row_count,
        bytes: payload + row_count * ROW_OVERHEAD_BYTES,
    })
}

/// Measure live usage across every store.
pub async fn measure_usage(conn: &Connection, config: &EngineConfig) -> Result<StorageUsage> {
    let mut stores = Vec::with_capacity(StoreKind::ALL.len());
    let mut total_bytes = 0u64;

    for kind in StoreKind::ALL {
        let usage = measure_store(conn, kind).await?;
        total_bytes += usage.bytes;
        stores.push(usage);
    }

    Ok(StorageUsage {
        measured_at: now_ms(),
        limit_bytes: config.max_total_bytes(),
        total_bytes,
        stores,
    })
}
