//! Database layer for Fieldsync

mod assessments;
mod batch;
mod cache;
mod conflicts;
mod connection;
mod deficiencies;
mod metadata;
mod migrations;
mod page;
mod photos;
mod queue;

pub use assessments::{AssessmentRepository, LibSqlAssessmentRepository};
pub use batch::{execute_batch, BatchOp};
pub use cache::{CacheRepository, LibSqlCacheRepository};
pub use conflicts::{ConflictRepository, LibSqlConflictRepository};
pub use connection::Database;
pub use deficiencies::{DeficiencyRepository, LibSqlDeficiencyRepository};
pub use metadata::{LibSqlMetadataRepository, MetadataRepository};
pub use page::{Page, PageDirection, PageRequest};
pub use photos::{EvictionCandidate, LibSqlPhotoRepository, PhotoRepository};
pub use queue::{LibSqlQueueRepository, QueueRepository};

use libsql::Value;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Closed set of stores the engine persists into.
///
/// Every operation names its store through this enum, so a typo in a table
/// name is a compile error rather than a runtime surprise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Assessments,
    Photos,
    Deficiencies,
    SyncQueue,
    CachedProjects,
    CachedComponents,
    CachedAssets,
    Metadata,
}

impl StoreKind {
    pub const ALL: [Self; 8] = [
        Self::Assessments,
        Self::Photos,
        Self::Deficiencies,
        Self::SyncQueue,
        Self::CachedProjects,
        Self::CachedComponents,
        Self::CachedAssets,
        Self::Metadata,
    ];

    /// Table name backing this store.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Assessments => "assessments",
            Self::Photos => "photos",
            Self::Deficiencies => "deficiencies",
            Self::SyncQueue => "sync_queue",
            Self::CachedProjects => "cached_projects",
            Self::CachedComponents => "cached_components",
            Self::CachedAssets => "cached_assets",
            Self::Metadata => "metadata",
        }
    }
}

/// Read a nullable TEXT column.
pub(crate) fn opt_text(row: &libsql::Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Text(text) => Ok(Some(text)),
        other => Err(Error::CorruptLocalData(format!(
            "expected text in column {idx}, found {other:?}"
        ))),
    }
}

/// Read a nullable INTEGER column.
pub(crate) fn opt_i64(row: &libsql::Row, idx: i32) -> Result<Option<i64>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Integer(value) => Ok(Some(value)),
        other => Err(Error::CorruptLocalData(format!(
            "expected integer in column {idx}, found {other:?}"
        ))),
    }
}

/// Read a nullable REAL column.
///
/// SQLite stores whole-number reals with integer affinity, so both storage
/// classes are accepted.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn opt_f64(row: &libsql::Row, idx: i32) -> Result<Option<f64>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Real(value) => Ok(Some(value)),
        Value::Integer(value) => Ok(Some(value as f64)),
        other => Err(Error::CorruptLocalData(format!(
            "expected real in column {idx}, found {other:?}"
        ))),
    }
}

/// Read a nullable BLOB column.
pub(crate) fn opt_blob(row: &libsql::Row, idx: i32) -> Result<Option<Vec<u8>>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Blob(bytes) => Ok(Some(bytes)),
        other => Err(Error::CorruptLocalData(format!(
            "expected blob in column {idx}, found {other:?}"
        ))),
    }
}

/// Bind an optional string as TEXT or NULL.
pub(crate) fn text_or_null(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |text| Value::Text(text.to_string()))
}

/// Bind an optional integer as INTEGER or NULL.
pub(crate) fn i64_or_null(value: Option<i64>) -> Value {
    value.map_or(Value::Null, Value::Integer)
}

/// Bind an optional float as REAL or NULL.
pub(crate) fn f64_or_null(value: Option<f64>) -> Value {
    value.map_or(Value::Null, Value::Real)
}

/// Bind an optional byte slice as BLOB or NULL.
pub(crate) fn blob_or_null(value: Option<&[u8]>) -> Value {
    value.map_or(Value::Null, |bytes| Value::Blob(bytes.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_kind_tables_are_distinct() {
        let mut tables: Vec<&str> = StoreKind::ALL.iter().map(|kind| kind.table()).collect();
        tables.sort_unstable();
        tables.dedup();
        assert_eq!(tables.len(), StoreKind::ALL.len());
    }

    #[test]
    fn null_binders_produce_null() {
        assert!(matches!(text_or_null(None), Value::Null));
        assert!(matches!(i64_or_null(None), Value::Null));
        assert!(matches!(f64_or_null(None), Value::Null));
        assert!(matches!(blob_or_null(None), Value::Null));
        assert!(matches!(text_or_null(Some("x")), Value::Text(_)));
        assert!(matches!(blob_or_null(Some(&[1u8])), Value::Blob(_)));
    }
}
