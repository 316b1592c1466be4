//! Conflict audit trail repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use libsql::Connection;

use super::{opt_text, text_or_null};
use crate::error::Result;
use crate::models::{ConflictRecord, ConflictResolution};

/// Trait for conflict record storage operations (async)
#[allow(async_fn_in_trait)]
pub trait ConflictRepository {
    /// Insert a conflict record, returning its assigned row id
    async fn insert(&self, record: &ConflictRecord) -> Result<i64>;

    /// List conflicts newest first
    async fn list_recent(&self, limit: usize) -> Result<Vec<ConflictRecord>>;

    /// List conflicts recorded for one item, newest first
    async fn list_for_item(&self, item_id: &str) -> Result<Vec<ConflictRecord>>;

    /// List conflicts that still need a human decision, newest first
    async fn list_manual(&self) -> Result<Vec<ConflictRecord>>;
}

/// libSQL implementation of `ConflictRepository`
pub struct LibSqlConflictRepository<'a> {
    conn: &'a Connection,
}

const COLUMNS: &str = "id, item_id, item_type, local_version, server_version, resolution, \
     merged_version, conflicting_fields, resolved_at";

impl<'a> LibSqlConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a conflict record from a database row
    fn parse(row: &libsql::Row) -> Result<ConflictRecord> {
        let item_type: String = row.get(2)?;
        let local_version: String = row.get(3)?;
        let server_version: String = row.get(4)?;
        let resolution: String = row.get(5)?;
        let merged_version = opt_text(row, 6)?
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?;
        let conflicting_fields: String = row.get(7)?;

        Ok(ConflictRecord {
            id: row.get(0)?,
            item_id: row.get(1)?,
            item_type: item_type.parse()?,
            local_version: serde_json::from_str(&local_version)?,
            server_version: serde_json::from_str(&server_version)?,
            resolution: resolution.parse()?,
            merged_version,
            conflicting_fields: serde_json::from_str(&conflicting_fields)?,
            resolved_at: row.get(8)?,
        })
    }

    async fn collect(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<ConflictRecord>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse(&row)?);
        }
        Ok(records)
    }
}

impl ConflictRepository for LibSqlConflictRepository<'_> {
    async fn insert(&self, record: &ConflictRecord) -> Result<i64> {
        let merged = record
            .merged_version
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn
            .execute(
                "INSERT INTO sync_conflicts
                 (item_id, item_type, local_version, server_version, resolution,
                  merged_version, conflicting_fields, resolved_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                libsql::params![
                    record.item_id.as_str(),
                    record.item_type.as_str(),
                    serde_json::to_string(&record.local_version)?,
                    serde_json::to_string(&record.server_version)?,
                    record.resolution.as_str(),
                    text_or_null(merged.as_deref()),
                    serde_json::to_string(&record.conflicting_fields)?,
                    record.resolved_at,
                ],
            )
            .await?;

        Ok(self.conn.last_insert_rowid())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<ConflictRecord>> {
        self.collect(
            &format!(
                "SELECT {COLUMNS} FROM sync_conflicts
                 ORDER BY resolved_at DESC, id DESC
                 LIMIT ?"
            ),
            [limit as i64],
        )
        .await
    }

    async fn list_for_item(&self, item_id: &str) -> Result<Vec<ConflictRecord>> {
        self.collect(
            &format!(
                "SELECT {COLUMNS} FROM sync_conflicts
                 WHERE item_id = ?
                 ORDER BY resolved_at DESC, id DESC"
            ),
            [item_id],
        )
        .await
    }

    async fn list_manual(&self) -> Result<Vec<ConflictRecord>> {
        self.collect(
            &format!(
                "SELECT {COLUMNS} FROM sync_conflicts
                 WHERE resolution = ?
                 ORDER BY resolved_at DESC, id DESC"
            ),
            [ConflictResolution::Manual.as_str()],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::RecordKind;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_insert_assigns_row_id_and_roundtrips() {
        let db = setup().await;
        let repo = LibSqlConflictRepository::new(db.connection());

        let record = ConflictRecord::new(
            "offline-abc",
            RecordKind::Assessment,
            serde_json::json!({"notes": "ok, fixed leak"}),
            serde_json::json!({"notes": "ok, repainted"}),
            ConflictResolution::Merged,
        )
        .with_merge(
            serde_json::json!({"notes": "ok, fixed leak"}),
            vec!["notes".to_string()],
        );

        let id = repo.insert(&record).await.unwrap();
        assert!(id > 0);

        let loaded = repo.list_for_item("offline-abc").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, id);
        assert_eq!(loaded[0].conflicting_fields, vec!["notes"]);
        assert_eq!(loaded[0].resolution, ConflictResolution::Merged);
        assert_eq!(
            loaded[0].merged_version,
            Some(serde_json::json!({"notes": "ok, fixed leak"}))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_manual_listing_filters_resolution() {
        let db = setup().await;
        let repo = LibSqlConflictRepository::new(db.connection());

        repo.insert(&ConflictRecord::new(
            "offline-a",
            RecordKind::Assessment,
            serde_json::json!({}),
            serde_json::json!({}),
            ConflictResolution::ServerWins,
        ))
        .await
        .unwrap();
        repo.insert(&ConflictRecord::new(
            "offline-b",
            RecordKind::Deficiency,
            serde_json::json!({}),
            serde_json::json!({}),
            ConflictResolution::Manual,
        ))
        .await
        .unwrap();

        let manual = repo.list_manual().await.unwrap();
        assert_eq!(manual.len(), 1);
        assert_eq!(manual[0].item_id, "offline-b");

        assert_eq!(repo.list_recent(10).await.unwrap().len(), 2);
    }
}
