//! Deficiency repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use libsql::Connection;

use super::page::{Page, PageDirection, PageRequest};
use super::{f64_or_null, opt_f64, opt_text, text_or_null};
use crate::error::{Error, Result};
use crate::models::{Deficiency, LocalId, SyncStatus};

/// Trait for deficiency storage operations (async)
#[allow(async_fn_in_trait)]
pub trait DeficiencyRepository {
    /// Insert or replace a deficiency
    async fn put(&self, deficiency: &Deficiency) -> Result<()>;

    /// Get a deficiency by offline id
    async fn get(&self, id: &LocalId) -> Result<Option<Deficiency>>;

    /// List deficiencies for a project, newest first
    async fn list_by_project(&self, project_id: &str) -> Result<Vec<Deficiency>>;

    /// List deficiencies for an assessment in capture order
    async fn list_by_assessment(&self, assessment_id: &str) -> Result<Vec<Deficiency>>;

    /// List deficiencies in a sync state, oldest first
    async fn list_by_status(&self, status: SyncStatus) -> Result<Vec<Deficiency>>;

    /// Fetch one page in key order
    async fn page(&self, request: &PageRequest) -> Result<Page<Deficiency>>;

    /// Delete a deficiency row
    async fn delete(&self, id: &LocalId) -> Result<()>;

    /// Point every deficiency of one assessment at a new assessment id
    async fn rekey_assessment(&self, from: &str, to: &str) -> Result<u64>;

    /// Count stored deficiencies
    async fn count(&self) -> Result<u64>;
}

/// libSQL implementation of `DeficiencyRepository`
pub struct LibSqlDeficiencyRepository<'a> {
    conn: &'a Connection,
}

const COLUMNS: &str = "id, server_id, assessment_id, project_id, description, severity, \
     recommendation, estimated_cost, sync_status, retry_count, sync_error, \
     created_at, updated_at";

impl<'a> LibSqlDeficiencyRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a deficiency from a database row
    fn parse(row: &libsql::Row) -> Result<Deficiency> {
        let id: String = row.get(0)?;
        let id = id
            .parse::<LocalId>()
            .map_err(|_| Error::CorruptLocalData(format!("invalid deficiency id: {id}")))?;
        let severity: String = row.get(5)?;
        let sync_status: String = row.get(8)?;
        let retry_count: i64 = row.get(9)?;

        Ok(Deficiency {
            id,
            server_id: opt_text(row, 1)?,
            assessment_id: row.get(2)?,
            project_id: row.get(3)?,
            description: row.get(4)?,
            severity: severity.parse()?,
            recommendation: opt_text(row, 6)?,
            estimated_cost: opt_f64(row, 7)?,
            sync_status: sync_status.parse()?,
            retry_count: u32::try_from(retry_count).unwrap_or(0),
            sync_error: opt_text(row, 10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    async fn collect(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Deficiency>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut deficiencies = Vec::new();
        while let Some(row) = rows.next().await? {
            deficiencies.push(Self::parse(&row)?);
        }
        Ok(deficiencies)
    }
}

impl DeficiencyRepository for LibSqlDeficiencyRepository<'_> {
    async fn put(&self, deficiency: &Deficiency) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO deficiencies
                 (id, server_id, assessment_id, project_id, description, severity,
                  recommendation, estimated_cost, sync_status, retry_count, sync_error,
                  created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                libsql::params![
                    deficiency.id.to_string(),
                    text_or_null(deficiency.server_id.as_deref()),
                    deficiency.assessment_id.as_str(),
                    deficiency.project_id.as_str(),
                    deficiency.description.as_str(),
                    deficiency.severity.as_str(),
                    text_or_null(deficiency.recommendation.as_deref()),
                    f64_or_null(deficiency.estimated_cost),
                    deficiency.sync_status.as_str(),
                    i64::from(deficiency.retry_count),
                    text_or_null(deficiency.sync_error.as_deref()),
                    deficiency.created_at,
                    deficiency.updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: &LocalId) -> Result<Option<Deficiency>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {COLUMNS} FROM deficiencies WHERE id = ?"),
                [id.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_by_project(&self, project_id: &str) -> Result<Vec<Deficiency>> {
        self.collect(
            &format!(
                "SELECT {COLUMNS} FROM deficiencies
                 WHERE project_id = ?
                 ORDER BY created_at DESC"
            ),
            [project_id],
        )
        .await
    }

    async fn list_by_assessment(&self, assessment_id: &str) -> Result<Vec<Deficiency>> {
        self.collect(
            &format!(
                "SELECT {COLUMNS} FROM deficiencies
                 WHERE assessment_id = ?
                 ORDER BY created_at ASC"
            ),
            [assessment_id],
        )
        .await
    }

    async fn list_by_status(&self, status: SyncStatus) -> Result<Vec<Deficiency>> {
        self.collect(
            &format!(
                "SELECT {COLUMNS} FROM deficiencies
                 WHERE sync_status = ?
                 ORDER BY created_at ASC"
            ),
            [status.as_str()],
        )
        .await
    }

    async fn page(&self, request: &PageRequest) -> Result<Page<Deficiency>> {
        let sql = match request.direction {
            PageDirection::Forward => format!(
                "SELECT {COLUMNS} FROM deficiencies
                 WHERE (? IS NULL OR id > ?)
                 ORDER BY id ASC LIMIT ?"
            ),
            PageDirection::Backward => format!(
                "SELECT {COLUMNS} FROM deficiencies
                 WHERE (? IS NULL OR id < ?)
                 ORDER BY id DESC LIMIT ?"
            ),
        };

        let cursor = text_or_null(request.cursor.as_deref());
        let rows = self
            .collect(
                &sql,
                libsql::params![cursor.clone(), cursor, (request.limit + 1) as i64],
            )
            .await?;

        Ok(Page::from_rows(rows, request.limit, |d| d.id.to_string()))
    }

    async fn delete(&self, id: &LocalId) -> Result<()> {
        let rows = self
            .conn
            .execute("DELETE FROM deficiencies WHERE id = ?", [id.to_string()])
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        Ok(())
    }

    async fn rekey_assessment(&self, from: &str, to: &str) -> Result<u64> {
        let rows = self
            .conn
            .execute(
                "UPDATE deficiencies SET assessment_id = ? WHERE assessment_id = ?",
                [to, from],
            )
            .await?;
        Ok(rows)
    }

    async fn count(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM deficiencies", ())
            .await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;

    use crate::db::Database;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_get_roundtrip() {
        let db = setup().await;
        let repo = LibSqlDeficiencyRepository::new(db.connection());

        let deficiency = Deficiency::new("offline-parent", "proj-1", "Spalling", Severity::High)
            .with_recommendation("Patch and seal")
            .with_estimated_cost(850.5);
        repo.put(&deficiency).await.unwrap();

        let loaded = repo.get(&deficiency.id).await.unwrap().unwrap();
        assert_eq!(loaded, deficiency);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_by_assessment_and_rekey() {
        let db = setup().await;
        let repo = LibSqlDeficiencyRepository::new(db.connection());

        repo.put(&Deficiency::new(
            "offline-123",
            "proj-1",
            "Crack",
            Severity::Low,
        ))
        .await
        .unwrap();
        repo.put(&Deficiency::new(
            "offline-123",
            "proj-1",
            "Rust",
            Severity::Medium,
        ))
        .await
        .unwrap();

        assert_eq!(repo.list_by_assessment("offline-123").await.unwrap().len(), 2);

        let rekeyed = repo.rekey_assessment("offline-123", "987").await.unwrap();
        assert_eq!(rekeyed, 2);
        assert_eq!(repo.list_by_assessment("987").await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_status_listing_oldest_first() {
        let db = setup().await;
        let repo = LibSqlDeficiencyRepository::new(db.connection());

        let mut first = Deficiency::new("a", "proj-1", "One", Severity::Low);
        first.created_at = 100;
        let mut second = Deficiency::new("a", "proj-1", "Two", Severity::Low);
        second.created_at = 200;

        repo.put(&second).await.unwrap();
        repo.put(&first).await.unwrap();

        let pending = repo.list_by_status(SyncStatus::Pending).await.unwrap();
        assert_eq!(pending[0].description, "One");
        assert_eq!(pending[1].description, "Two");
    }
}
