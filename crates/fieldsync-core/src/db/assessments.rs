//! Assessment repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use libsql::Connection;

use super::page::{Page, PageDirection, PageRequest};
use super::{i64_or_null, opt_i64, opt_text, text_or_null};
use crate::error::{Error, Result};
use crate::models::{Assessment, LocalId, SyncStatus};

/// Trait for assessment storage operations (async)
#[allow(async_fn_in_trait)]
pub trait AssessmentRepository {
    /// Insert or replace an assessment
    async fn put(&self, assessment: &Assessment) -> Result<()>;

    /// Get an assessment by offline id
    async fn get(&self, id: &LocalId) -> Result<Option<Assessment>>;

    /// List every assessment, newest first
    async fn get_all(&self) -> Result<Vec<Assessment>>;

    /// List assessments for a project, newest first
    async fn list_by_project(&self, project_id: &str) -> Result<Vec<Assessment>>;

    /// List assessments for an asset, newest first
    async fn list_by_asset(&self, asset_id: &str) -> Result<Vec<Assessment>>;

    /// List assessments in a sync state, oldest first
    async fn list_by_status(&self, status: SyncStatus) -> Result<Vec<Assessment>>;

    /// List assessments for a project in a sync state, oldest first
    async fn list_by_project_status(
        &self,
        project_id: &str,
        status: SyncStatus,
    ) -> Result<Vec<Assessment>>;

    /// Fetch one page in key order
    async fn page(&self, request: &PageRequest) -> Result<Page<Assessment>>;

    /// Delete an assessment row
    async fn delete(&self, id: &LocalId) -> Result<()>;

    /// Count stored assessments
    async fn count(&self) -> Result<u64>;
}

/// libSQL implementation of `AssessmentRepository`
pub struct LibSqlAssessmentRepository<'a> {
    conn: &'a Connection,
}

const COLUMNS: &str = "id, server_id, project_id, asset_id, component_code, title, \
     condition_rating, notes, inspector, sync_status, retry_count, sync_error, \
     created_at, updated_at";

impl<'a> LibSqlAssessmentRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse an assessment from a database row
    fn parse(row: &libsql::Row) -> Result<Assessment> {
        let id: String = row.get(0)?;
        let id = id
            .parse::<LocalId>()
            .map_err(|_| Error::CorruptLocalData(format!("invalid assessment id: {id}")))?;
        let sync_status: String = row.get(9)?;
        let retry_count: i64 = row.get(10)?;

        Ok(Assessment {
            id,
            server_id: opt_text(row, 1)?,
            project_id: row.get(2)?,
            asset_id: opt_text(row, 3)?,
            component_code: opt_text(row, 4)?,
            title: row.get(5)?,
            condition_rating: opt_i64(row, 6)?,
            notes: opt_text(row, 7)?,
            inspector: opt_text(row, 8)?,
            sync_status: sync_status.parse()?,
            retry_count: u32::try_from(retry_count).unwrap_or(0),
            sync_error: opt_text(row, 11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    async fn collect(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<Vec<Assessment>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut assessments = Vec::new();
        while let Some(row) = rows.next().await? {
            assessments.push(Self::parse(&row)?);
        }
        Ok(assessments)
    }
}

impl AssessmentRepository for LibSqlAssessmentRepository<'_> {
    async fn put(&self, assessment: &Assessment) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO assessments
                 (id, server_id, project_id, asset_id, component_code, title,
                  condition_rating, notes, inspector, sync_status, retry_count, sync_error,
                  created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                libsql::params![
                    assessment.id.to_string(),
                    text_or_null(assessment.server_id.as_deref()),
                    assessment.project_id.as_str(),
                    text_or_null(assessment.asset_id.as_deref()),
                    text_or_null(assessment.component_code.as_deref()),
                    assessment.title.as_str(),
                    i64_or_null(assessment.condition_rating),
                    text_or_null(assessment.notes.as_deref()),
                    text_or_null(assessment.inspector.as_deref()),
                    assessment.sync_status.as_str(),
                    i64::from(assessment.retry_count),
                    text_or_null(assessment.sync_error.as_deref()),
                    assessment.created_at,
                    assessment.updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: &LocalId) -> Result<Option<Assessment>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {COLUMNS} FROM assessments WHERE id = ?"),
                [id.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_all(&self) -> Result<Vec<Assessment>> {
        self.collect(
            &format!("SELECT {COLUMNS} FROM assessments ORDER BY created_at DESC"),
            (),
        )
        .await
    }

    async fn list_by_project(&self, project_id: &str) -> Result<Vec<Assessment>> {
        self.collect(
            &format!(
                "SELECT {COLUMNS} FROM assessments
                 WHERE project_id = ?
                 ORDER BY created_at DESC"
            ),
            [project_id],
        )
        .await
    }

    async fn list_by_asset(&self, asset_id: &str) -> Result<Vec<Assessment>> {
        self.collect(
            &format!(
                "SELECT {COLUMNS} FROM assessments
                 WHERE asset_id = ?
                 ORDER BY created_at DESC"
            ),
            [asset_id],
        )
        .await
    }

    async fn list_by_status(&self, status: SyncStatus) -> Result<Vec<Assessment>> {
        self.collect(
            &format!(
                "SELECT {COLUMNS} FROM assessments
                 WHERE sync_status = ?
                 ORDER BY created_at ASC"
            ),
            [status.as_str()],
        )
        .await
    }

    async fn list_by_project_status(
        &self,
        project_id: &str,
        status: SyncStatus,
    ) -> Result<Vec<Assessment>> {
        self.collect(
            &format!(
                "SELECT {COLUMNS} FROM assessments
                 WHERE project_id = ? AND sync_status = ?
                 ORDER BY created_at ASC"
            ),
            [project_id, status.as_str()],
        )
        .await
    }

    async fn page(&self, request: &PageRequest) -> Result<Page<Assessment>> {
        let sql = match request.direction {
            PageDirection::Forward => format!(
                "SELECT {COLUMNS} FROM assessments
                 WHERE (? IS NULL OR id > ?)
                 ORDER BY id ASC LIMIT ?"
            ),
            PageDirection::Backward => format!(
                "SELECT {COLUMNS} FROM assessments
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

        Ok(Page::from_rows(rows, request.limit, |a| a.id.to_string()))
    }

    async fn delete(&self, id: &LocalId) -> Result<()> {
        let rows = self
            .conn
            .execute("DELETE FROM assessments WHERE id = ?", [id.to_string()])
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM assessments", ())
            .await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
