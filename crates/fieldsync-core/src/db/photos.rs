//! Photo repository implementation
//!
//! Photos are the only store carrying binary payloads, so this repository
//! also answers the byte-accounting queries the storage governor runs.

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use libsql::Connection;

use super::page::{Page, PageDirection, PageRequest};
use super::{blob_or_null, f64_or_null, opt_blob, opt_f64, opt_text, text_or_null};
use crate::error::{Error, Result};
use crate::models::{GeoPoint, LocalId, Photo, SyncStatus};

/// A synced photo eligible for eviction, cheapest queries first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub id: LocalId,
    /// Binary payload size (compressed plus retained original)
    pub bytes: u64,
    pub created_at: i64,
}

/// Trait for photo storage operations (async)
#[allow(async_fn_in_trait)]
pub trait PhotoRepository {
    /// Insert or replace a photo
    async fn put(&self, photo: &Photo) -> Result<()>;

    /// Get a photo by offline id
    async fn get(&self, id: &LocalId) -> Result<Option<Photo>>;

    /// List photos for an assessment in capture order
    async fn list_by_assessment(&self, assessment_id: &str) -> Result<Vec<Photo>>;

    /// List photos for a project, newest first
    async fn list_by_project(&self, project_id: &str) -> Result<Vec<Photo>>;

    /// List photos in a sync state, oldest first
    async fn list_by_status(&self, status: SyncStatus) -> Result<Vec<Photo>>;

    /// Fetch one page in key order
    async fn page(&self, request: &PageRequest) -> Result<Page<Photo>>;

    /// Delete a photo row
    async fn delete(&self, id: &LocalId) -> Result<()>;

    /// Delete many photo rows, returning how many existed
    async fn delete_many(&self, ids: &[LocalId]) -> Result<u64>;

    /// Point every photo of one assessment at a new assessment id
    async fn rekey_assessment(&self, from: &str, to: &str) -> Result<u64>;

    /// Sum of all binary payload bytes across the store
    async fn total_payload_bytes(&self) -> Result<u64>;

    /// Synced photos in eviction order (oldest created first)
    async fn synced_candidates_oldest_first(&self) -> Result<Vec<EvictionCandidate>>;

    /// Delete synced photos created before the cutoff, returning the count
    async fn purge_synced_older_than(&self, cutoff: i64) -> Result<u64>;

    /// Count stored photos
    async fn count(&self) -> Result<u64>;
}

/// libSQL implementation of `PhotoRepository`
pub struct LibSqlPhotoRepository<'a> {
    conn: &'a Connection,
}

const COLUMNS: &str = "id, server_id, assessment_id, project_id, caption, content_type, \
     compressed, original, width, height, latitude, longitude, accuracy_m, remote_url, \
     sync_status, retry_count, sync_error, created_at, updated_at";

impl<'a> LibSqlPhotoRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a photo from a database row
    fn parse(row: &libsql::Row) -> Result<Photo> {
        let id: String = row.get(0)?;
        let id = id
            .parse::<LocalId>()
            .map_err(|_| Error::CorruptLocalData(format!("invalid photo id: {id}")))?;
        let compressed = opt_blob(row, 6)?
            .ok_or_else(|| Error::CorruptLocalData(format!("photo {id} has no payload")))?;
        let width: i64 = row.get(8)?;
        let height: i64 = row.get(9)?;
        let latitude = opt_f64(row, 10)?;
        let longitude = opt_f64(row, 11)?;
        let location = match (latitude, longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoPoint {
                latitude,
                longitude,
                accuracy_m: opt_f64(row, 12)?,
            }),
            _ => None,
        };
        let sync_status: String = row.get(14)?;
        let retry_count: i64 = row.get(15)?;

        Ok(Photo {
            id,
            server_id: opt_text(row, 1)?,
            assessment_id: row.get(2)?,
            project_id: row.get(3)?,
            caption: opt_text(row, 4)?,
            content_type: row.get(5)?,
            compressed,
            original: opt_blob(row, 7)?,
            width: u32::try_from(width).unwrap_or(0),
            height: u32::try_from(height).unwrap_or(0),
            location,
            remote_url: opt_text(row, 13)?,
            sync_status: sync_status.parse()?,
            retry_count: u32::try_from(retry_count).unwrap_or(0),
            sync_error: opt_text(row, 16)?,
            created_at: row.get(17)?,
            updated_at: row.get(18)?,
        })
    }

    async fn collect(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Photo>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut photos = Vec::new();
        while let Some(row) = rows.next().await? {
            photos.push(Self::parse(&row)?);
        }
        Ok(photos)
    }
}

impl PhotoRepository for LibSqlPhotoRepository<'_> {
    async fn put(&self, photo: &Photo) -> Result<()> {
        let (latitude, longitude, accuracy_m) = photo.location.map_or((None, None, None), |loc| {
            (Some(loc.latitude), Some(loc.longitude), loc.accuracy_m)
        });

        self.conn
            .execute(
                "INSERT OR REPLACE INTO photos
                 (id, server_id, assessment_id, project_id, caption, content_type,
                  compressed, original, width, height, latitude, longitude, accuracy_m,
                  remote_url, sync_status, retry_count, sync_error, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                libsql::params![
                    photo.id.to_string(),
                    text_or_null(photo.server_id.as_deref()),
                    photo.assessment_id.as_str(),
                    photo.project_id.as_str(),
                    text_or_null(photo.caption.as_deref()),
                    photo.content_type.as_str(),
                    photo.compressed.clone(),
                    blob_or_null(photo.original.as_deref()),
                    i64::from(photo.width),
                    i64::from(photo.height),
                    f64_or_null(latitude),
                    f64_or_null(longitude),
                    f64_or_null(accuracy_m),
                    text_or_null(photo.remote_url.as_deref()),
                    photo.sync_status.as_str(),
                    i64::from(photo.retry_count),
                    text_or_null(photo.sync_error.as_deref()),
                    photo.created_at,
                    photo.updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: &LocalId) -> Result<Option<Photo>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {COLUMNS} FROM photos WHERE id = ?"),
                [id.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_by_assessment(&self, assessment_id: &str) -> Result<Vec<Photo>> {
        self.collect(
            &format!(
                "SELECT {COLUMNS} FROM photos
                 WHERE assessment_id = ?
                 ORDER BY created_at ASC"
            ),
            [assessment_id],
        )
        .await
    }

    async fn list_by_project(&self, project_id: &str) -> Result<Vec<Photo>> {
        self.collect(
            &format!(
                "SELECT {COLUMNS} FROM photos
                 WHERE project_id = ?
                 ORDER BY created_at DESC"
            ),
            [project_id],
        )
        .await
    }

    async fn list_by_status(&self, status: SyncStatus) -> Result<Vec<Photo>> {
        self.collect(
            &format!(
                "SELECT {COLUMNS} FROM photos
                 WHERE sync_status = ?
                 ORDER BY created_at ASC"
            ),
            [status.as_str()],
        )
        .await
    }

    async fn page(&self, request: &PageRequest) -> Result<Page<Photo>> {
        let sql = match request.direction {
            PageDirection::Forward => format!(
                "SELECT {COLUMNS} FROM photos
                 WHERE (? IS NULL OR id > ?)
                 ORDER BY id ASC LIMIT ?"
            ),
            PageDirection::Backward => format!(
                "SELECT {COLUMNS} FROM photos
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

        Ok(Page::from_rows(rows, request.limit, |p| p.id.to_string()))
    }

    async fn delete(&self, id: &LocalId) -> Result<()> {
        let rows = self
            .conn
            .execute("DELETE FROM photos WHERE id = ?", [id.to_string()])
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        Ok(())
    }

    async fn delete_many(&self, ids: &[LocalId]) -> Result<u64> {
        let mut deleted = 0;
        for id in ids {
            deleted += self
                .conn
                .execute("DELETE FROM photos WHERE id = ?", [id.to_string()])
                .await?;
        }
        Ok(deleted)
    }

    async fn rekey_assessment(&self, from: &str, to: &str) -> Result<u64> {
        let rows = self
            .conn
            .execute(
                "UPDATE photos SET assessment_id = ? WHERE assessment_id = ?",
                [to, from],
            )
            .await?;
        Ok(rows)
    }

    async fn total_payload_bytes(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COALESCE(SUM(LENGTH(compressed) + COALESCE(LENGTH(original), 0)), 0)
                 FROM photos",
                (),
            )
            .await?;
        let total: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(u64::try_from(total).unwrap_or(0))
    }

    async fn synced_candidates_oldest_first(&self) -> Result<Vec<EvictionCandidate>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, LENGTH(compressed) + COALESCE(LENGTH(original), 0), created_at
                 FROM photos
                 WHERE sync_status = ?
                 ORDER BY created_at ASC",
                [SyncStatus::Synced.as_str()],
            )
            .await?;

        let mut candidates = Vec::new();
        while let Some(row) = rows.next().await? {
            let id: String = row.get(0)?;
            let id = id
                .parse::<LocalId>()
                .map_err(|_| Error::CorruptLocalData(format!("invalid photo id: {id}")))?;
            let bytes: i64 = row.get(1)?;
            candidates.push(EvictionCandidate {
                id,
                bytes: u64::try_from(bytes).unwrap_or(0),
                created_at: row.get(2)?,
            });
        }
        Ok(candidates)
    }

    async fn purge_synced_older_than(&self, cutoff: i64) -> Result<u64> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM photos WHERE sync_status = ? AND created_at < ?",
                libsql::params![SyncStatus::Synced.as_str(), cutoff],
            )
            .await?;
        Ok(rows)
    }

    async fn count(&self) -> Result<u64> {
        let mut rows = self.conn.query("SELECT COUNT(*) FROM photos", ()).await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
