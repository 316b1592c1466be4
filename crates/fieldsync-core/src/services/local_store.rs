//! Thread-safe local store facade used across clients.
//!
//! Wraps the database behind one mutex so collaborator writes and sync-run
//! writes serialize cleanly. Repositories are constructed per call against
//! the held connection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::db::{
    execute_batch, AssessmentRepository, BatchOp, CacheRepository, ConflictRepository, Database,
    DeficiencyRepository, EvictionCandidate, LibSqlAssessmentRepository, LibSqlCacheRepository,
    LibSqlConflictRepository, LibSqlDeficiencyRepository, LibSqlMetadataRepository,
    LibSqlPhotoRepository, LibSqlQueueRepository, MetadataRepository, Page, PageRequest,
    PhotoRepository, QueueRepository,
};
use crate::error::{Error, Result};
use crate::models::{
    Assessment, CachedAsset, CachedComponent, CachedProject, ConflictRecord, Deficiency, LocalId,
    Photo, QueueItem, QueueStatus, RecordKind, SyncStatus,
};
use crate::storage::{QuotaState, StorageUsage};
use crate::util::now_ms;

const KEY_LAST_SYNC_AT: &str = "last_sync_at";
const KEY_QUOTA_STATE: &str = "quota_state";
const KEY_USAGE_SNAPSHOT: &str = "usage_snapshot";
const ACCESS_PREFIX: &str = "access:";

/// Thread-safe facade over the record stores, queue, caches and metadata.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    config: EngineConfig,
}

impl LocalStore {
    /// Open a store at the given filesystem path, creating parents as needed.
    pub async fn open_path(db_path: impl Into<PathBuf>, config: EngineConfig) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path).await?;
        Self::recover_interrupted_run(&db).await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
            config,
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory(config: EngineConfig) -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Self::recover_interrupted_run(&db).await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
            config,
        })
    }

    /// Queue items left `processing` by a crashed run go back to `pending`,
    /// keeping their attempt count so backoff still accounts for them.
    async fn recover_interrupted_run(db: &Database) -> Result<()> {
        let requeued = LibSqlQueueRepository::new(db.connection())
            .requeue_interrupted()
            .await?;
        if requeued > 0 {
            tracing::info!("Requeued {requeued} sync items from an interrupted run");
        }
        Ok(())
    }

    /// Engine configuration this store was opened with.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn is_corrupted_db_error(error: &Error) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("file is not a database")
            || message.contains("database disk image is malformed")
    }

    fn is_connection_broken(error: &Error) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("connection closed") || message.contains("connection failed")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = now_ms();
            let backup_name = format!("fieldsync.db.corrupt-{timestamp}");
            let backup_path = db_path.with_file_name(backup_name);

            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local DB file from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        let Some(parent) = db_path.parent() else {
            return Ok(());
        };
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };
        let sidecar_prefix = format!("{base_name}-");

        for entry in std::fs::read_dir(parent)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with(&sidecar_prefix) {
                let path = entry.path();
                std::fs::remove_file(&path)?;
                tracing::warn!("Removed stale sidecar file {}", path.display());
            }
        }

        Ok(())
    }

    /// Swap in a fresh database after the current file proved unusable.
    async fn reopen_after_corruption(&self) -> Result<bool> {
        let Some(db_path) = self.db_path.clone() else {
            return Ok(false);
        };

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::warn!(
            "Detected invalid local DB file; reopening at {}",
            db_path.display()
        );

        {
            let mut db = self.db.lock().await;
            let placeholder = Database::open_in_memory().await?;
            let _old = std::mem::replace(&mut *db, placeholder);
        }

        Self::quarantine_corrupted_db_files(&db_path)?;
        let reopened = Database::open(&db_path).await?;
        let mut db = self.db.lock().await;
        *db = reopened;
        Ok(true)
    }

    /// Re-establish a dropped connection on the existing database handle.
    async fn reconnect(&self) -> Result<()> {
        let mut db = self.db.lock().await;
        db.reconnect()
    }

    /// Refuse collaborator writes while the quota governor has us blocked.
    async fn ensure_writable(&self) -> Result<()> {
        if self.quota_state().await? == QuotaState::Blocked {
            return Err(Error::QuotaExceeded(
                "local storage is at capacity; sync or clean up before writing".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the batch for a record write: the row itself, plus a queue item
    /// when the record is unsynced and not yet tracked.
    async fn enqueue_op_for(
        &self,
        kind: RecordKind,
        item_id: &str,
        status: SyncStatus,
    ) -> Result<Option<BatchOp>> {
        if status == SyncStatus::Synced {
            return Ok(None);
        }

        let db = self.db.lock().await;
        let existing = LibSqlQueueRepository::new(db.connection())
            .get_by_item(item_id)
            .await?;
        if existing.is_some() {
            return Ok(None);
        }
        Ok(Some(BatchOp::PutQueueItem(QueueItem::new(kind, item_id))))
    }

    // ----- assessments -----

    /// Persist an assessment and track it for sync, atomically.
    pub async fn save_assessment(&self, assessment: &Assessment) -> Result<()> {
        self.ensure_writable().await?;

        let enqueue = self
            .enqueue_op_for(
                RecordKind::Assessment,
                &assessment.id.to_string(),
                assessment.sync_status,
            )
            .await?;
        let mut ops = vec![BatchOp::PutAssessment(assessment.clone())];
        ops.extend(enqueue);

        let first_attempt = self.execute_batch(&ops).await;
        match first_attempt {
            Ok(()) => Ok(()),
            Err(error) if Self::is_corrupted_db_error(&error) => {
                if self.reopen_after_corruption().await? {
                    self.execute_batch(&ops).await
                } else {
                    Err(error)
                }
            }
            Err(error) if Self::is_connection_broken(&error) => {
                self.reconnect().await?;
                self.execute_batch(&ops).await
            }
            Err(error) => Err(error),
        }
    }

    /// Fetch an assessment by offline id.
    pub async fn get_assessment(&self, id: &LocalId) -> Result<Option<Assessment>> {
        let db = self.db.lock().await;
        LibSqlAssessmentRepository::new(db.connection()).get(id).await
    }

    /// List assessments for a project, newest first.
    pub async fn list_assessments(&self, project_id: &str) -> Result<Vec<Assessment>> {
        let db = self.db.lock().await;
        LibSqlAssessmentRepository::new(db.connection())
            .list_by_project(project_id)
            .await
    }

    /// List assessments in a sync state, oldest first.
    pub async fn assessments_by_status(&self, status: SyncStatus) -> Result<Vec<Assessment>> {
        let db = self.db.lock().await;
        LibSqlAssessmentRepository::new(db.connection())
            .list_by_status(status)
            .await
    }

    /// Page through assessments in key order.
    pub async fn assessments_page(&self, request: &PageRequest) -> Result<Page<Assessment>> {
        let db = self.db.lock().await;
        LibSqlAssessmentRepository::new(db.connection())
            .page(request)
            .await
    }

    /// Delete an assessment and its queue tracking.
    pub async fn delete_assessment(&self, id: &LocalId) -> Result<()> {
        self.execute_batch(&[
            BatchOp::DeleteAssessment(*id),
            BatchOp::DeleteQueueItemsFor {
                item_id: id.to_string(),
            },
        ])
        .await
    }

    // ----- photos -----

    /// Persist a photo and track it for sync, atomically.
    ///
    /// Rejects payloads over the per-photo ceiling; compression should have
    /// brought them under it before this point.
    pub async fn save_photo(&self, photo: &Photo) -> Result<()> {
        self.ensure_writable().await?;

        if photo.payload_bytes() > self.config.max_photo_bytes() {
            return Err(Error::Validation(format!(
                "photo {} is {} bytes, over the {} MB per-photo limit",
                photo.id,
                photo.payload_bytes(),
                self.config.max_photo_size_mb
            )));
        }

        let enqueue = self
            .enqueue_op_for(RecordKind::Photo, &photo.id.to_string(), photo.sync_status)
            .await?;
        let mut ops = vec![BatchOp::PutPhoto(Box::new(photo.clone()))];
        ops.extend(enqueue);

        let first_attempt = self.execute_batch(&ops).await;
        match first_attempt {
            Ok(()) => Ok(()),
            Err(error) if Self::is_corrupted_db_error(&error) => {
                if self.reopen_after_corruption().await? {
                    self.execute_batch(&ops).await
                } else {
                    Err(error)
                }
            }
            Err(error) if Self::is_connection_broken(&error) => {
                self.reconnect().await?;
                self.execute_batch(&ops).await
            }
            Err(error) => Err(error),
        }
    }

    /// Fetch a photo by offline id, counting the access.
    pub async fn get_photo(&self, id: &LocalId) -> Result<Option<Photo>> {
        let db = self.db.lock().await;
        let photo = LibSqlPhotoRepository::new(db.connection()).get(id).await?;

        if photo.is_some() {
            let key = format!("{ACCESS_PREFIX}{id}");
            LibSqlMetadataRepository::new(db.connection())
                .increment(&key)
                .await
                .ok();
        }

        Ok(photo)
    }

    /// Fetch a photo without counting the access. Engine reads use this so
    /// upload traffic never skews eviction ordering.
    pub(crate) async fn photo_for_sync(&self, id: &LocalId) -> Result<Option<Photo>> {
        let db = self.db.lock().await;
        LibSqlPhotoRepository::new(db.connection()).get(id).await
    }

    /// List photos attached to an assessment, capture order.
    pub async fn photos_for_assessment(&self, assessment_id: &str) -> Result<Vec<Photo>> {
        let db = self.db.lock().await;
        LibSqlPhotoRepository::new(db.connection())
            .list_by_assessment(assessment_id)
            .await
    }

    /// List photos in a sync state, oldest first.
    pub async fn photos_by_status(&self, status: SyncStatus) -> Result<Vec<Photo>> {
        let db = self.db.lock().await;
        LibSqlPhotoRepository::new(db.connection())
            .list_by_status(status)
            .await
    }

    /// Page through photos in key order.
    pub async fn photos_page(&self, request: &PageRequest) -> Result<Page<Photo>> {
        let db = self.db.lock().await;
        LibSqlPhotoRepository::new(db.connection()).page(request).await
    }

    /// Delete a photo, its queue tracking and its access counter.
    pub async fn delete_photo(&self, id: &LocalId) -> Result<()> {
        self.execute_batch(&[
            BatchOp::DeletePhoto(*id),
            BatchOp::DeleteQueueItemsFor {
                item_id: id.to_string(),
            },
        ])
        .await?;

        let db = self.db.lock().await;
        LibSqlMetadataRepository::new(db.connection())
            .delete(&format!("{ACCESS_PREFIX}{id}"))
            .await
            .ok();
        Ok(())
    }

    /// Delete many photos at once, returning how many rows went away.
    pub async fn delete_photos(&self, ids: &[LocalId]) -> Result<u64> {
        let db = self.db.lock().await;
        let deleted = LibSqlPhotoRepository::new(db.connection())
            .delete_many(ids)
            .await?;

        let metadata = LibSqlMetadataRepository::new(db.connection());
        for id in ids {
            metadata.delete(&format!("{ACCESS_PREFIX}{id}")).await.ok();
        }

        Ok(deleted)
    }

    /// Synced photos in eviction order (oldest created first).
    pub async fn synced_photo_candidates(&self) -> Result<Vec<EvictionCandidate>> {
        let db = self.db.lock().await;
        LibSqlPhotoRepository::new(db.connection())
            .synced_candidates_oldest_first()
            .await
    }

    /// Total binary payload bytes across all photos.
    pub async fn photo_payload_bytes(&self) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlPhotoRepository::new(db.connection())
            .total_payload_bytes()
            .await
    }

    /// Drop synced photos created before the cutoff, returning the count.
    pub async fn purge_synced_photos_older_than(&self, cutoff: i64) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlPhotoRepository::new(db.connection())
            .purge_synced_older_than(cutoff)
            .await
    }

    // ----- deficiencies -----

    /// Persist a deficiency and track it for sync, atomically.
    pub async fn save_deficiency(&self, deficiency: &Deficiency) -> Result<()> {
        self.ensure_writable().await?;

        let enqueue = self
            .enqueue_op_for(
                RecordKind::Deficiency,
                &deficiency.id.to_string(),
                deficiency.sync_status,
            )
            .await?;
        let mut ops = vec![BatchOp::PutDeficiency(deficiency.clone())];
        ops.extend(enqueue);
        self.execute_batch(&ops).await
    }

    /// Fetch a deficiency by offline id.
    pub async fn get_deficiency(&self, id: &LocalId) -> Result<Option<Deficiency>> {
        let db = self.db.lock().await;
        LibSqlDeficiencyRepository::new(db.connection()).get(id).await
    }

    /// List deficiencies recorded under an assessment, capture order.
    pub async fn deficiencies_for_assessment(&self, assessment_id: &str) -> Result<Vec<Deficiency>> {
        let db = self.db.lock().await;
        LibSqlDeficiencyRepository::new(db.connection())
            .list_by_assessment(assessment_id)
            .await
    }

    /// List deficiencies for a project, newest first.
    pub async fn deficiencies_for_project(&self, project_id: &str) -> Result<Vec<Deficiency>> {
        let db = self.db.lock().await;
        LibSqlDeficiencyRepository::new(db.connection())
            .list_by_project(project_id)
            .await
    }

    /// Delete a deficiency and its queue tracking.
    pub async fn delete_deficiency(&self, id: &LocalId) -> Result<()> {
        self.execute_batch(&[
            BatchOp::DeleteDeficiency(*id),
            BatchOp::DeleteQueueItemsFor {
                item_id: id.to_string(),
            },
        ])
        .await
    }

    // ----- sync queue -----

    /// Queue items due for a sync attempt, in scheduling order.
    pub async fn dequeue_ready(&self, now: i64) -> Result<Vec<QueueItem>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .dequeue_ready(now)
            .await
    }

    /// Every queue item, in scheduling order.
    pub async fn queue_items(&self) -> Result<Vec<QueueItem>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection()).get_all().await
    }

    /// The queue item tracking a record, if any.
    pub async fn queue_item_for(&self, item_id: &str) -> Result<Option<QueueItem>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .get_by_item(item_id)
            .await
    }

    /// Transition a queue item to `processing`, counting the attempt.
    pub async fn mark_processing(&self, queue_id: &str, now: i64) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .mark_processing(queue_id, now)
            .await
    }

    /// Transition a queue item to `completed`.
    pub async fn mark_completed(&self, queue_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .mark_completed(queue_id)
            .await
    }

    /// Transition a queue item to `failed` with a reason.
    pub async fn mark_failed(
        &self,
        queue_id: &str,
        error: &str,
        next_retry_at: Option<i64>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .mark_failed(queue_id, error, next_retry_at)
            .await
    }

    /// Manually reset one failed item to pending with a fresh counter.
    pub async fn retry_item(&self, queue_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .retry_item(queue_id, now_ms())
            .await
    }

    /// Manually reset every failed item, returning how many reset.
    pub async fn retry_all_failed(&self) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .retry_all_failed(now_ms())
            .await
    }

    /// Remove completed queue entries.
    pub async fn purge_completed(&self) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection()).purge_completed().await
    }

    /// Remove terminal queue entries older than the cutoff.
    pub async fn purge_queue_older_than(&self, cutoff: i64) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .purge_terminal_older_than(cutoff)
            .await
    }

    /// Count of items awaiting their first attempt.
    pub async fn pending_count(&self) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection()).pending_count().await
    }

    /// Queue item counts per status.
    pub async fn queue_counts(&self) -> Result<Vec<(QueueStatus, u64)>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection()).counts_by_status().await
    }

    // ----- reference caches -----

    /// Replace cached projects with fresh server copies.
    pub async fn cache_projects(&self, projects: &[CachedProject]) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlCacheRepository::new(db.connection())
            .put_projects(projects)
            .await
    }

    /// Cached projects, alphabetical.
    pub async fn cached_projects(&self) -> Result<Vec<CachedProject>> {
        let db = self.db.lock().await;
        LibSqlCacheRepository::new(db.connection()).get_projects().await
    }

    /// One cached project by server id.
    pub async fn cached_project(&self, id: &str) -> Result<Option<CachedProject>> {
        let db = self.db.lock().await;
        LibSqlCacheRepository::new(db.connection()).get_project(id).await
    }

    /// Replace cached taxonomy components.
    pub async fn cache_components(&self, components: &[CachedComponent]) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlCacheRepository::new(db.connection())
            .put_components(components)
            .await
    }

    /// The cached taxonomy in code order.
    pub async fn cached_components(&self) -> Result<Vec<CachedComponent>> {
        let db = self.db.lock().await;
        LibSqlCacheRepository::new(db.connection()).get_components().await
    }

    /// Taxonomy entries at one depth.
    pub async fn components_by_level(&self, level: i64) -> Result<Vec<CachedComponent>> {
        let db = self.db.lock().await;
        LibSqlCacheRepository::new(db.connection())
            .list_components_by_level(level)
            .await
    }

    /// Replace cached assets.
    pub async fn cache_assets(&self, assets: &[CachedAsset]) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlCacheRepository::new(db.connection()).put_assets(assets).await
    }

    /// Cached assets for a project, alphabetical.
    pub async fn assets_for_project(&self, project_id: &str) -> Result<Vec<CachedAsset>> {
        let db = self.db.lock().await;
        LibSqlCacheRepository::new(db.connection())
            .list_assets_by_project(project_id)
            .await
    }

    /// Drop cached projects fetched before the cutoff.
    pub async fn purge_project_cache_older_than(&self, cutoff: i64) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlCacheRepository::new(db.connection())
            .purge_projects_older_than(cutoff)
            .await
    }

    /// Drop cached assets fetched before the cutoff.
    pub async fn purge_asset_cache_older_than(&self, cutoff: i64) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlCacheRepository::new(db.connection())
            .purge_assets_older_than(cutoff)
            .await
    }

    // ----- conflicts -----

    /// Record a resolved (or escalated) conflict for audit.
    pub async fn record_conflict(&self, record: &ConflictRecord) -> Result<i64> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection()).insert(record).await
    }

    /// Conflicts newest first.
    pub async fn recent_conflicts(&self, limit: usize) -> Result<Vec<ConflictRecord>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .list_recent(limit)
            .await
    }

    /// Conflicts recorded for one item.
    pub async fn conflicts_for(&self, item_id: &str) -> Result<Vec<ConflictRecord>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .list_for_item(item_id)
            .await
    }

    /// Conflicts still awaiting a human decision.
    pub async fn manual_conflicts(&self) -> Result<Vec<ConflictRecord>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection()).list_manual().await
    }

    // ----- metadata -----

    /// When the last successful sync run finished, if ever.
    pub async fn last_sync_at(&self) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        LibSqlMetadataRepository::new(db.connection())
            .get_i64(KEY_LAST_SYNC_AT)
            .await
    }

    /// Record the finish time of a successful sync run.
    pub async fn set_last_sync_at(&self, at: i64) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMetadataRepository::new(db.connection())
            .set(KEY_LAST_SYNC_AT, &at.to_string())
            .await
    }

    /// Current quota state as last persisted by the governor.
    pub async fn quota_state(&self) -> Result<QuotaState> {
        let db = self.db.lock().await;
        let raw = LibSqlMetadataRepository::new(db.connection())
            .get(KEY_QUOTA_STATE)
            .await?;
        Ok(raw
            .and_then(|value| value.parse().ok())
            .unwrap_or(QuotaState::Ok))
    }

    /// Persist the quota state for write gating.
    pub async fn set_quota_state(&self, state: QuotaState) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMetadataRepository::new(db.connection())
            .set(KEY_QUOTA_STATE, state.as_str())
            .await
    }

    /// The most recent usage snapshot, if one was taken.
    pub async fn usage_snapshot(&self) -> Result<Option<StorageUsage>> {
        let db = self.db.lock().await;
        let raw = LibSqlMetadataRepository::new(db.connection())
            .get(KEY_USAGE_SNAPSHOT)
            .await?;
        Ok(raw.and_then(|value| serde_json::from_str(&value).ok()))
    }

    /// Persist a usage snapshot for hosts to display without re-measuring.
    pub async fn save_usage_snapshot(&self, usage: &StorageUsage) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMetadataRepository::new(db.connection())
            .set(KEY_USAGE_SNAPSHOT, &serde_json::to_string(usage)?)
            .await
    }

    /// Access counters recorded for photo reads, in key order.
    pub async fn access_counters(&self) -> Result<Vec<(String, i64)>> {
        let db = self.db.lock().await;
        let pairs = LibSqlMetadataRepository::new(db.connection())
            .list_prefixed(ACCESS_PREFIX)
            .await?;
        Ok(pairs
            .into_iter()
            .map(|(key, value)| (key, value.parse().unwrap_or(0)))
            .collect())
    }

    // ----- cross-store -----

    /// Apply heterogeneous operations as one all-or-nothing transaction.
    pub async fn execute_batch(&self, ops: &[BatchOp]) -> Result<()> {
        let db = self.db.lock().await;
        execute_batch(db.connection(), ops).await
    }

    /// Measure live per-store usage. See the storage module for what counts.
    pub async fn estimate_usage(&self) -> Result<StorageUsage> {
        let db = self.db.lock().await;
        crate::storage::measure_usage(db.connection(), &self.config).await
    }
}
