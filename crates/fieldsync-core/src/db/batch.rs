//! Heterogeneous all-or-nothing write batches
//!
//! A batch applies every operation inside one transaction; any failure rolls
//! the whole batch back. The sync engine leans on this to finalize an item
//! (record delete, queue update, child re-keying) as a single durable step.

use libsql::Connection;

use super::{
    AssessmentRepository, ConflictRepository, DeficiencyRepository, LibSqlAssessmentRepository,
    LibSqlConflictRepository, LibSqlDeficiencyRepository, LibSqlMetadataRepository,
    LibSqlPhotoRepository, LibSqlQueueRepository, MetadataRepository, PhotoRepository,
    QueueRepository,
};
use crate::error::Result;
use crate::models::{Assessment, ConflictRecord, Deficiency, LocalId, Photo, QueueItem};

/// One operation inside a batch.
#[derive(Debug, Clone)]
pub enum BatchOp {
    PutAssessment(Assessment),
    DeleteAssessment(LocalId),
    PutPhoto(Box<Photo>),
    DeletePhoto(LocalId),
    PutDeficiency(Deficiency),
    DeleteDeficiency(LocalId),
    PutQueueItem(QueueItem),
    PutConflict(Box<ConflictRecord>),
    DeleteQueueItemsFor { item_id: String },
    SetMetadata { key: String, value: String },
    RekeyPhotoParents { from: String, to: String },
    RekeyDeficiencyParents { from: String, to: String },
}

/// Apply a batch of operations as one transaction.
///
/// Partial application is forbidden: the first failing operation rolls back
/// everything before it and the error is returned unchanged.
pub async fn execute_batch(conn: &Connection, ops: &[BatchOp]) -> Result<()> {
    if ops.is_empty() {
        return Ok(());
    }

    // IMMEDIATE takes the write lock up front so the batch never stalls on a
    // lock upgrade halfway through
    conn.execute("BEGIN IMMEDIATE", ()).await?;

    if let Err(e) = apply(conn, ops).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e);
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    Ok(())
}

async fn apply(conn: &Connection, ops: &[BatchOp]) -> Result<()> {
    for op in ops {
        match op {
            BatchOp::PutAssessment(assessment) => {
                LibSqlAssessmentRepository::new(conn).put(assessment).await?;
            }
            BatchOp::DeleteAssessment(id) => {
                LibSqlAssessmentRepository::new(conn).delete(id).await?;
            }
            BatchOp::PutPhoto(photo) => {
                LibSqlPhotoRepository::new(conn).put(photo).await?;
            }
            BatchOp::DeletePhoto(id) => {
                LibSqlPhotoRepository::new(conn).delete(id).await?;
            }
            BatchOp::PutDeficiency(deficiency) => {
                LibSqlDeficiencyRepository::new(conn).put(deficiency).await?;
            }
            BatchOp::DeleteDeficiency(id) => {
                LibSqlDeficiencyRepository::new(conn).delete(id).await?;
            }
            BatchOp::PutQueueItem(item) => {
                LibSqlQueueRepository::new(conn).enqueue(item).await?;
            }
            BatchOp::PutConflict(record) => {
                LibSqlConflictRepository::new(conn).insert(record).await?;
            }
            BatchOp::DeleteQueueItemsFor { item_id } => {
                LibSqlQueueRepository::new(conn).delete_by_item(item_id).await?;
            }
            BatchOp::SetMetadata { key, value } => {
                LibSqlMetadataRepository::new(conn).set(key, value).await?;
            }
            BatchOp::RekeyPhotoParents { from, to } => {
                LibSqlPhotoRepository::new(conn)
                    .rekey_assessment(from, to)
                    .await?;
            }
            BatchOp::RekeyDeficiencyParents { from, to } => {
                LibSqlDeficiencyRepository::new(conn)
                    .rekey_assessment(from, to)
                    .await?;
            }
        }
    }
    Ok(())
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
    async fn test_batch_applies_across_stores() {
        let db = setup().await;
        let conn = db.connection();

        let assessment = Assessment::new("proj-1", "Roof");
        let queue_item = QueueItem::new(RecordKind::Assessment, assessment.id.to_string());

        execute_batch(
            conn,
            &[
                BatchOp::PutAssessment(assessment.clone()),
                BatchOp::PutQueueItem(queue_item.clone()),
            ],
        )
        .await
        .unwrap();

        let stored = LibSqlAssessmentRepository::new(conn)
            .get(&assessment.id)
            .await
            .unwrap();
        assert!(stored.is_some());
        let tracked = LibSqlQueueRepository::new(conn)
            .get(&queue_item.id)
            .await
            .unwrap();
        assert!(tracked.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_batch_rolls_back_everything() {
        let db = setup().await;
        let conn = db.connection();

        let assessment = Assessment::new("proj-1", "Roof");
        let result = execute_batch(
            conn,
            &[
                BatchOp::PutAssessment(assessment.clone()),
                // Deleting a row that never existed fails the batch
                BatchOp::DeletePhoto(LocalId::new()),
            ],
        )
        .await;
        assert!(result.is_err());

        let stored = LibSqlAssessmentRepository::new(conn)
            .get(&assessment.id)
            .await
            .unwrap();
        assert!(stored.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_conflict_rows_commit_or_roll_back_with_the_batch() {
        let db = setup().await;
        let conn = db.connection();

        let conflict = crate::models::ConflictRecord::new(
            "offline-abc",
            RecordKind::Assessment,
            serde_json::json!({"notes": "local"}),
            serde_json::json!({"notes": "server"}),
            crate::models::ConflictResolution::Merged,
        );

        // A failing sibling op takes the conflict row down with it
        let result = execute_batch(
            conn,
            &[
                BatchOp::PutConflict(Box::new(conflict.clone())),
                BatchOp::DeletePhoto(LocalId::new()),
            ],
        )
        .await;
        assert!(result.is_err());
        assert!(LibSqlConflictRepository::new(conn)
            .list_for_item("offline-abc")
            .await
            .unwrap()
            .is_empty());

        execute_batch(conn, &[BatchOp::PutConflict(Box::new(conflict))])
            .await
            .unwrap();
        let stored = LibSqlConflictRepository::new(conn)
            .list_for_item("offline-abc")
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_finalize_shape_batch() {
        let db = setup().await;
        let conn = db.connection();

        let assessment = Assessment::new("proj-1", "Roof");
        let offline_ref = assessment.id.to_string();
        let photo = Photo::new(offline_ref.clone(), "proj-1", vec![1, 2, 3], 10, 10);
        let mut queue_item = QueueItem::new(RecordKind::Assessment, offline_ref.clone());

        LibSqlAssessmentRepository::new(conn)
            .put(&assessment)
            .await
            .unwrap();
        LibSqlPhotoRepository::new(conn).put(&photo).await.unwrap();
        LibSqlQueueRepository::new(conn)
            .enqueue(&queue_item)
            .await
            .unwrap();

        queue_item.status = crate::models::QueueStatus::Completed;
        execute_batch(
            conn,
            &[
                BatchOp::DeleteAssessment(assessment.id),
                BatchOp::PutQueueItem(queue_item),
                BatchOp::RekeyPhotoParents {
                    from: offline_ref.clone(),
                    to: "987".to_string(),
                },
            ],
        )
        .await
        .unwrap();

        assert!(LibSqlAssessmentRepository::new(conn)
            .get(&assessment.id)
            .await
            .unwrap()
            .is_none());
        let rekeyed = LibSqlPhotoRepository::new(conn)
            .get(&photo.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rekeyed.assessment_id, "987");
    }
}
