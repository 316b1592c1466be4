//! Sync queue repository implementation
//!
//! The queue is the single source of truth for what needs syncing. Status
//! transitions are guarded in SQL: an update that would jump the state
//! machine affects zero rows and surfaces as `NotFound`.

use libsql::Connection;

use super::{i64_or_null, opt_i64, opt_text, text_or_null};
use crate::error::{Error, Result};
use crate::models::{QueueItem, QueueStatus};

/// Trait for sync queue storage operations (async)
#[allow(async_fn_in_trait)]
pub trait QueueRepository {
    /// Insert or replace a queue item
    async fn enqueue(&self, item: &QueueItem) -> Result<()>;

    /// Get a queue item by id
    async fn get(&self, id: &str) -> Result<Option<QueueItem>>;

    /// Get the queue item tracking a record, if any
    async fn get_by_item(&self, item_id: &str) -> Result<Option<QueueItem>>;

    /// List every queue item in scheduling order
    async fn get_all(&self) -> Result<Vec<QueueItem>>;

    /// Items due for a sync attempt: pending, plus failed whose retry time
    /// has arrived. Ordered by priority, then age, then insertion.
    async fn dequeue_ready(&self, now: i64) -> Result<Vec<QueueItem>>;

    /// Transition `pending`/`failed` to `processing`, counting the attempt
    async fn mark_processing(&self, id: &str, now: i64) -> Result<()>;

    /// Transition `processing` to `completed`
    async fn mark_completed(&self, id: &str) -> Result<()>;

    /// Transition `processing` to `failed` with a reason; `next_retry_at` of
    /// `None` parks the item until a manual retry
    async fn mark_failed(&self, id: &str, error: &str, next_retry_at: Option<i64>) -> Result<()>;

    /// Manual retry: reset a failed item to `pending` with a fresh counter
    async fn retry_item(&self, id: &str, now: i64) -> Result<()>;

    /// Return `processing` entries to `pending`. Run at store open so items
    /// stranded by an interrupted run re-enter circulation.
    async fn requeue_interrupted(&self) -> Result<u64>;

    /// Manual retry for every failed item, returning how many reset
    async fn retry_all_failed(&self, now: i64) -> Result<u64>;

    /// Remove completed entries, returning how many were purged
    async fn purge_completed(&self) -> Result<u64>;

    /// Remove terminal entries older than the cutoff
    async fn purge_terminal_older_than(&self, cutoff: i64) -> Result<u64>;

    /// Remove a queue item outright (its record was deleted locally)
    async fn delete_by_item(&self, item_id: &str) -> Result<u64>;

    /// Item counts per status
    async fn counts_by_status(&self) -> Result<Vec<(QueueStatus, u64)>>;

    /// Count of items awaiting their first attempt
    async fn pending_count(&self) -> Result<u64>;
}

/// libSQL implementation of `QueueRepository`
pub struct LibSqlQueueRepository<'a> {
    conn: &'a Connection,
}

const COLUMNS: &str =
    "id, kind, item_id, priority, created_at, attempts, last_attempt_at, next_retry_at, \
     status, error";

impl<'a> LibSqlQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a queue item from a database row
    fn parse(row: &libsql::Row) -> Result<QueueItem> {
        let kind: String = row.get(1)?;
        let attempts: i64 = row.get(5)?;
        let status: String = row.get(8)?;

        Ok(QueueItem {
            id: row.get(0)?,
            kind: kind.parse()?,
            item_id: row.get(2)?,
            priority: row.get(3)?,
            created_at: row.get(4)?,
            attempts: u32::try_from(attempts).unwrap_or(0),
            last_attempt_at: opt_i64(row, 6)?,
            next_retry_at: opt_i64(row, 7)?,
            status: status.parse()?,
            error: opt_text(row, 9)?,
        })
    }

    async fn collect(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<QueueItem>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(Self::parse(&row)?);
        }
        Ok(items)
    }

    async fn guarded_update(
        &self,
        id: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<()> {
        let rows = self.conn.execute(sql, params).await?;
        if rows == 0 {
            return Err(Error::NotFound(format!("queue item {id}")));
        }
        Ok(())
    }
}

impl QueueRepository for LibSqlQueueRepository<'_> {
    async fn enqueue(&self, item: &QueueItem) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO sync_queue
                 (id, kind, item_id, priority, created_at, attempts, last_attempt_at,
                  next_retry_at, status, error)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                libsql::params![
                    item.id.as_str(),
                    item.kind.as_str(),
                    item.item_id.as_str(),
                    item.priority,
                    item.created_at,
                    i64::from(item.attempts),
                    i64_or_null(item.last_attempt_at),
                    i64_or_null(item.next_retry_at),
                    item.status.as_str(),
                    text_or_null(item.error.as_deref()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<QueueItem>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {COLUMNS} FROM sync_queue WHERE id = ?"),
                [id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_by_item(&self, item_id: &str) -> Result<Option<QueueItem>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {COLUMNS} FROM sync_queue WHERE item_id = ? LIMIT 1"),
                [item_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_all(&self) -> Result<Vec<QueueItem>> {
        self.collect(
            &format!(
                "SELECT {COLUMNS} FROM sync_queue
                 ORDER BY priority ASC, created_at ASC, rowid ASC"
            ),
            (),
        )
        .await
    }

    async fn dequeue_ready(&self, now: i64) -> Result<Vec<QueueItem>> {
        // rowid breaks same-millisecond ties by insertion order
        self.collect(
            &format!(
                "SELECT {COLUMNS} FROM sync_queue
                 WHERE status = 'pending'
                    OR (status = 'failed' AND next_retry_at IS NOT NULL AND next_retry_at <= ?)
                 ORDER BY priority ASC, created_at ASC, rowid ASC"
            ),
            [now],
        )
        .await
    }

    async fn mark_processing(&self, id: &str, now: i64) -> Result<()> {
        self.guarded_update(
            id,
            "UPDATE sync_queue
             SET status = 'processing', attempts = attempts + 1, last_attempt_at = ?
             WHERE id = ? AND status IN ('pending', 'failed')",
            libsql::params![now, id],
        )
        .await
    }

    async fn mark_completed(&self, id: &str) -> Result<()> {
        self.guarded_update(
            id,
            "UPDATE sync_queue
             SET status = 'completed', error = NULL, next_retry_at = NULL
             WHERE id = ? AND status = 'processing'",
            libsql::params![id],
        )
        .await
    }

    async fn mark_failed(&self, id: &str, error: &str, next_retry_at: Option<i64>) -> Result<()> {
        self.guarded_update(
            id,
            "UPDATE sync_queue
             SET status = 'failed', error = ?, next_retry_at = ?
             WHERE id = ? AND status = 'processing'",
            libsql::params![error, i64_or_null(next_retry_at), id],
        )
        .await
    }

    async fn retry_item(&self, id: &str, now: i64) -> Result<()> {
        self.guarded_update(
            id,
            "UPDATE sync_queue
             SET status = 'pending', attempts = 0, next_retry_at = ?, error = NULL
             WHERE id = ? AND status = 'failed'",
            libsql::params![now, id],
        )
        .await
    }

    async fn retry_all_failed(&self, now: i64) -> Result<u64> {
        let rows = self
            .conn
            .execute(
                "UPDATE sync_queue
                 SET status = 'pending', attempts = 0, next_retry_at = ?, error = NULL
                 WHERE status = 'failed'",
                [now],
            )
            .await?;
        Ok(rows)
    }

    async fn requeue_interrupted(&self) -> Result<u64> {
        let rows = self
            .conn
            .execute(
                "UPDATE sync_queue SET status = 'pending' WHERE status = 'processing'",
                (),
            )
            .await?;
        Ok(rows)
    }

    async fn purge_completed(&self) -> Result<u64> {
        let rows = self
            .conn
            .execute("DELETE FROM sync_queue WHERE status = 'completed'", ())
            .await?;
        Ok(rows)
    }

    async fn purge_terminal_older_than(&self, cutoff: i64) -> Result<u64> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM sync_queue
                 WHERE status IN ('completed', 'failed') AND created_at < ?",
                [cutoff],
            )
            .await?;
        Ok(rows)
    }

    async fn delete_by_item(&self, item_id: &str) -> Result<u64> {
        let rows = self
            .conn
            .execute("DELETE FROM sync_queue WHERE item_id = ?", [item_id])
            .await?;
        Ok(rows)
    }

    async fn counts_by_status(&self) -> Result<Vec<(QueueStatus, u64)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT status, COUNT(*) FROM sync_queue GROUP BY status",
                (),
            )
            .await?;

        let mut counts = Vec::new();
        while let Some(row) = rows.next().await? {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            counts.push((status.parse()?, u64::try_from(count).unwrap_or(0)));
        }
        Ok(counts)
    }

    async fn pending_count(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM sync_queue WHERE status = 'pending'",
                (),
            )
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
    use crate::db::Database;
    use crate::models::RecordKind;
    use crate::util::now_ms;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn item_with(priority: i64, created_at: i64) -> QueueItem {
        let mut item = QueueItem::new(RecordKind::Assessment, format!("offline-{created_at}"));
        item.priority = priority;
        item.created_at = created_at;
        item
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ready_order_is_priority_then_age() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        // Inserted as priorities [2, 1, 2, 1]
        repo.enqueue(&item_with(2, 10)).await.unwrap();
        repo.enqueue(&item_with(1, 20)).await.unwrap();
        repo.enqueue(&item_with(2, 30)).await.unwrap();
        repo.enqueue(&item_with(1, 40)).await.unwrap();

        let ready = repo.dequeue_ready(now_ms()).await.unwrap();
        let order: Vec<(i64, i64)> = ready.iter().map(|i| (i.priority, i.created_at)).collect();
        assert_eq!(order, vec![(1, 20), (1, 40), (2, 10), (2, 30)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_same_timestamp_ties_break_by_insertion() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let first = item_with(1, 100);
        let second = item_with(1, 100);
        repo.enqueue(&first).await.unwrap();
        repo.enqueue(&second).await.unwrap();

        let ready = repo.dequeue_ready(now_ms()).await.unwrap();
        assert_eq!(ready[0].id, first.id);
        assert_eq!(ready[1].id, second.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_items_wait_for_retry_time() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let item = item_with(1, 10);
        repo.enqueue(&item).await.unwrap();
        repo.mark_processing(&item.id, 50).await.unwrap();
        repo.mark_failed(&item.id, "connection reset", Some(1_000))
            .await
            .unwrap();

        assert!(repo.dequeue_ready(999).await.unwrap().is_empty());
        let ready = repo.dequeue_ready(1_000).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].attempts, 1);
        assert_eq!(ready[0].error.as_deref(), Some("connection reset"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_permanently_failed_items_are_not_ready() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let item = item_with(1, 10);
        repo.enqueue(&item).await.unwrap();
        repo.mark_processing(&item.id, 50).await.unwrap();
        repo.mark_failed(&item.id, "gone for good", None)
            .await
            .unwrap();

        assert!(repo.dequeue_ready(i64::MAX).await.unwrap().is_empty());

        let stored = repo.get(&item.id).await.unwrap().unwrap();
        assert!(stored.is_permanently_failed());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_illegal_transitions_affect_nothing() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let item = item_with(1, 10);
        repo.enqueue(&item).await.unwrap();

        // pending -> completed skips processing
        assert!(matches!(
            repo.mark_completed(&item.id).await,
            Err(Error::NotFound(_))
        ));
        // pending -> pending via retry is not a legal manual retry
        assert!(matches!(
            repo.retry_item(&item.id, 0).await,
            Err(Error::NotFound(_))
        ));

        let stored = repo.get(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Pending);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_manual_retry_resets_counter() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let item = item_with(1, 10);
        repo.enqueue(&item).await.unwrap();
        repo.mark_processing(&item.id, 50).await.unwrap();
        repo.mark_failed(&item.id, "server error", None)
            .await
            .unwrap();

        repo.retry_item(&item.id, 60).await.unwrap();

        let stored = repo.get(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Pending);
        assert_eq!(stored.attempts, 0);
        assert_eq!(stored.next_retry_at, Some(60));
        assert!(stored.error.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_purge_completed_and_counts() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let done = item_with(1, 10);
        let open = item_with(1, 20);
        repo.enqueue(&done).await.unwrap();
        repo.enqueue(&open).await.unwrap();
        repo.mark_processing(&done.id, 30).await.unwrap();
        repo.mark_completed(&done.id).await.unwrap();

        let counts = repo.counts_by_status().await.unwrap();
        assert!(counts.contains(&(QueueStatus::Completed, 1)));
        assert!(counts.contains(&(QueueStatus::Pending, 1)));

        assert_eq!(repo.purge_completed().await.unwrap(), 1);
        assert_eq!(repo.pending_count().await.unwrap(), 1);
    }
}
