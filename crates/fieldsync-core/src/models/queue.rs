//! Durable sync queue entries
//!
//! Every pending record has exactly one queue item, and queue items are the
//! only trigger for a sync attempt. The status machine is
//! `pending -> processing -> {completed, failed}`; a failed item re-enters
//! circulation automatically while `next_retry_at` is set, or via an explicit
//! manual retry once it is permanently failed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::RecordKind;
use crate::error::Error;
use crate::util::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::CorruptLocalData(format!(
                "unknown queue status: {other}"
            ))),
        }
    }
}

/// One unit of work for the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Queue entry identifier (UUIDv7, so ids sort roughly by creation time)
    pub id: String,
    /// Which record table the item points into
    pub kind: RecordKind,
    /// Offline id of the record to sync
    pub item_id: String,
    /// Scheduling priority, 1 = served first
    pub priority: i64,
    /// Enqueue timestamp (unix ms)
    pub created_at: i64,
    /// Sync attempts made so far
    pub attempts: u32,
    /// Timestamp of the most recent attempt (unix ms)
    pub last_attempt_at: Option<i64>,
    /// Earliest time the next attempt may run; `None` on a failed item means
    /// permanently failed, awaiting manual retry
    pub next_retry_at: Option<i64>,
    /// Lifecycle status
    pub status: QueueStatus,
    /// Reason for the most recent failure
    pub error: Option<String>,
}

impl QueueItem {
    /// Create a pending queue item for a record, at its kind's default
    /// priority.
    #[must_use]
    pub fn new(kind: RecordKind, item_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            kind,
            item_id: item_id.into(),
            priority: i64::from(kind.default_priority()),
            created_at: now_ms(),
            attempts: 0,
            last_attempt_at: None,
            next_retry_at: None,
            status: QueueStatus::Pending,
            error: None,
        }
    }

    /// Override the default priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Whether this item should be served by the next sync run.
    #[must_use]
    pub fn is_ready(&self, now: i64) -> bool {
        match self.status {
            QueueStatus::Pending => true,
            QueueStatus::Failed => self.next_retry_at.is_some_and(|at| at <= now),
            QueueStatus::Processing | QueueStatus::Completed => false,
        }
    }

    /// Whether this item has exhausted its retries and needs manual action.
    #[must_use]
    pub const fn is_permanently_failed(&self) -> bool {
        matches!(self.status, QueueStatus::Failed) && self.next_retry_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_status_string_roundtrip() {
        for status in [
            QueueStatus::Pending,
            QueueStatus::Processing,
            QueueStatus::Completed,
            QueueStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<QueueStatus>().unwrap(), status);
        }
        assert!("stalled".parse::<QueueStatus>().is_err());
    }

    #[test]
    fn new_item_takes_kind_default_priority() {
        let assessment = QueueItem::new(RecordKind::Assessment, "offline-a");
        let photo = QueueItem::new(RecordKind::Photo, "offline-b");
        let deficiency = QueueItem::new(RecordKind::Deficiency, "offline-c");
        assert!(assessment.priority < photo.priority);
        assert!(photo.priority < deficiency.priority);
        assert_eq!(assessment.status, QueueStatus::Pending);
    }

    #[test]
    fn readiness_follows_status_and_retry_time() {
        let now = now_ms();
        let mut item = QueueItem::new(RecordKind::Assessment, "offline-a");
        assert!(item.is_ready(now));

        item.status = QueueStatus::Processing;
        assert!(!item.is_ready(now));

        item.status = QueueStatus::Failed;
        item.next_retry_at = Some(now + 5_000);
        assert!(!item.is_ready(now));
        assert!(item.is_ready(now + 5_000));

        item.next_retry_at = None;
        assert!(!item.is_ready(now + 1_000_000));
        assert!(item.is_permanently_failed());
    }
}
