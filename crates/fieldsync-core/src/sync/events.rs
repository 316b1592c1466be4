//! Lifecycle events for host UIs.
//!
//! The engine and the storage governor publish onto one broadcast bus;
//! subscribing yields a receiver and dropping it unsubscribes. Emission
//! never blocks and never fails, slow subscribers simply lag.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{ConflictResolution, RecordKind};
use crate::net::ConnectionQuality;
use crate::storage::QuotaState;

/// Lifecycle event published during sync runs and governor sweeps.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A run started with this many queue items ready.
    Started { run_id: String, pending: usize },
    /// Progress within a run, item granularity.
    Progress {
        run_id: String,
        completed: usize,
        total: usize,
    },
    /// One record reached the server and was finalized locally.
    ItemSynced {
        run_id: String,
        kind: RecordKind,
        item_id: String,
        server_id: String,
    },
    /// One record failed its attempt.
    ItemFailed {
        run_id: String,
        kind: RecordKind,
        item_id: String,
        error: String,
        will_retry: bool,
    },
    /// The remote reported divergent state for a record.
    ConflictDetected {
        run_id: String,
        kind: RecordKind,
        item_id: String,
        resolution: ConflictResolution,
    },
    /// The run finished; per-item failures are counted, not fatal.
    Completed {
        run_id: String,
        synced: usize,
        failed: usize,
        conflicts: usize,
        duration_ms: u64,
    },
    /// The run aborted before finishing its phases.
    RunFailed { run_id: String, error: String },
    /// The host reported a new link classification.
    NetworkChanged { quality: ConnectionQuality },
    /// Local usage crossed a quota threshold.
    StorageWarning {
        state: QuotaState,
        percent_used: f64,
        total_bytes: u64,
        limit_bytes: u64,
    },
}

impl SyncEvent {
    /// Stable name hosts can filter on.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "start",
            Self::Progress { .. } => "progress",
            Self::ItemSynced { .. } => "item_synced",
            Self::ItemFailed { .. } => "item_failed",
            Self::ConflictDetected { .. } => "conflict_detected",
            Self::Completed { .. } => "complete",
            Self::RunFailed { .. } => "error",
            Self::NetworkChanged { .. } => "network_change",
            Self::StorageWarning { .. } => "storage_warning",
        }
    }
}

/// Broadcast bus carrying [`SyncEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Create a bus that buffers up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Dropped silently when nobody listens.
    pub fn emit(&self, event: SyncEvent) {
        tracing::debug!("Event: {}", event.name());
        let _ = self.sender.send(event);
    }

    /// Subscribe to all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn emit_without_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.emit(SyncEvent::NetworkChanged {
            quality: ConnectionQuality::Good,
        });
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscribers_see_events_in_order() {
        let bus = EventBus::default();
        let mut receiver = bus.subscribe();

        bus.emit(SyncEvent::Started {
            run_id: "run-1".to_string(),
            pending: 3,
        });
        bus.emit(SyncEvent::Progress {
            run_id: "run-1".to_string(),
            completed: 1,
            total: 3,
        });

        assert_eq!(receiver.recv().await.unwrap().name(), "start");
        assert_eq!(receiver.recv().await.unwrap().name(), "progress");
    }

    #[test]
    fn names_match_the_subscription_surface() {
        let event = SyncEvent::ItemFailed {
            run_id: "run-1".to_string(),
            kind: RecordKind::Photo,
            item_id: "offline-x".to_string(),
            error: "timeout".to_string(),
            will_retry: true,
        };
        assert_eq!(event.name(), "item_failed");

        let event = SyncEvent::StorageWarning {
            state: QuotaState::Warned,
            percent_used: 81.5,
            total_bytes: 100,
            limit_bytes: 120,
        };
        assert_eq!(event.name(), "storage_warning");
    }
}
