//! Sync orchestration
//!
//! One engine drives the full run lifecycle: dequeue ready work, push it
//! kind by kind (assessments first so child foreign keys can be rewritten
//! before photos and deficiencies travel), finalize each item durably,
//! reschedule failures with exponential backoff, then sweep retention.
//! Only one run may be in flight per engine; a second start is refused,
//! not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::db::BatchOp;
use crate::error::{Error, Result};
use crate::media;
use crate::models::{
    is_offline_id, ConflictRecord, ConflictResolution, LocalId, QueueItem, QueueStatus,
    RecordKind, SyncStatus,
};
use crate::net::NetworkMonitor;
use crate::services::LocalStore;
use crate::storage::StorageGovernor;
use crate::util::{compact_text, now_ms};

use super::backoff::RetryPolicy;
use super::events::{EventBus, SyncEvent};
use super::merge::merge_records;
use super::remote::{PhotoMeta, RecordAck, RemoteApi};

/// Terminal state of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every phase ran; per-item failures may still be counted.
    Completed,
    /// Stopped early at an abort request.
    Aborted,
    /// A run-level failure stopped the remaining phases.
    Error,
}

impl RunStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of one sync run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRunReport {
    pub run_id: String,
    pub started_at: i64,
    pub finished_at: i64,
    pub status: RunStatus,
    /// Items finalized this run
    pub synced: usize,
    /// Items whose attempt failed this run
    pub failed: usize,
    /// Conflicts recorded this run
    pub conflicts: usize,
    /// Failure reasons, per item plus any run-level error
    pub errors: Vec<String>,
}

#[derive(Default)]
struct RunTally {
    synced: usize,
    failed: usize,
    conflicts: usize,
    completed: usize,
    errors: Vec<String>,
}

/// Outcome of one queue item attempt.
enum ItemOutcome {
    Synced { conflicted: bool },
    Failed { reason: String },
    /// Another path claimed or removed the item first; nothing counted.
    Skipped,
}

/// Drives sync runs against a remote endpoint.
///
/// Clones share the run lock and abort flag, so one clone can live in a
/// background task while another serves manual sync requests.
#[derive(Clone)]
pub struct SyncEngine {
    store: LocalStore,
    remote: Arc<dyn RemoteApi>,
    network: NetworkMonitor,
    governor: StorageGovernor,
    events: EventBus,
    policy: RetryPolicy,
    parallel_limit: usize,
    running: Arc<AtomicBool>,
    abort: Arc<AtomicBool>,
}

impl SyncEngine {
    /// Wire an engine over a store, a remote contract, and a network monitor.
    #[must_use]
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteApi>,
        network: NetworkMonitor,
        events: EventBus,
    ) -> Self {
        let policy = RetryPolicy::from_config(store.config());
        let parallel_limit = store.config().parallel_limit.max(1);
        let governor = StorageGovernor::new(store.clone(), events.clone());
        Self {
            store,
            remote,
            network,
            governor,
            events,
            policy,
            parallel_limit,
            running: Arc::new(AtomicBool::new(false)),
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Event bus shared by the engine and its governor.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// The network monitor consulted before and during runs.
    #[must_use]
    pub const fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    /// The storage governor owned by this engine.
    #[must_use]
    pub const fn governor(&self) -> &StorageGovernor {
        &self.governor
    }

    /// Whether a run is currently in flight.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask a running sync to stop once its current batch settles.
    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    /// Run one full sync cycle.
    ///
    /// Refuses to start while offline (`Error::Offline`) or while another
    /// run is in flight (`Error::SyncInProgress`). Per-item failures are
    /// counted in the report, not surfaced as `Err`; a run-level failure
    /// ends the run with [`RunStatus::Error`].
    pub async fn sync(&self) -> Result<SyncRunReport> {
        if !self.network.quality().is_usable() {
            return Err(Error::Offline);
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::SyncInProgress);
        }
        self.abort.store(false, Ordering::SeqCst);

        let report = self.run().await;
        self.running.store(false, Ordering::SeqCst);
        Ok(report)
    }

    /// Spawn a background task that syncs on a timer and whenever
    /// connectivity returns. Runs until the returned handle is aborted.
    #[must_use]
    pub fn spawn_auto(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut quality_rx = engine.network.subscribe();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; consume it so the timer
            // waits a full interval before its first run.
            ticker.tick().await;

            loop {
                let due = tokio::select! {
                    _ = ticker.tick() => engine.network.is_online(),
                    changed = quality_rx.changed() => match changed {
                        Ok(()) => {
                            let quality = *quality_rx.borrow_and_update();
                            engine.events.emit(SyncEvent::NetworkChanged { quality });
                            quality.is_usable()
                        }
                        Err(_) => return,
                    },
                };
                if !due {
                    continue;
                }
                match engine.sync().await {
                    Ok(report) => tracing::debug!(
                        "Auto sync finished with {} synced, {} failed",
                        report.synced,
                        report.failed
                    ),
                    Err(Error::SyncInProgress | Error::Offline) => {}
                    Err(error) => tracing::warn!("Auto sync failed: {error}"),
                }
            }
        })
    }

    async fn run(&self) -> SyncRunReport {
        let run_id = Uuid::now_v7().to_string();
        let started_at = now_ms();

        let ready = match self.store.dequeue_ready(started_at).await {
            Ok(items) => items,
            Err(error) => return self.fail_run(&run_id, started_at, RunTally::default(), &error),
        };

        let total = ready.len();
        self.events.emit(SyncEvent::Started {
            run_id: run_id.clone(),
            pending: total,
        });
        tracing::info!("Sync run {run_id} started, {total} items ready");

        let mut assessments = Vec::new();
        let mut photos = Vec::new();
        let mut deficiencies = Vec::new();
        for item in ready {
            match item.kind {
                RecordKind::Assessment => assessments.push(item),
                RecordKind::Photo => photos.push(item),
                RecordKind::Deficiency => deficiencies.push(item),
            }
        }

        let mut tally = RunTally::default();
        let mut aborted = false;
        for phase in [assessments, photos, deficiencies] {
            match self.run_phase(&run_id, phase, total, &mut tally).await {
                Ok(true) => {}
                Ok(false) => {
                    aborted = true;
                    break;
                }
                Err(error) => return self.fail_run(&run_id, started_at, tally, &error),
            }
        }

        if !aborted {
            self.run_cleanup().await;
        }

        let finished_at = now_ms();
        if !aborted {
            if let Err(error) = self.store.set_last_sync_at(finished_at).await {
                tracing::warn!("Failed to record sync time: {error}");
            }
        }

        let status = if aborted {
            RunStatus::Aborted
        } else {
            RunStatus::Completed
        };
        let duration_ms = u64::try_from(finished_at.saturating_sub(started_at)).unwrap_or(0);
        self.events.emit(SyncEvent::Completed {
            run_id: run_id.clone(),
            synced: tally.synced,
            failed: tally.failed,
            conflicts: tally.conflicts,
            duration_ms,
        });
        tracing::info!(
            "Sync run {run_id} {status}: {} synced, {} failed, {} conflicts in {duration_ms}ms",
            tally.synced,
            tally.failed,
            tally.conflicts
        );

        SyncRunReport {
            run_id,
            started_at,
            finished_at,
            status,
            synced: tally.synced,
            failed: tally.failed,
            conflicts: tally.conflicts,
            errors: tally.errors,
        }
    }

    fn fail_run(
        &self,
        run_id: &str,
        started_at: i64,
        mut tally: RunTally,
        error: &Error,
    ) -> SyncRunReport {
        tracing::error!("Sync run {run_id} failed: {error}");
        self.events.emit(SyncEvent::RunFailed {
            run_id: run_id.to_string(),
            error: error.to_string(),
        });
        tally.errors.push(error.to_string());

        SyncRunReport {
            run_id: run_id.to_string(),
            started_at,
            finished_at: now_ms(),
            status: RunStatus::Error,
            synced: tally.synced,
            failed: tally.failed,
            conflicts: tally.conflicts,
            errors: tally.errors,
        }
    }

    /// Run one kind's queue slice in bounded-parallel chunks. Returns
    /// `Ok(false)` when an abort request stopped the phase. Chunking also
    /// keeps a photo and its parent assessment out of the same parallel
    /// batch, since phases never mix kinds.
    async fn run_phase(
        &self,
        run_id: &str,
        items: Vec<QueueItem>,
        total: usize,
        tally: &mut RunTally,
    ) -> Result<bool> {
        if items.is_empty() {
            return Ok(true);
        }

        for chunk in items.chunks(self.batch_width()) {
            if self.abort.load(Ordering::SeqCst) {
                tracing::info!("Sync run {run_id} stopping at abort request");
                return Ok(false);
            }

            let attempts = chunk.iter().map(|item| self.process_item(run_id, item));
            for outcome in futures::future::join_all(attempts).await {
                match outcome? {
                    ItemOutcome::Synced { conflicted } => {
                        tally.synced += 1;
                        tally.completed += 1;
                        if conflicted {
                            tally.conflicts += 1;
                        }
                    }
                    ItemOutcome::Failed { reason } => {
                        tally.failed += 1;
                        tally.completed += 1;
                        tally.errors.push(reason);
                    }
                    ItemOutcome::Skipped => {}
                }
            }

            self.events.emit(SyncEvent::Progress {
                run_id: run_id.to_string(),
                completed: tally.completed,
                total,
            });
        }

        Ok(true)
    }

    /// Effective chunk width under the current link quality.
    fn batch_width(&self) -> usize {
        self.network
            .quality()
            .parallel_hint(self.parallel_limit)
            .max(1)
    }

    /// Attempt one queue item. `Err` means the local store itself failed,
    /// which aborts the run; remote and per-record problems are folded into
    /// the returned outcome instead.
    async fn process_item(&self, run_id: &str, item: &QueueItem) -> Result<ItemOutcome> {
        match self.store.mark_processing(&item.id, now_ms()).await {
            Ok(()) => {}
            Err(Error::NotFound(_)) => {
                // Raced with a manual retry, completion, or delete.
                tracing::debug!("Queue item {} no longer claimable, skipping", item.id);
                return Ok(ItemOutcome::Skipped);
            }
            Err(error) => return Err(error),
        }
        let attempt = item.attempts + 1;

        let Ok(record_id) = item.item_id.parse::<LocalId>() else {
            let error = Error::CorruptLocalData(format!(
                "queue item {} holds an unparseable record id",
                item.id
            ));
            return self.fail_item(run_id, item, attempt, None, &error).await;
        };

        match item.kind {
            RecordKind::Assessment => self.push_assessment(run_id, item, attempt, &record_id).await,
            RecordKind::Photo => self.push_photo(run_id, item, attempt, &record_id).await,
            RecordKind::Deficiency => self.push_deficiency(run_id, item, attempt, &record_id).await,
        }
    }

    async fn push_assessment(
        &self,
        run_id: &str,
        item: &QueueItem,
        attempt: u32,
        record_id: &LocalId,
    ) -> Result<ItemOutcome> {
        let Some(mut assessment) = self.store.get_assessment(record_id).await? else {
            return self.fail_missing(run_id, item, attempt).await;
        };

        // The record mirrors the queue row for the duration of the attempt,
        // so a host reading mid-flight sees `syncing`, not `pending`.
        assessment.sync_status = SyncStatus::Syncing;
        assessment.updated_at = now_ms();
        self.store
            .execute_batch(&[BatchOp::PutAssessment(assessment.clone())])
            .await?;

        let offline_id = assessment.id.to_string();
        let payload = assessment.sync_payload();
        match self
            .remote
            .sync_record(RecordKind::Assessment, &offline_id, &payload)
            .await
        {
            Ok(ack) => {
                let conflict = ack
                    .conflict
                    .then(|| self.build_conflict(item, &payload, &ack));

                // Record delete, queue completion, child re-keying, and any
                // conflict row land in one transaction: a photo item can
                // never observe a parent that synced without its foreign key
                // rewritten, and a retried item can never duplicate its
                // conflict history.
                let mut ops = vec![
                    BatchOp::DeleteAssessment(assessment.id),
                    BatchOp::RekeyPhotoParents {
                        from: offline_id.clone(),
                        to: ack.server_id.clone(),
                    },
                    BatchOp::RekeyDeficiencyParents {
                        from: offline_id.clone(),
                        to: ack.server_id.clone(),
                    },
                    BatchOp::PutQueueItem(completed_copy(item, attempt)),
                ];
                if let Some(record) = &conflict {
                    ops.push(BatchOp::PutConflict(Box::new(record.clone())));
                }
                self.store.execute_batch(&ops).await?;

                let conflicted = conflict.is_some();
                if let Some(record) = conflict {
                    self.announce_conflict(run_id, item, record.resolution);
                }
                self.events.emit(SyncEvent::ItemSynced {
                    run_id: run_id.to_string(),
                    kind: RecordKind::Assessment,
                    item_id: offline_id,
                    server_id: ack.server_id,
                });
                Ok(ItemOutcome::Synced { conflicted })
            }
            Err(error) => {
                let mut failed = assessment;
                failed.sync_status = SyncStatus::Failed;
                failed.retry_count = attempt;
                failed.sync_error = Some(compact_text(&error.to_string()));
                failed.updated_at = now_ms();
                self.fail_item(
                    run_id,
                    item,
                    attempt,
                    Some(BatchOp::PutAssessment(failed)),
                    &error,
                )
                .await
            }
        }
    }

    async fn push_photo(
        &self,
        run_id: &str,
        item: &QueueItem,
        attempt: u32,
        record_id: &LocalId,
    ) -> Result<ItemOutcome> {
        let Some(mut photo) = self.store.photo_for_sync(record_id).await? else {
            return self.fail_missing(run_id, item, attempt).await;
        };

        if is_offline_id(&photo.assessment_id) {
            // The parent has no server id yet; its own sync failed or is
            // still queued. Hold the photo back and let backoff retry it.
            let error = Error::TransientNetwork(format!(
                "parent assessment {} has not synced yet",
                photo.assessment_id
            ));
            let mut held = photo;
            held.sync_status = SyncStatus::Failed;
            held.retry_count = attempt;
            held.sync_error = Some(compact_text(&error.to_string()));
            held.updated_at = now_ms();
            return self
                .fail_item(
                    run_id,
                    item,
                    attempt,
                    Some(BatchOp::PutPhoto(Box::new(held))),
                    &error,
                )
                .await;
        }

        photo.sync_status = SyncStatus::Syncing;
        photo.updated_at = now_ms();
        self.store
            .execute_batch(&[BatchOp::PutPhoto(Box::new(photo.clone()))])
            .await?;

        let offline_id = photo.id.to_string();
        let encoded = media::encode_payload(&photo.compressed);
        let meta = PhotoMeta::from_photo(&photo);
        match self.remote.sync_photo(&offline_id, &encoded, &meta).await {
            Ok(ack) => {
                // The photo stays local as a synced cache copy; retention
                // and eviction reclaim it later. The original payload is
                // dropped now that the server holds the upload.
                let mut synced = photo;
                synced.server_id = Some(ack.server_id.clone());
                synced.remote_url = Some(ack.url);
                synced.sync_status = SyncStatus::Synced;
                synced.sync_error = None;
                synced.original = None;
                synced.updated_at = now_ms();
                let ops = [
                    BatchOp::PutPhoto(Box::new(synced)),
                    BatchOp::PutQueueItem(completed_copy(item, attempt)),
                ];
                self.store.execute_batch(&ops).await?;

                self.events.emit(SyncEvent::ItemSynced {
                    run_id: run_id.to_string(),
                    kind: RecordKind::Photo,
                    item_id: offline_id,
                    server_id: ack.server_id,
                });
                Ok(ItemOutcome::Synced { conflicted: false })
            }
            Err(error) => {
                let mut failed = photo;
                failed.sync_status = SyncStatus::Failed;
                failed.retry_count = attempt;
                failed.sync_error = Some(compact_text(&error.to_string()));
                failed.updated_at = now_ms();
                self.fail_item(
                    run_id,
                    item,
                    attempt,
                    Some(BatchOp::PutPhoto(Box::new(failed))),
                    &error,
                )
                .await
            }
        }
    }

    async fn push_deficiency(
        &self,
        run_id: &str,
        item: &QueueItem,
        attempt: u32,
        record_id: &LocalId,
    ) -> Result<ItemOutcome> {
        let Some(mut deficiency) = self.store.get_deficiency(record_id).await? else {
            return self.fail_missing(run_id, item, attempt).await;
        };

        deficiency.sync_status = SyncStatus::Syncing;
        deficiency.updated_at = now_ms();
        self.store
            .execute_batch(&[BatchOp::PutDeficiency(deficiency.clone())])
            .await?;

        let offline_id = deficiency.id.to_string();
        let payload = deficiency.sync_payload();
        match self
            .remote
            .sync_record(RecordKind::Deficiency, &offline_id, &payload)
            .await
        {
            Ok(ack) => {
                let conflict = ack
                    .conflict
                    .then(|| self.build_conflict(item, &payload, &ack));

                let mut ops = vec![
                    BatchOp::DeleteDeficiency(deficiency.id),
                    BatchOp::PutQueueItem(completed_copy(item, attempt)),
                ];
                if let Some(record) = &conflict {
                    ops.push(BatchOp::PutConflict(Box::new(record.clone())));
                }
                self.store.execute_batch(&ops).await?;

                let conflicted = conflict.is_some();
                if let Some(record) = conflict {
                    self.announce_conflict(run_id, item, record.resolution);
                }
                self.events.emit(SyncEvent::ItemSynced {
                    run_id: run_id.to_string(),
                    kind: RecordKind::Deficiency,
                    item_id: offline_id,
                    server_id: ack.server_id,
                });
                Ok(ItemOutcome::Synced { conflicted })
            }
            Err(error) => {
                let mut failed = deficiency;
                failed.sync_status = SyncStatus::Failed;
                failed.retry_count = attempt;
                failed.sync_error = Some(compact_text(&error.to_string()));
                failed.updated_at = now_ms();
                self.fail_item(
                    run_id,
                    item,
                    attempt,
                    Some(BatchOp::PutDeficiency(failed)),
                    &error,
                )
                .await
            }
        }
    }

    /// The record behind a queue item is gone; park the item permanently
    /// rather than retry a tombstone forever.
    async fn fail_missing(
        &self,
        run_id: &str,
        item: &QueueItem,
        attempt: u32,
    ) -> Result<ItemOutcome> {
        let error = Error::NotFound(format!(
            "{} {} is no longer in the local store",
            item.kind, item.item_id
        ));
        self.fail_item(run_id, item, attempt, None, &error).await
    }

    /// Mark an attempt failed: the record update (when one applies) and the
    /// queue reschedule land in one transaction. Retryable errors get a
    /// backoff slot until the attempt budget runs out; everything else is
    /// parked for manual retry.
    async fn fail_item(
        &self,
        run_id: &str,
        item: &QueueItem,
        attempt: u32,
        record_op: Option<BatchOp>,
        error: &Error,
    ) -> Result<ItemOutcome> {
        let next_retry_at = if error.is_retryable() {
            self.policy.next_retry_at(attempt, now_ms())
        } else {
            None
        };
        let reason = compact_text(&error.to_string());

        let mut ops = Vec::with_capacity(2);
        if let Some(op) = record_op {
            ops.push(op);
        }
        ops.push(BatchOp::PutQueueItem(failed_copy(
            item,
            attempt,
            &reason,
            next_retry_at,
        )));
        self.store.execute_batch(&ops).await?;

        let will_retry = next_retry_at.is_some();
        tracing::warn!(
            "Sync of {} {} failed on attempt {attempt} ({}): {reason}",
            item.kind,
            item.item_id,
            if will_retry { "will retry" } else { "parked" }
        );
        self.events.emit(SyncEvent::ItemFailed {
            run_id: run_id.to_string(),
            kind: item.kind,
            item_id: item.item_id.clone(),
            error: reason.clone(),
            will_retry,
        });

        Ok(ItemOutcome::Failed { reason })
    }

    /// Build the divergence row the server reported and settle on a
    /// resolution. When the server sent its copy, a field-level merge
    /// decides the retained version; without one the conflict is parked for
    /// a human. The row is persisted by the caller's finalize batch so that
    /// conflict history and completion commit together.
    fn build_conflict(&self, item: &QueueItem, local: &Value, ack: &RecordAck) -> ConflictRecord {
        let (resolution, merged, fields) = match &ack.server_version {
            Some(server) => match merge_records(item.kind, None, local, server) {
                Ok(outcome) => (
                    ack.resolution.unwrap_or(ConflictResolution::Merged),
                    Some(outcome.merged),
                    outcome.conflicts,
                ),
                Err(_) => (
                    ack.resolution.unwrap_or(ConflictResolution::Manual),
                    None,
                    Vec::new(),
                ),
            },
            None => (
                ack.resolution.unwrap_or(ConflictResolution::Manual),
                None,
                Vec::new(),
            ),
        };

        let server_version = ack.server_version.clone().unwrap_or(Value::Null);
        let mut record = ConflictRecord::new(
            item.item_id.clone(),
            item.kind,
            local.clone(),
            server_version,
            resolution,
        );
        if let Some(merged) = merged {
            record = record.with_merge(merged, fields);
        }
        record
    }

    /// Announce a conflict once its row has committed with the finalize
    /// batch.
    fn announce_conflict(&self, run_id: &str, item: &QueueItem, resolution: ConflictResolution) {
        tracing::warn!(
            "Conflict on {} {}, resolved as {resolution}",
            item.kind,
            item.item_id
        );
        self.events.emit(SyncEvent::ConflictDetected {
            run_id: run_id.to_string(),
            kind: item.kind,
            item_id: item.item_id.clone(),
            resolution,
        });
    }

    /// Cleanup phase: purge completed queue rows, sweep retention windows,
    /// refresh the quota snapshot. Failures here are logged, never fatal.
    async fn run_cleanup(&self) {
        match self.store.purge_completed().await {
            Ok(purged) if purged > 0 => {
                tracing::debug!("Purged {purged} completed queue items");
            }
            Ok(_) => {}
            Err(error) => tracing::warn!("Queue purge failed: {error}"),
        }

        self.governor.cleanup().await;

        if let Err(error) = self.governor.check_quota().await {
            tracing::warn!("Quota check failed: {error}");
        }
    }
}

/// Queue row replacement finalizing a successful attempt.
fn completed_copy(item: &QueueItem, attempt: u32) -> QueueItem {
    let mut done = item.clone();
    done.status = QueueStatus::Completed;
    done.attempts = attempt;
    done.last_attempt_at = Some(now_ms());
    done.next_retry_at = None;
    done.error = None;
    done
}

/// Queue row replacement recording a failed attempt.
fn failed_copy(
    item: &QueueItem,
    attempt: u32,
    reason: &str,
    next_retry_at: Option<i64>,
) -> QueueItem {
    let mut failed = item.clone();
    failed.status = QueueStatus::Failed;
    failed.attempts = attempt;
    failed.last_attempt_at = Some(now_ms());
    failed.next_retry_at = next_retry_at;
    failed.error = Some(reason.to_string());
    failed
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;
    use tokio::sync::broadcast;

    use super::*;
    use crate::config::EngineConfig;
    use crate::models::{Assessment, Deficiency, Photo, Severity};
    use crate::net::ConnectionQuality;
    use crate::sync::remote::PhotoAck;

    #[derive(Default)]
    struct MockRemote {
        fail_ids: Mutex<HashSet<String>>,
        record_acks: Mutex<HashMap<String, RecordAck>>,
        record_calls: Mutex<Vec<(String, Value)>>,
        photo_calls: Mutex<Vec<PhotoMeta>>,
        delay: Option<Duration>,
        in_flight: AtomicU64,
        max_in_flight: AtomicU64,
        next_id: AtomicU64,
    }

    impl MockRemote {
        fn delayed(ms: u64) -> Self {
            Self {
                delay: Some(Duration::from_millis(ms)),
                ..Self::default()
            }
        }

        fn set_fail(&self, offline_id: &str) {
            self.fail_ids.lock().unwrap().insert(offline_id.to_string());
        }

        fn set_ack(&self, offline_id: &str, ack: RecordAck) {
            self.record_acks
                .lock()
                .unwrap()
                .insert(offline_id.to_string(), ack);
        }

        fn record_calls(&self) -> Vec<(String, Value)> {
            self.record_calls.lock().unwrap().clone()
        }

        fn photo_calls(&self) -> Vec<PhotoMeta> {
            self.photo_calls.lock().unwrap().clone()
        }

        fn next_server_id(&self) -> String {
            format!("{}", 900 + self.next_id.fetch_add(1, Ordering::SeqCst))
        }

        async fn simulate_latency(&self) {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl RemoteApi for MockRemote {
        async fn sync_record(
            &self,
            _kind: RecordKind,
            offline_id: &str,
            payload: &Value,
        ) -> crate::error::Result<RecordAck> {
            self.simulate_latency().await;
            self.record_calls
                .lock()
                .unwrap()
                .push((offline_id.to_string(), payload.clone()));
            if self.fail_ids.lock().unwrap().contains(offline_id) {
                return Err(Error::TransientNetwork("mock outage".to_string()));
            }
            if let Some(ack) = self.record_acks.lock().unwrap().get(offline_id) {
                return Ok(ack.clone());
            }
            Ok(RecordAck::clean(self.next_server_id()))
        }

        async fn sync_photo(
            &self,
            offline_id: &str,
            _encoded_payload: &str,
            meta: &PhotoMeta,
        ) -> crate::error::Result<PhotoAck> {
            self.simulate_latency().await;
            self.photo_calls.lock().unwrap().push(meta.clone());
            if self.fail_ids.lock().unwrap().contains(offline_id) {
                return Err(Error::TransientNetwork("mock outage".to_string()));
            }
            let server_id = self.next_server_id();
            Ok(PhotoAck {
                url: format!("https://media.example.com/photos/{server_id}.jpg"),
                server_id,
            })
        }
    }

    async fn engine_with(
        config: EngineConfig,
        remote: Arc<MockRemote>,
        quality: ConnectionQuality,
    ) -> (SyncEngine, LocalStore) {
        let store = LocalStore::open_in_memory(config).await.unwrap();
        let engine = SyncEngine::new(
            store.clone(),
            remote,
            NetworkMonitor::new(quality),
            EventBus::default(),
        );
        (engine, store)
    }

    fn drain(receiver: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_uploads_and_finalizes_records() {
        let remote = Arc::new(MockRemote::default());
        let (engine, store) =
            engine_with(EngineConfig::default(), remote.clone(), ConnectionQuality::Good).await;
        let mut events = engine.events().subscribe();

        let assessment = Assessment::new("proj-1", "Roof membrane");
        let deficiency = Deficiency::new(
            assessment.id.to_string(),
            "proj-1",
            "Ponding at drain",
            Severity::Medium,
        );
        store.save_assessment(&assessment).await.unwrap();
        store.save_deficiency(&deficiency).await.unwrap();

        let before = now_ms();
        let report = engine.sync().await.unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.synced, 2);
        assert_eq!(report.failed, 0);
        assert!(report.errors.is_empty());

        // Both records were tombstoned by deletion and the completed queue
        // rows purged by the cleanup phase.
        assert!(store.get_assessment(&assessment.id).await.unwrap().is_none());
        assert!(store.get_deficiency(&deficiency.id).await.unwrap().is_none());
        assert!(store.queue_items().await.unwrap().is_empty());
        assert!(store.last_sync_at().await.unwrap().unwrap() >= before);

        let events = drain(&mut events);
        assert_eq!(events[0].name(), "start");
        assert_eq!(
            events.iter().filter(|e| e.name() == "item_synced").count(),
            2
        );
        assert_eq!(events.last().unwrap().name(), "complete");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn assessment_sync_rekeys_child_references() {
        let remote = Arc::new(MockRemote::default());
        let (engine, store) =
            engine_with(EngineConfig::default(), remote.clone(), ConnectionQuality::Good).await;

        let assessment = Assessment::new("proj-1", "Chiller");
        let offline_id = assessment.id.to_string();
        remote.set_ack(&offline_id, RecordAck::clean("987"));

        let photo = Photo::new(&offline_id, "proj-1", vec![1, 2, 3], 4, 4);
        let deficiency = Deficiency::new(
            &offline_id,
            "proj-1",
            "Compressor short-cycling",
            Severity::High,
        );
        store.save_assessment(&assessment).await.unwrap();
        store.save_photo(&photo).await.unwrap();
        store.save_deficiency(&deficiency).await.unwrap();

        let report = engine.sync().await.unwrap();
        assert_eq!(report.synced, 3);
        assert_eq!(report.failed, 0);

        // The photo was uploaded with the rewritten parent reference and is
        // retained locally as a synced cache copy.
        let photo_calls = remote.photo_calls();
        assert_eq!(photo_calls.len(), 1);
        assert_eq!(photo_calls[0].assessment_id, "987");

        let cached = store.photo_for_sync(&photo.id).await.unwrap().unwrap();
        assert_eq!(cached.assessment_id, "987");
        assert_eq!(cached.sync_status, SyncStatus::Synced);
        assert!(cached.server_id.is_some());
        assert!(cached.remote_url.is_some());
        assert!(cached.original.is_none());

        // The deficiency traveled with the server-side parent id too.
        let calls = remote.record_calls();
        let (_, deficiency_payload) = calls
            .iter()
            .find(|(id, _)| *id == deficiency.id.to_string())
            .unwrap();
        assert_eq!(deficiency_payload["assessment_id"], "987");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn second_start_while_running_is_refused() {
        let remote = Arc::new(MockRemote::delayed(150));
        let (engine, store) =
            engine_with(EngineConfig::default(), remote, ConnectionQuality::Good).await;

        let assessment = Assessment::new("proj-1", "Facade");
        store.save_assessment(&assessment).await.unwrap();

        let background = tokio::spawn({
            let engine = engine.clone();
            async move { engine.sync().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(engine.is_running());
        assert!(matches!(engine.sync().await, Err(Error::SyncInProgress)));

        let report = background.await.unwrap().unwrap();
        assert_eq!(report.synced, 1);
        assert!(!engine.is_running());

        // An idle engine accepts the next run.
        let report = engine.sync().await.unwrap();
        assert_eq!(report.synced, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_engine_refuses_to_start() {
        let remote = Arc::new(MockRemote::default());
        let (engine, store) =
            engine_with(EngineConfig::default(), remote, ConnectionQuality::Offline).await;

        let assessment = Assessment::new("proj-1", "Parking deck");
        store.save_assessment(&assessment).await.unwrap();

        assert!(matches!(engine.sync().await, Err(Error::Offline)));
        assert_eq!(store.pending_count().await.unwrap(), 1);
    }

    /// Remote double that reads the record back out of the store while the
    /// attempt is in flight, capturing the status a concurrent host reader
    /// would observe.
    struct StatusPeekRemote {
        store: LocalStore,
        seen: Mutex<Vec<SyncStatus>>,
    }

    #[async_trait::async_trait]
    impl RemoteApi for StatusPeekRemote {
        async fn sync_record(
            &self,
            _kind: RecordKind,
            offline_id: &str,
            _payload: &Value,
        ) -> crate::error::Result<RecordAck> {
            let id = offline_id.parse::<LocalId>().unwrap();
            let assessment = self.store.get_assessment(&id).await.unwrap().unwrap();
            self.seen.lock().unwrap().push(assessment.sync_status);
            Ok(RecordAck::clean("901"))
        }

        async fn sync_photo(
            &self,
            _offline_id: &str,
            _encoded_payload: &str,
            _meta: &PhotoMeta,
        ) -> crate::error::Result<PhotoAck> {
            Err(Error::Validation("no photos in this test".to_string()))
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn records_read_as_syncing_while_the_attempt_is_in_flight() {
        let store = LocalStore::open_in_memory(EngineConfig::default())
            .await
            .unwrap();
        let remote = Arc::new(StatusPeekRemote {
            store: store.clone(),
            seen: Mutex::new(Vec::new()),
        });
        let engine = SyncEngine::new(
            store.clone(),
            remote.clone(),
            NetworkMonitor::new(ConnectionQuality::Good),
            EventBus::default(),
        );

        let assessment = Assessment::new("proj-1", "Switchgear");
        store.save_assessment(&assessment).await.unwrap();
        assert_eq!(
            store
                .get_assessment(&assessment.id)
                .await
                .unwrap()
                .unwrap()
                .sync_status,
            SyncStatus::Pending
        );

        let report = engine.sync().await.unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(*remote.seen.lock().unwrap(), vec![SyncStatus::Syncing]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_attempts_reschedule_with_backoff() {
        let remote = Arc::new(MockRemote::default());
        let config = EngineConfig::default().with_retry_backoff(1_000, 60_000, 5);
        let (engine, store) =
            engine_with(config, remote.clone(), ConnectionQuality::Good).await;

        let assessment = Assessment::new("proj-1", "Boiler");
        let offline_id = assessment.id.to_string();
        remote.set_fail(&offline_id);
        store.save_assessment(&assessment).await.unwrap();

        let before = now_ms();
        let report = engine.sync().await.unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.synced, 0);
        assert_eq!(report.failed, 1);
        assert!(report.errors[0].contains("mock outage"));

        // The record is retained with its failure captured.
        let failed = store.get_assessment(&assessment.id).await.unwrap().unwrap();
        assert_eq!(failed.sync_status, SyncStatus::Failed);
        assert_eq!(failed.retry_count, 1);
        assert!(failed.sync_error.unwrap().contains("mock outage"));

        // First failure schedules the initial delay.
        let item = store.queue_item_for(&offline_id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.attempts, 1);
        let next_retry_at = item.next_retry_at.unwrap();
        assert!(next_retry_at >= before + 1_000);
        assert!(next_retry_at <= now_ms() + 1_000);

        assert!(store.dequeue_ready(now_ms()).await.unwrap().is_empty());
        assert_eq!(
            store.dequeue_ready(now_ms() + 61_000).await.unwrap().len(),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_record_is_parked_not_retried() {
        let remote = Arc::new(MockRemote::default());
        let (engine, store) =
            engine_with(EngineConfig::default(), remote.clone(), ConnectionQuality::Good).await;
        let mut events = engine.events().subscribe();

        let orphan = QueueItem::new(RecordKind::Assessment, LocalId::new().to_string());
        store
            .execute_batch(&[BatchOp::PutQueueItem(orphan.clone())])
            .await
            .unwrap();

        let report = engine.sync().await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(report.errors[0].contains("no longer in the local store"));

        let item = store.queue_item_for(&orphan.item_id).await.unwrap().unwrap();
        assert!(item.is_permanently_failed());
        assert!(remote.record_calls().is_empty());

        let parked = drain(&mut events)
            .into_iter()
            .find_map(|event| match event {
                SyncEvent::ItemFailed { will_retry, .. } => Some(will_retry),
                _ => None,
            })
            .unwrap();
        assert!(!parked);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reported_conflict_is_recorded_and_item_finalized() {
        let remote = Arc::new(MockRemote::default());
        let (engine, store) =
            engine_with(EngineConfig::default(), remote.clone(), ConnectionQuality::Good).await;
        let mut events = engine.events().subscribe();

        let assessment = Assessment::new("proj-1", "Roof").with_notes("ok");
        let offline_id = assessment.id.to_string();
        let mut server_version = assessment.sync_payload();
        server_version["notes"] = serde_json::json!("ok, crack monitored quarterly");
        remote.set_ack(
            &offline_id,
            RecordAck {
                server_id: "444".to_string(),
                conflict: true,
                server_version: Some(server_version),
                resolution: None,
            },
        );
        store.save_assessment(&assessment).await.unwrap();

        let report = engine.sync().await.unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(report.conflicts, 1);

        // The server acked the record, so it still finalizes.
        assert!(store.get_assessment(&assessment.id).await.unwrap().is_none());

        let conflicts = store.conflicts_for(&offline_id).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].resolution, ConflictResolution::Merged);
        assert_eq!(conflicts[0].conflicting_fields, vec!["notes"]);
        let merged = conflicts[0].merged_version.as_ref().unwrap();
        assert_eq!(merged["notes"], "ok, crack monitored quarterly");

        assert!(drain(&mut events)
            .iter()
            .any(|event| event.name() == "conflict_detected"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn photo_with_unsynced_parent_is_held_back() {
        let remote = Arc::new(MockRemote::default());
        let (engine, store) =
            engine_with(EngineConfig::default(), remote.clone(), ConnectionQuality::Good).await;

        let assessment = Assessment::new("proj-1", "Cooling tower");
        let offline_id = assessment.id.to_string();
        remote.set_fail(&offline_id);

        let photo = Photo::new(&offline_id, "proj-1", vec![9, 9, 9], 4, 4);
        store.save_assessment(&assessment).await.unwrap();
        store.save_photo(&photo).await.unwrap();

        let report = engine.sync().await.unwrap();
        assert_eq!(report.synced, 0);
        assert_eq!(report.failed, 2);

        // The upload never happened and the photo is waiting on backoff.
        assert!(remote.photo_calls().is_empty());
        let held = store.photo_for_sync(&photo.id).await.unwrap().unwrap();
        assert_eq!(held.sync_status, SyncStatus::Failed);
        assert!(held.sync_error.unwrap().contains("parent assessment"));

        let item = store.queue_item_for(&photo.id.to_string()).await.unwrap().unwrap();
        assert!(item.next_retry_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn abort_stops_between_batches() {
        let remote = Arc::new(MockRemote::delayed(100));
        let config = EngineConfig::default().with_parallel_limit(1);
        let (engine, store) = engine_with(config, remote, ConnectionQuality::Good).await;

        for title in ["One", "Two", "Three"] {
            store
                .save_assessment(&Assessment::new("proj-1", title))
                .await
                .unwrap();
        }

        let background = tokio::spawn({
            let engine = engine.clone();
            async move { engine.sync().await }
        });
        tokio::time::sleep(Duration::from_millis(120)).await;
        engine.request_abort();

        let report = background.await.unwrap().unwrap();
        assert_eq!(report.status, RunStatus::Aborted);
        assert!(report.synced < 3);

        // Unprocessed items are untouched and ready for the next run.
        let remaining = store.dequeue_ready(now_ms()).await.unwrap();
        assert!(!remaining.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn degraded_network_narrows_parallelism() {
        let remote = Arc::new(MockRemote::delayed(50));
        let config = EngineConfig::default().with_parallel_limit(4);
        let (engine, store) =
            engine_with(config, remote.clone(), ConnectionQuality::Moderate).await;

        for title in ["A", "B", "C", "D"] {
            store
                .save_assessment(&Assessment::new("proj-1", title))
                .await
                .unwrap();
        }

        let report = engine.sync().await.unwrap();
        assert_eq!(report.synced, 4);
        assert!(remote.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn connectivity_restore_triggers_auto_sync() {
        let remote = Arc::new(MockRemote::default());
        let store = LocalStore::open_in_memory(EngineConfig::default())
            .await
            .unwrap();
        let network = NetworkMonitor::offline();
        let engine = SyncEngine::new(
            store.clone(),
            remote,
            network.clone(),
            EventBus::default(),
        );

        let assessment = Assessment::new("proj-1", "Elevator");
        store.save_assessment(&assessment).await.unwrap();

        let auto = engine.spawn_auto(Duration::from_secs(3_600));
        tokio::time::sleep(Duration::from_millis(30)).await;
        network.report(ConnectionQuality::Good);

        let mut synced = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if store.pending_count().await.unwrap() == 0
                && store.get_assessment(&assessment.id).await.unwrap().is_none()
            {
                synced = true;
                break;
            }
        }
        auto.abort();
        assert!(synced);
    }
}
