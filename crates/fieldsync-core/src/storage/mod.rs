//! Storage quota enforcement, eviction and retention cleanup.
//!
//! The governor keeps the local database inside the configured ceiling.
//! It only ever deletes data that is already on the server: synced photos
//! (largest payloads first in practice, since they dominate usage), stale
//! reference caches, and terminal queue entries past their retention window.
//! Unsynced field data is never touched.

mod usage;

pub use usage::{measure_usage, StorageUsage, StoreUsage};

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::services::LocalStore;
use crate::sync::{EventBus, SyncEvent};
use crate::util::now_ms;

/// Fraction of the ceiling at which hosts get warned.
const WARN_FRACTION: f64 = 0.80;
/// Fraction of the ceiling at which new local writes are refused.
const BLOCK_FRACTION: f64 = 0.95;

/// Write-gating state derived from the last quota check.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QuotaState {
    /// Usage below the warning threshold.
    #[default]
    Ok,
    /// Usage at or above 80% of the ceiling; writes still allowed.
    Warned,
    /// Usage at or above 95% of the ceiling; new writes are refused.
    Blocked,
}

impl QuotaState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warned => "warned",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for QuotaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuotaState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ok" => Ok(Self::Ok),
            "warned" => Ok(Self::Warned),
            "blocked" => Ok(Self::Blocked),
            other => Err(Error::CorruptLocalData(format!(
                "unknown quota state: {other}"
            ))),
        }
    }
}

/// Outcome of a quota check: the fresh measurement and the derived state.
#[derive(Debug, Clone)]
pub struct QuotaReport {
    pub usage: StorageUsage,
    pub state: QuotaState,
}

impl QuotaReport {
    #[must_use]
    pub const fn is_blocked(&self) -> bool {
        matches!(self.state, QuotaState::Blocked)
    }
}

/// What one retention sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub photos_purged: u64,
    pub projects_purged: u64,
    pub assets_purged: u64,
    pub queue_purged: u64,
}

impl CleanupReport {
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.photos_purged + self.projects_purged + self.assets_purged + self.queue_purged
    }
}

/// Keeps local usage inside the configured ceiling.
#[derive(Clone)]
pub struct StorageGovernor {
    store: LocalStore,
    events: EventBus,
}

impl StorageGovernor {
    #[must_use]
    pub const fn new(store: LocalStore, events: EventBus) -> Self {
        Self { store, events }
    }

    /// Measure usage, persist the snapshot, and derive the write-gating state.
    ///
    /// The state is recomputed from scratch every call, so a `Blocked` store
    /// unblocks as soon as usage drops back under the thresholds.
    pub async fn check_quota(&self) -> Result<QuotaReport> {
        let usage = self.store.estimate_usage().await?;
        let fraction = usage.fraction_used();

        let state = if fraction >= BLOCK_FRACTION {
            QuotaState::Blocked
        } else if fraction >= WARN_FRACTION {
            QuotaState::Warned
        } else {
            QuotaState::Ok
        };

        self.store.save_usage_snapshot(&usage).await?;
        self.store.set_quota_state(state).await?;

        if state != QuotaState::Ok {
            tracing::warn!(
                "Local storage at {:.1}% of {} bytes ({state})",
                usage.percent_used(),
                usage.limit_bytes
            );
            self.events.emit(SyncEvent::StorageWarning {
                state,
                percent_used: usage.percent_used(),
                total_bytes: usage.total_bytes,
                limit_bytes: usage.limit_bytes,
            });
        }

        Ok(QuotaReport { usage, state })
    }

    /// Delete synced photos, oldest first, until `target_free_bytes` are
    /// freed. Returns the bytes actually freed, which may fall short when
    /// not enough synced data exists. Unsynced photos are never eligible.
    pub async fn evict(&self, target_free_bytes: u64) -> Result<u64> {
        if target_free_bytes == 0 {
            return Ok(0);
        }

        let candidates = self.store.synced_photo_candidates().await?;
        let mut chosen = Vec::new();
        let mut freed = 0u64;
        for candidate in candidates {
            if freed >= target_free_bytes {
                break;
            }
            freed += candidate.bytes;
            chosen.push(candidate.id);
        }

        if chosen.is_empty() {
            return Ok(0);
        }

        let deleted = self.store.delete_photos(&chosen).await?;
        tracing::info!("Evicted {deleted} synced photos, freed {freed} bytes");
        Ok(freed)
    }

    /// Make room for an incoming write of `incoming_bytes`, evicting synced
    /// photos when the projection exceeds the ceiling.
    pub async fn ensure_capacity(&self, incoming_bytes: u64) -> Result<()> {
        let usage = self.store.estimate_usage().await?;
        let projected = usage.total_bytes.saturating_add(incoming_bytes);
        if projected <= usage.limit_bytes {
            return Ok(());
        }

        let shortfall = projected - usage.limit_bytes;
        let freed = self.evict(shortfall).await?;
        self.check_quota().await?;

        if freed < shortfall {
            return Err(Error::QuotaExceeded(format!(
                "write of {incoming_bytes} bytes needs {shortfall} more bytes; \
                 only {freed} could be evicted"
            )));
        }
        Ok(())
    }

    /// Retention sweep: expired synced photos, stale reference caches, and
    /// terminal queue entries past their window. Failures are logged and
    /// skipped; a sweep never fails the caller.
    pub async fn cleanup(&self) -> CleanupReport {
        let now = now_ms();
        let config = self.store.config().clone();
        let mut report = CleanupReport::default();

        match self
            .store
            .purge_synced_photos_older_than(config.photo_retention_cutoff(now))
            .await
        {
            Ok(count) => report.photos_purged = count,
            Err(error) => tracing::warn!("Photo retention cleanup failed: {error}"),
        }

        let cache_cutoff = config.project_cache_cutoff(now);
        match self.store.purge_project_cache_older_than(cache_cutoff).await {
            Ok(count) => report.projects_purged = count,
            Err(error) => tracing::warn!("Project cache cleanup failed: {error}"),
        }
        match self.store.purge_asset_cache_older_than(cache_cutoff).await {
            Ok(count) => report.assets_purged = count,
            Err(error) => tracing::warn!("Asset cache cleanup failed: {error}"),
        }

        match self
            .store
            .purge_queue_older_than(config.queue_retention_cutoff(now))
            .await
        {
            Ok(count) => report.queue_purged = count,
            Err(error) => tracing::warn!("Queue retention cleanup failed: {error}"),
        }

        if report.total() > 0 {
            tracing::info!(
                "Cleanup removed {} photos, {} projects, {} assets, {} queue entries",
                report.photos_purged,
                report.projects_purged,
                report.assets_purged,
                report.queue_purged
            );
        }

        report
    }
}
