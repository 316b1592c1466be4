//! Engine configuration.
//!
//! One `EngineConfig` is constructed by the host and handed to the local
//! store, the storage governor, and the sync engine. There is no global
//! configuration and no command-line surface.

use serde::{Deserialize, Serialize};

const BYTES_PER_MB: u64 = 1024 * 1024;
const MS_PER_HOUR: i64 = 60 * 60 * 1000;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Tunable limits and retry behavior for the offline engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ceiling for all locally stored data, in megabytes.
    pub max_total_size_mb: u64,
    /// Per-photo payload ceiling (compressed + retained original), in megabytes.
    pub max_photo_size_mb: u64,
    /// How long synced photos are kept locally before retention cleanup.
    pub photo_cache_ttl_days: u32,
    /// How long cached projects/assets stay fresh.
    pub project_cache_ttl_hours: u32,
    /// How long terminal queue entries are kept before cleanup.
    pub sync_queue_max_age_days: u32,
    /// First retry delay after a failed sync attempt.
    pub initial_retry_delay_ms: u64,
    /// Upper bound for the exponential retry delay.
    pub max_retry_delay_ms: u64,
    /// Attempts before an item is marked permanently failed.
    pub max_retries: u32,
    /// Upper bound for items processed concurrently within a sync phase.
    pub parallel_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_total_size_mb: 500,
            max_photo_size_mb: 10,
            photo_cache_ttl_days: 30,
            project_cache_ttl_hours: 24,
            sync_queue_max_age_days: 7,
            initial_retry_delay_ms: 1_000,
            max_retry_delay_ms: 60_000,
            max_retries: 5,
            parallel_limit: 3,
        }
    }
}

impl EngineConfig {
    /// Set the total local storage ceiling in megabytes.
    #[must_use]
    pub const fn with_max_total_size_mb(mut self, mb: u64) -> Self {
        self.max_total_size_mb = mb;
        self
    }

    /// Set the per-photo payload ceiling in megabytes.
    #[must_use]
    pub const fn with_max_photo_size_mb(mut self, mb: u64) -> Self {
        self.max_photo_size_mb = mb;
        self
    }

    /// Set the retention window for synced photos.
    #[must_use]
    pub const fn with_photo_cache_ttl_days(mut self, days: u32) -> Self {
        self.photo_cache_ttl_days = days;
        self
    }

    /// Set the freshness window for cached reference data.
    #[must_use]
    pub const fn with_project_cache_ttl_hours(mut self, hours: u32) -> Self {
        self.project_cache_ttl_hours = hours;
        self
    }

    /// Set the retention window for terminal queue entries.
    #[must_use]
    pub const fn with_sync_queue_max_age_days(mut self, days: u32) -> Self {
        self.sync_queue_max_age_days = days;
        self
    }

    /// Set the retry backoff parameters.
    #[must_use]
    pub const fn with_retry_backoff(
        mut self,
        initial_delay_ms: u64,
        max_delay_ms: u64,
        max_retries: u32,
    ) -> Self {
        self.initial_retry_delay_ms = initial_delay_ms;
        self.max_retry_delay_ms = max_delay_ms;
        self.max_retries = max_retries;
        self
    }

    /// Set the per-phase concurrency ceiling.
    #[must_use]
    pub const fn with_parallel_limit(mut self, limit: usize) -> Self {
        self.parallel_limit = limit;
        self
    }

    /// Total storage ceiling in bytes.
    pub const fn max_total_bytes(&self) -> u64 {
        self.max_total_size_mb * BYTES_PER_MB
    }

    /// Per-photo payload ceiling in bytes.
    pub const fn max_photo_bytes(&self) -> u64 {
        self.max_photo_size_mb * BYTES_PER_MB
    }

    /// Cutoff timestamp (unix ms) below which synced photos are expired.
    pub fn photo_retention_cutoff(&self, now_ms: i64) -> i64 {
        now_ms - i64::from(self.photo_cache_ttl_days) * MS_PER_DAY
    }

    /// Cutoff timestamp (unix ms) below which cached reference data is stale.
    pub fn project_cache_cutoff(&self, now_ms: i64) -> i64 {
        now_ms - i64::from(self.project_cache_ttl_hours) * MS_PER_HOUR
    }

    /// Cutoff timestamp (unix ms) below which terminal queue entries expire.
    pub fn queue_retention_cutoff(&self, now_ms: i64) -> i64 {
        now_ms - i64::from(self.sync_queue_max_age_days) * MS_PER_DAY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.max_total_bytes(), 500 * 1024 * 1024);
        assert_eq!(config.max_photo_bytes(), 10 * 1024 * 1024);
        assert_eq!(config.parallel_limit, 3);
        assert!(config.initial_retry_delay_ms < config.max_retry_delay_ms);
    }

    #[test]
    fn builders_override_fields() {
        let config = EngineConfig::default()
            .with_max_total_size_mb(64)
            .with_retry_backoff(500, 8_000, 3)
            .with_parallel_limit(1);
        assert_eq!(config.max_total_size_mb, 64);
        assert_eq!(config.initial_retry_delay_ms, 500);
        assert_eq!(config.max_retry_delay_ms, 8_000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.parallel_limit, 1);
    }

    #[test]
    fn retention_cutoffs_subtract_windows() {
        let config = EngineConfig::default()
            .with_photo_cache_ttl_days(1)
            .with_project_cache_ttl_hours(2)
            .with_sync_queue_max_age_days(1);
        let now = 1_000 * MS_PER_DAY;
        assert_eq!(config.photo_retention_cutoff(now), now - MS_PER_DAY);
        assert_eq!(config.project_cache_cutoff(now), now - 2 * MS_PER_HOUR);
        assert_eq!(config.queue_retention_cutoff(now), now - MS_PER_DAY);
    }

    #[test]
    fn config_roundtrips_through_json() {
        let config = EngineConfig::default().with_max_photo_size_mb(4);
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
