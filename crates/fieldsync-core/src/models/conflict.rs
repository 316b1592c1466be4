//! Sync conflict model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::RecordKind;
use crate::error::Error;
use crate::util::now_ms;

/// How a conflict was (or must be) settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Local version kept wholesale
    LocalWins,
    /// Server version kept wholesale
    ServerWins,
    /// Field-level merge applied
    Merged,
    /// Automatic resolution declined; a human must decide
    Manual,
}

impl ConflictResolution {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalWins => "local_wins",
            Self::ServerWins => "server_wins",
            Self::Merged => "merged",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictResolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local_wins" => Ok(Self::LocalWins),
            "server_wins" => Ok(Self::ServerWins),
            "merged" => Ok(Self::Merged),
            "manual" => Ok(Self::Manual),
            other => Err(Error::CorruptLocalData(format!(
                "unknown conflict resolution: {other}"
            ))),
        }
    }
}

/// Recorded divergence between a local record and its server counterpart.
///
/// Only written when the remote side reports conflicting state. Both full
/// versions are retained so a reviewer can audit what the merge chose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Conflict row identifier (assigned by the store)
    pub id: i64,
    /// Offline id of the record involved
    pub item_id: String,
    /// Which record table the item lives in
    pub item_type: RecordKind,
    /// Local version at resolution time
    pub local_version: serde_json::Value,
    /// Server version at resolution time
    pub server_version: serde_json::Value,
    /// How the divergence was settled
    pub resolution: ConflictResolution,
    /// Result of a field-level merge, when one was applied
    pub merged_version: Option<serde_json::Value>,
    /// Names of the fields that genuinely conflicted
    pub conflicting_fields: Vec<String>,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
}

impl ConflictRecord {
    /// Create a conflict record ready for insertion (`id` assigned on write).
    #[must_use]
    pub fn new(
        item_id: impl Into<String>,
        item_type: RecordKind,
        local_version: serde_json::Value,
        server_version: serde_json::Value,
        resolution: ConflictResolution,
    ) -> Self {
        Self {
            id: 0,
            item_id: item_id.into(),
            item_type,
            local_version,
            server_version,
            resolution,
            merged_version: None,
            conflicting_fields: Vec::new(),
            resolved_at: now_ms(),
        }
    }

    /// Attach the merged result and the fields that conflicted.
    #[must_use]
    pub fn with_merge(
        mut self,
        merged_version: serde_json::Value,
        conflicting_fields: Vec<String>,
    ) -> Self {
        self.merged_version = Some(merged_version);
        self.conflicting_fields = conflicting_fields;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_string_roundtrip() {
        for resolution in [
            ConflictResolution::LocalWins,
            ConflictResolution::ServerWins,
            ConflictResolution::Merged,
            ConflictResolution::Manual,
        ] {
            assert_eq!(
                resolution.as_str().parse::<ConflictResolution>().unwrap(),
                resolution
            );
        }
        assert!("theirs".parse::<ConflictResolution>().is_err());
    }

    #[test]
    fn merge_details_attach_to_record() {
        let record = ConflictRecord::new(
            "offline-abc",
            RecordKind::Assessment,
            serde_json::json!({"notes": "ok, fixed leak"}),
            serde_json::json!({"notes": "ok"}),
            ConflictResolution::Merged,
        )
        .with_merge(
            serde_json::json!({"notes": "ok, fixed leak"}),
            vec!["notes".to_string()],
        );

        assert_eq!(record.resolution, ConflictResolution::Merged);
        assert_eq!(record.conflicting_fields, vec!["notes"]);
        assert!(record.merged_version.is_some());
    }
}
