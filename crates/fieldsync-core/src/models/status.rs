//! Record lifecycle and kind enums shared across the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Sync lifecycle of a locally stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Captured locally, not yet attempted
    Pending,
    /// A sync attempt is in flight
    Syncing,
    /// Acknowledged by the server
    Synced,
    /// Last attempt failed; retained for retry
    Failed,
}

impl SyncStatus {
    /// Stable storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(Error::CorruptLocalData(format!(
                "unknown sync status '{other}'"
            ))),
        }
    }
}

/// The three syncable record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Assessment,
    Photo,
    Deficiency,
}

impl RecordKind {
    /// Stable storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Assessment => "assessment",
            Self::Photo => "photo",
            Self::Deficiency => "deficiency",
        }
    }

    /// Queue priority for this kind; lower numbers are served first.
    ///
    /// Assessments go before photos because photo foreign keys must be
    /// rewritten to server ids once the parent assessment syncs.
    #[must_use]
    pub const fn default_priority(self) -> u8 {
        match self {
            Self::Assessment => 1,
            Self::Photo => 2,
            Self::Deficiency => 3,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assessment" => Ok(Self::Assessment),
            "photo" => Ok(Self::Photo),
            "deficiency" => Ok(Self::Deficiency),
            other => Err(Error::CorruptLocalData(format!(
                "unknown record kind '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_through_str() {
        for status in [
            SyncStatus::Pending,
            SyncStatus::Syncing,
            SyncStatus::Synced,
            SyncStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_corrupt_data() {
        let err = "half-synced".parse::<SyncStatus>().unwrap_err();
        assert!(matches!(err, Error::CorruptLocalData(_)));
    }

    #[test]
    fn kind_roundtrips_through_str() {
        for kind in [
            RecordKind::Assessment,
            RecordKind::Photo,
            RecordKind::Deficiency,
        ] {
            assert_eq!(kind.as_str().parse::<RecordKind>().unwrap(), kind);
        }
    }

    #[test]
    fn assessments_outrank_photos_and_deficiencies() {
        assert!(
            RecordKind::Assessment.default_priority() < RecordKind::Photo.default_priority()
        );
        assert!(RecordKind::Photo.default_priority() < RecordKind::Deficiency.default_priority());
    }
}
