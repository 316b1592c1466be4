//! Assessment record model

use serde::{Deserialize, Serialize};

use super::{LocalId, SyncStatus};
use crate::util::now_ms;

/// A condition assessment captured in the field.
///
/// Identified by its offline id until the server acknowledges it; photos and
/// deficiencies reference the assessment through that id and are re-keyed to
/// the server id after a successful sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    /// Offline identifier (primary key in the local store)
    pub id: LocalId,
    /// Server identifier once assigned
    pub server_id: Option<String>,
    /// Project this assessment belongs to
    pub project_id: String,
    /// Asset under inspection, when known
    pub asset_id: Option<String>,
    /// Component classification code (see cached components)
    pub component_code: Option<String>,
    /// Short human-entered title
    pub title: String,
    /// Condition rating, 1 (failing) to 5 (excellent)
    pub condition_rating: Option<i64>,
    /// Free-text observations
    pub notes: Option<String>,
    /// Name of the inspecting user
    pub inspector: Option<String>,
    /// Sync lifecycle state
    pub sync_status: SyncStatus,
    /// Failed sync attempts so far
    pub retry_count: u32,
    /// Reason for the most recent failure
    pub sync_error: Option<String>,
    /// Creation timestamp (unix ms)
    pub created_at: i64,
    /// Last update timestamp (unix ms)
    pub updated_at: i64,
}

impl Assessment {
    /// Create a new pending assessment for a project.
    #[must_use]
    pub fn new(project_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: LocalId::new(),
            server_id: None,
            project_id: project_id.into(),
            asset_id: None,
            component_code: None,
            title: title.into(),
            condition_rating: None,
            notes: None,
            inspector: None,
            sync_status: SyncStatus::Pending,
            retry_count: 0,
            sync_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach the assessed asset.
    #[must_use]
    pub fn with_asset(mut self, asset_id: impl Into<String>) -> Self {
        self.asset_id = Some(asset_id.into());
        self
    }

    /// Attach a component classification code.
    #[must_use]
    pub fn with_component(mut self, code: impl Into<String>) -> Self {
        self.component_code = Some(code.into());
        self
    }

    /// Set the condition rating.
    #[must_use]
    pub const fn with_condition_rating(mut self, rating: i64) -> Self {
        self.condition_rating = Some(rating);
        self
    }

    /// Set free-text observations.
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Domain payload sent over the sync contract; excludes local lifecycle
    /// bookkeeping.
    pub fn sync_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "project_id": self.project_id,
            "asset_id": self.asset_id,
            "component_code": self.component_code,
            "title": self.title,
            "condition_rating": self.condition_rating,
            "notes": self.notes,
            "inspector": self.inspector,
            "captured_at": self.created_at,
            "updated_at": self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_assessment_is_pending() {
        let assessment = Assessment::new("proj-1", "Roof membrane");
        assert_eq!(assessment.sync_status, SyncStatus::Pending);
        assert_eq!(assessment.retry_count, 0);
        assert!(assessment.server_id.is_none());
        assert_eq!(assessment.created_at, assessment.updated_at);
    }

    #[test]
    fn builders_fill_optional_fields() {
        let assessment = Assessment::new("proj-1", "Chiller")
            .with_asset("asset-9")
            .with_component("D3030")
            .with_condition_rating(2)
            .with_notes("compressor short-cycling");
        assert_eq!(assessment.asset_id.as_deref(), Some("asset-9"));
        assert_eq!(assessment.component_code.as_deref(), Some("D3030"));
        assert_eq!(assessment.condition_rating, Some(2));
    }

    #[test]
    fn sync_payload_omits_lifecycle_fields() {
        let assessment = Assessment::new("proj-1", "Facade");
        let payload = assessment.sync_payload();
        assert!(payload.get("sync_status").is_none());
        assert!(payload.get("retry_count").is_none());
        assert_eq!(payload["project_id"], "proj-1");
    }
}
