//! Cached reference data pulled from the server for offline browsing
//!
//! These rows are read-only copies. They are never queued for sync and the
//! storage governor drops them freely once their cache TTL lapses.

use serde::{Deserialize, Serialize};

use crate::util::now_ms;

/// A project the user can record inspections against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedProject {
    /// Server identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Full server payload, kept verbatim for the host UI
    pub data: serde_json::Value,
    /// When this copy was fetched (unix ms)
    pub cached_at: i64,
}

impl CachedProject {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            data,
            cached_at: now_ms(),
        }
    }
}

/// One entry of the component taxonomy inspectors classify findings under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedComponent {
    /// Server identifier
    pub id: String,
    /// Taxonomy code, e.g. "B2010"
    pub code: String,
    /// Display name
    pub name: String,
    /// Depth in the taxonomy tree (1 = top level)
    pub level: i64,
    /// Full server payload
    pub data: serde_json::Value,
    /// When this copy was fetched (unix ms)
    pub cached_at: i64,
}

impl CachedComponent {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        code: impl Into<String>,
        name: impl Into<String>,
        level: i64,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            code: code.into(),
            name: name.into(),
            level,
            data,
            cached_at: now_ms(),
        }
    }
}

/// An asset (building, structure, system) within a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAsset {
    /// Server identifier
    pub id: String,
    /// Owning project
    pub project_id: String,
    /// Display name
    pub name: String,
    /// Full server payload
    pub data: serde_json::Value,
    /// When this copy was fetched (unix ms)
    pub cached_at: i64,
}

impl CachedAsset {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        project_id: impl Into<String>,
        name: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            name: name.into(),
            data,
            cached_at: now_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_rows_record_fetch_time() {
        let before = now_ms();
        let project = CachedProject::new("p1", "Harbour Terminal", serde_json::json!({}));
        assert!(project.cached_at >= before);

        let component =
            CachedComponent::new("c1", "B2010", "Exterior Walls", 2, serde_json::json!({}));
        assert_eq!(component.level, 2);

        let asset = CachedAsset::new("a1", "p1", "Warehouse 4", serde_json::json!({}));
        assert_eq!(asset.project_id, "p1");
    }
}
