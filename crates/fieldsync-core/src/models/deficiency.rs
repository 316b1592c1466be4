//! Deficiency record model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{LocalId, SyncStatus};
use crate::error::Error;
use crate::util::now_ms;

/// How urgently a deficiency needs attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(Error::CorruptLocalData(format!(
                "unknown severity: {other}"
            ))),
        }
    }
}

/// A defect or issue observed during an inspection.
///
/// Like photos, a deficiency references its parent assessment by either the
/// offline id or the server id, depending on whether the parent has synced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deficiency {
    /// Offline identifier (primary key in the local store)
    pub id: LocalId,
    /// Server identifier once assigned
    pub server_id: Option<String>,
    /// Owning assessment: offline id before the parent syncs, server id after
    pub assessment_id: String,
    /// Project this deficiency belongs to
    pub project_id: String,
    /// Short description of the defect
    pub description: String,
    /// Urgency classification
    pub severity: Severity,
    /// Recommended remediation, when the inspector records one
    pub recommendation: Option<String>,
    /// Estimated cost to remediate, when known
    pub estimated_cost: Option<f64>,
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

impl Deficiency {
    /// Create a new pending deficiency owned by an assessment.
    #[must_use]
    pub fn new(
        assessment_id: impl Into<String>,
        project_id: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
    ) -> Self {
        let now = now_ms();
        Self {
            id: LocalId::new(),
            server_id: None,
            assessment_id: assessment_id.into(),
            project_id: project_id.into(),
            description: description.into(),
            severity,
            recommendation: None,
            estimated_cost: None,
            sync_status: SyncStatus::Pending,
            retry_count: 0,
            sync_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the recommended remediation.
    #[must_use]
    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }

    /// Set the estimated remediation cost.
    #[must_use]
    pub const fn with_estimated_cost(mut self, cost: f64) -> Self {
        self.estimated_cost = Some(cost);
        self
    }

    /// Domain fields serialized for upload, excluding local lifecycle state.
    #[must_use]
    pub fn sync_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "offline_id": self.id.to_string(),
            "assessment_id": self.assessment_id,
            "project_id": self.project_id,
            "description": self.description,
            "severity": self.severity.as_str(),
            "recommendation": self.recommendation,
            "estimated_cost": self.estimated_cost,
            "created_at": self.created_at,
            "updated_at": self.updated_at,
        })
    }
}
