//! Remote sync contract.
//!
//! Two operations, consumed only by the sync engine. The trait is
//! object-safe so hosts can hand in an HTTP adapter, a test double, or
//! whatever transport their deployment uses; nothing else in the crate
//! depends on a concrete remote.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::models::{ConflictResolution, GeoPoint, Photo, RecordKind};

/// Server acknowledgement for a record sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordAck {
    /// Canonical id assigned (or already held) by the server.
    pub server_id: String,
    /// Set when the server holds state diverging from this upload.
    #[serde(default)]
    pub conflict: bool,
    /// The server's copy, present when a conflict needs resolving.
    #[serde(default)]
    pub server_version: Option<Value>,
    /// Server-dictated resolution, overriding the local merge policy.
    #[serde(default)]
    pub resolution: Option<ConflictResolution>,
}

impl RecordAck {
    /// An ack with no conflict attached.
    pub fn clean(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            conflict: false,
            server_version: None,
            resolution: None,
        }
    }
}

/// Server acknowledgement for a photo upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoAck {
    pub server_id: String,
    /// Where the uploaded photo can be fetched from.
    pub url: String,
}

/// Sidecar fields accompanying an encoded photo payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoMeta {
    /// Owning assessment; already re-keyed to a server id by upload time.
    pub assessment_id: String,
    pub project_id: String,
    pub content_type: String,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    pub captured_at: i64,
}

impl PhotoMeta {
    #[must_use]
    pub fn from_photo(photo: &Photo) -> Self {
        Self {
            assessment_id: photo.assessment_id.clone(),
            project_id: photo.project_id.clone(),
            content_type: photo.content_type.clone(),
            width: photo.width,
            height: photo.height,
            caption: photo.caption.clone(),
            location: photo.location,
            captured_at: photo.created_at,
        }
    }
}

/// Remote operations the sync engine drives.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Push one record; the ack may flag server-side divergence.
    async fn sync_record(
        &self,
        kind: RecordKind,
        offline_id: &str,
        payload: &Value,
    ) -> Result<RecordAck>;

    /// Push one photo, its binary payload encoded as portable text.
    async fn sync_photo(
        &self,
        offline_id: &str,
        encoded_payload: &str,
        meta: &PhotoMeta,
    ) -> Result<PhotoAck>;
}
