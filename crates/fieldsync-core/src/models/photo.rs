//! Photo record model

use serde::{Deserialize, Serialize};

use super::{LocalId, SyncStatus};
use crate::util::now_ms;

/// Capture location reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in meters, when the device reports one
    pub accuracy_m: Option<f64>,
}

/// Photographic evidence attached to an assessment.
///
/// Carries its binary payload inline: the compressed rendition always, the
/// original only while it fits the per-photo ceiling. `assessment_id` may
/// hold an offline id or a server id; the sync engine rewrites it to the
/// server id once the parent assessment syncs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    /// Offline identifier (primary key in the local store)
    pub id: LocalId,
    /// Server identifier once assigned
    pub server_id: Option<String>,
    /// Owning assessment: offline id before the parent syncs, server id after
    pub assessment_id: String,
    /// Project this photo belongs to
    pub project_id: String,
    /// Optional caption entered in the field
    pub caption: Option<String>,
    /// MIME type of the compressed payload
    pub content_type: String,
    /// Compressed image bytes (always present)
    #[serde(with = "serde_bytes_base64")]
    pub compressed: Vec<u8>,
    /// Original capture bytes, retained only when within the size ceiling
    #[serde(default, with = "serde_opt_bytes_base64")]
    pub original: Option<Vec<u8>>,
    /// Pixel width of the compressed rendition
    pub width: u32,
    /// Pixel height of the compressed rendition
    pub height: u32,
    /// Capture location, when available
    pub location: Option<GeoPoint>,
    /// Download URL assigned by the server after upload
    pub remote_url: Option<String>,
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

impl Photo {
    /// Create a new pending photo owned by an assessment.
    #[must_use]
    pub fn new(
        assessment_id: impl Into<String>,
        project_id: impl Into<String>,
        compressed: Vec<u8>,
        width: u32,
        height: u32,
    ) -> Self {
        let now = now_ms();
        Self {
            id: LocalId::new(),
            server_id: None,
            assessment_id: assessment_id.into(),
            project_id: project_id.into(),
            caption: None,
            content_type: "image/jpeg".to_string(),
            compressed,
            original: None,
            width,
            height,
            location: None,
            remote_url: None,
            sync_status: SyncStatus::Pending,
            retry_count: 0,
            sync_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Retain the original capture bytes alongside the compressed rendition.
    #[must_use]
    pub fn with_original(mut self, original: Vec<u8>) -> Self {
        self.original = Some(original);
        self
    }

    /// Set the capture location.
    #[must_use]
    pub const fn with_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }

    /// Set the caption.
    #[must_use]
    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    /// Total binary payload size in bytes (compressed + retained original).
    #[must_use]
    pub fn payload_bytes(&self) -> u64 {
        let original = self.original.as_ref().map_or(0, Vec::len);
        (self.compressed.len() + original) as u64
    }
}

/// Base64 (de)serialization for inline photo bytes, so JSON snapshots of a
/// photo stay printable.
mod serde_bytes_base64 {
    use base64::prelude::{Engine as _, BASE64_STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64_STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64_STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

mod serde_opt_bytes_base64 {
    use base64::prelude::{Engine as _, BASE64_STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&BASE64_STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?;
        encoded
            .map(|value| BASE64_STANDARD.decode(value.as_bytes()))
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_photo_is_pending_jpeg() {
        let photo = Photo::new("offline-abc", "proj-1", vec![1, 2, 3], 640, 480);
        assert_eq!(photo.sync_status, SyncStatus::Pending);
        assert_eq!(photo.content_type, "image/jpeg");
        assert_eq!(photo.payload_bytes(), 3);
    }

    #[test]
    fn payload_bytes_counts_retained_original() {
        let photo =
            Photo::new("offline-abc", "proj-1", vec![0; 10], 640, 480).with_original(vec![0; 90]);
        assert_eq!(photo.payload_bytes(), 100);
    }

    #[test]
    fn photo_json_roundtrips_binary_payload() {
        let photo = Photo::new("offline-abc", "proj-1", vec![7, 8, 9], 10, 10)
            .with_location(GeoPoint {
                latitude: 43.65,
                longitude: -79.38,
                accuracy_m: Some(4.5),
            });
        let json = serde_json::to_string(&photo).unwrap();
        let back: Photo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, photo);
    }
}
