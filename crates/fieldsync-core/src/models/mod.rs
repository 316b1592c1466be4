//! Data models for Fieldsync

mod assessment;
mod cache;
mod conflict;
mod deficiency;
mod ids;
mod photo;
mod queue;
mod status;

pub use assessment::Assessment;
pub use cache::{CachedAsset, CachedComponent, CachedProject};
pub use conflict::{ConflictRecord, ConflictResolution};
pub use deficiency::{Deficiency, Severity};
pub use ids::{is_offline_id, LocalId, OFFLINE_ID_PREFIX};
pub use photo::{GeoPoint, Photo};
pub use queue::{QueueItem, QueueStatus};
pub use status::{RecordKind, SyncStatus};
