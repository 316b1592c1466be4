//! fieldsync-core - Offline persistence and synchronization engine
//!
//! This crate contains the local record store, the durable sync queue, the
//! conflict resolver, the retry scheduler, and the storage governor used by
//! host applications that capture field inspection work without
//! connectivity and reconcile it once a link returns.

pub mod config;
pub mod db;
pub mod error;
pub mod media;
pub mod models;
pub mod net;
pub mod services;
pub mod storage;
pub mod sync;

mod util;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use models::{
    Assessment, ConflictRecord, ConflictResolution, Deficiency, GeoPoint, LocalId, Photo,
    QueueItem, QueueStatus, RecordKind, Severity, SyncStatus,
};
pub use net::{ConnectionQuality, NetworkMonitor};
pub use services::LocalStore;
pub use storage::{QuotaState, StorageGovernor};
pub use sync::{EventBus, HttpRemote, RemoteApi, SyncEngine, SyncEvent, SyncRunReport};
