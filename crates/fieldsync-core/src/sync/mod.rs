//! Synchronization: orchestration, retry policy, conflict merging, and the
//! remote contract with its HTTP implementation.

mod backoff;
mod engine;
mod events;
mod http;
mod merge;
mod remote;

pub use backoff::RetryPolicy;
pub use engine::{RunStatus, SyncEngine, SyncRunReport};
pub use events::{EventBus, SyncEvent};
pub use http::HttpRemote;
pub use merge::{merge_records, MergeOutcome};
pub use remote::{PhotoAck, PhotoMeta, RecordAck, RemoteApi};
