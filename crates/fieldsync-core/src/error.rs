//! Error types for fieldsync-core

use thiserror::Error;

/// Result type alias using fieldsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fieldsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Network problem that is expected to clear on its own; drives retry backoff
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// Bad input or server-rejected payload; retrying will not help
    #[error("Validation error: {0}")]
    Validation(String),

    /// Local storage usage has reached the configured ceiling
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Divergent local/server state that could not be resolved automatically
    #[error("Unresolved sync conflict: {0}")]
    Conflict(String),

    /// A stored row could not be decoded into its record type
    #[error("Corrupt local data: {0}")]
    CorruptLocalData(String),

    /// Record or key not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A sync run is already in progress
    #[error("A sync run is already in progress")]
    SyncInProgress,

    /// Connection quality is classified as offline
    #[error("Network is offline")]
    Offline,

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether a failed sync attempt with this error should be rescheduled.
    ///
    /// Validation and corrupt-data failures are terminal for the item; network
    /// and storage hiccups are worth another attempt after backoff.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork(_) | Self::Io(_) | Self::Database(_) | Self::LibSql(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(Error::TransientNetwork("socket closed".to_string()).is_retryable());
        assert!(Error::Database("locked".to_string()).is_retryable());
    }

    #[test]
    fn validation_and_corrupt_data_are_terminal() {
        assert!(!Error::Validation("missing project id".to_string()).is_retryable());
        assert!(!Error::CorruptLocalData("bad sync_status".to_string()).is_retryable());
        assert!(!Error::NotFound("assessment".to_string()).is_retryable());
    }
}
