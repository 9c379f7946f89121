//! Sync error types.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while syncing.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The pause signal was asserted. Expected control flow, not a fault.
    #[error("sync paused")]
    Paused,

    #[error("authentication required")]
    AuthRequired,

    #[error("server rejected request to {endpoint}: HTTP {status}")]
    Rejected { endpoint: String, status: u16 },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid upload state: {0}")]
    InvalidState(String),

    #[error("a sync cycle is already running")]
    CycleInProgress,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] handsync_storage::StorageError),

    #[error("crypto error: {0}")]
    Crypto(#[from] handsync_crypto::CryptoError),
}

impl SyncError {
    /// True for the pause interruption, which must never be retried with backoff.
    pub fn is_paused(&self) -> bool {
        matches!(self, SyncError::Paused)
    }

    /// True for failures worth retrying on a later cycle unchanged.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Http(_) | SyncError::Io(_) => true,
            SyncError::Rejected { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
