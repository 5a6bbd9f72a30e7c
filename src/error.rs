//! Error types for the sync core

use thiserror::Error;

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The tick could not be obtained; the surrounding write was rolled back.
    #[error("version assignment failed: {0}")]
    VersioningFailure(#[source] rusqlite::Error),

    /// Client cursor is ahead of the server. The client must resync from 0.
    #[error("cursor {since} is ahead of current version {current}")]
    InvalidCursor { since: u64, current: u64 },

    /// Client cursor points into history removed by retention.
    #[error("cursor {since} predates retained history (pruned through {pruned_through})")]
    CursorExpired {
        since: u64,
        pruned_through: u64,
        current: u64,
    },

    #[error("conversation {0} not found")]
    NotFound(i64),

    #[error("invalid conversation: {0}")]
    Invalid(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("snapshot encoding failed: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SyncError {
    /// Whether the client should drop its cursor and start over from 0.
    pub fn requires_resync(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidCursor { .. } | SyncError::CursorExpired { .. }
        )
    }
}
