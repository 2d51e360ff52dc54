//! Infrastructure error types.

use std::io;
use std::path::PathBuf;

use queuectl_core::DomainError;

/// Failure of the durable store or its lock.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt record {}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to lock {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("timed out waiting for lock {}", .path.display())]
    LockTimeout { path: PathBuf },
}

impl StoreError {
    /// Whether repeating the operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Write { .. } | StoreError::Lock { .. } | StoreError::LockTimeout { .. }
        )
    }
}

/// Error surfaced by queue operations to their caller.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("worker count must be at least 1")]
    NoWorkers,
    #[error("a worker pool is already running on this data directory (pid {})", .pid.map_or_else(|| "unknown".to_string(), |p| p.to_string()))]
    AlreadyRunning { pid: Option<u32> },
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

pub type QueueResult<T> = Result<T, QueueError>;
