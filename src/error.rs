use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("I/O unavailable for {path:?}: {source}")]
    IoUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),
    #[error("Failed to write {path:?}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Encoding error: {0}")]
    Encode(#[from] postcard::Error),
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SyncError {
    pub fn io_unavailable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::IoUnavailable {
            path: path.into(),
            source,
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        SyncError::MalformedPacket(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
