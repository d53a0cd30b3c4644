use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key-value io failure for `{key}`: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to prepare shared area at {}: {source}", .path.display())]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode `{key}`: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("filesystem watcher failed: {0}")]
    Watch(#[from] notify::Error),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("habit title must not be empty")]
    EmptyTitle,
    #[error("reminder time {hour:02}:{minute:02} is out of range")]
    InvalidTime { hour: u32, minute: u32 },
    #[error("`{0}` is not a reminder time, expected HH:MM")]
    MalformedTime(String),
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification permission denied")]
    PermissionDenied,
    #[error("failed to persist reminder `{identifier}`: {source}")]
    Schedule {
        identifier: String,
        #[source]
        source: StoreError,
    },
}
