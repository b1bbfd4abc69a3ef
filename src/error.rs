//! haproxy-keeper Error Types

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Result type alias for haproxy-keeper operations
pub type Result<T> = std::result::Result<T, Error>;

/// haproxy-keeper error types
#[derive(Error, Debug)]
pub enum Error {
    // Keeper configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Topology errors
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    #[error("Invalid topology document: {0}")]
    TopologyDocument(#[from] serde_json::Error),

    // HAProxy config file errors
    #[error("HAProxy config not found at {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("Permission denied to read HAProxy config at {}", .0.display())]
    ConfigPermissionDenied(PathBuf),

    #[error("Parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    // Backup errors
    #[error("Backup error: {0}")]
    Backup(String),

    #[error("Backup not found: {0}")]
    BackupNotFound(i64),

    #[error("Backup {id} failed integrity check: expected {expected}, found {actual}")]
    BackupCorrupted {
        id: i64,
        expected: String,
        actual: String,
    },

    #[error("Backup registry error: {0}")]
    Registry(String),

    // Apply errors
    #[error("Failed to write HAProxy config: {0}")]
    Write(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to restart HAProxy: {0}")]
    RestartFailed(String),

    #[error("Failed to reload HAProxy: {0}")]
    ReloadFailed(String),

    #[error("Rollback failed: {0}")]
    RollbackFailed(String),

    #[error("Another apply or restore is already in progress")]
    Busy,

    // Admin socket errors
    #[error("HAProxy socket not found at {}", .0.display())]
    SocketNotFound(PathBuf),

    #[error("Permission denied to access HAProxy socket at {}", .0.display())]
    SocketPermissionDenied(PathBuf),

    #[error("HAProxy socket did not answer within {0:?}")]
    SocketTimeout(Duration),

    #[error("Admin protocol error: {0}")]
    Protocol(String),

    // Generic errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Machine-readable error category handed to callers alongside the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    InvalidTopology,
    ConfigNotFound,
    PermissionDenied,
    Parse,
    Backup,
    BackupNotFound,
    BackupCorrupted,
    Write,
    ValidationFailed,
    RestartFailed,
    ReloadFailed,
    RollbackFailed,
    Busy,
    SocketNotFound,
    SocketPermissionDenied,
    SocketTimeout,
    Protocol,
    InvalidArgument,
    Io,
}

impl Error {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::ConfigParse(_) => ErrorKind::Config,
            Error::InvalidTopology(_) | Error::TopologyDocument(_) => ErrorKind::InvalidTopology,
            Error::ConfigNotFound(_) => ErrorKind::ConfigNotFound,
            Error::ConfigPermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::Parse { .. } => ErrorKind::Parse,
            Error::Backup(_) | Error::Registry(_) => ErrorKind::Backup,
            Error::BackupNotFound(_) => ErrorKind::BackupNotFound,
            Error::BackupCorrupted { .. } => ErrorKind::BackupCorrupted,
            Error::Write(_) => ErrorKind::Write,
            Error::ValidationFailed(_) => ErrorKind::ValidationFailed,
            Error::RestartFailed(_) => ErrorKind::RestartFailed,
            Error::ReloadFailed(_) => ErrorKind::ReloadFailed,
            Error::RollbackFailed(_) => ErrorKind::RollbackFailed,
            Error::Busy => ErrorKind::Busy,
            Error::SocketNotFound(_) => ErrorKind::SocketNotFound,
            Error::SocketPermissionDenied(_) => ErrorKind::SocketPermissionDenied,
            Error::SocketTimeout(_) => ErrorKind::SocketTimeout,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Check if this error came from the admin socket
    pub fn is_socket_error(&self) -> bool {
        matches!(
            self,
            Error::SocketNotFound(_)
                | Error::SocketPermissionDenied(_)
                | Error::SocketTimeout(_)
                | Error::Protocol(_)
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Registry(format!("SQLite error: {}", e))
    }
}
