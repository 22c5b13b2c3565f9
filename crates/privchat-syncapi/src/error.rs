use std::fmt;
use rusqlite;

#[derive(Debug)]
pub enum PrivchatSyncError {
    SqliteError(rusqlite::Error),
    JsonError(String),
    Storage(String),
    IO(String),
    InvalidArgument(String),
    Other(String),
}

impl fmt::Display for PrivchatSyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrivchatSyncError::SqliteError(e) => write!(f, "SQLite error: {}", e),
            PrivchatSyncError::JsonError(e) => write!(f, "JSON error: {}", e),
            PrivchatSyncError::Storage(e) => write!(f, "Storage error: {}", e),
            PrivchatSyncError::IO(e) => write!(f, "IO error: {}", e),
            PrivchatSyncError::InvalidArgument(e) => write!(f, "Invalid argument: {}", e),
            PrivchatSyncError::Other(e) => write!(f, "Other error: {}", e),
        }
    }
}

impl std::error::Error for PrivchatSyncError {}

impl From<rusqlite::Error> for PrivchatSyncError {
    fn from(error: rusqlite::Error) -> Self {
        PrivchatSyncError::SqliteError(error)
    }
}

impl From<serde_json::Error> for PrivchatSyncError {
    fn from(error: serde_json::Error) -> Self {
        PrivchatSyncError::JsonError(error.to_string())
    }
}

impl From<std::io::Error> for PrivchatSyncError {
    fn from(error: std::io::Error) -> Self {
        PrivchatSyncError::IO(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PrivchatSyncError>;
