//! Core error types for playtime-core.
//!
//! One top-level [`CoreError`] with nested kinds per subsystem, built
//! on thiserror. Worker errors degrade to empty scan results at the
//! call site; only a failed database open is fatal to the daemon.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for playtime-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Pattern compilation or lookup errors
    #[error("Pattern error: {0}")]
    Pattern(#[from] PatternError),

    /// Detection worker errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// Notification delivery errors
    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    /// Schedule grid errors
    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open the database file. The only fatal store error.
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Row lookup returned nothing where a row was required
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness or state conflict
    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Pattern-specific errors.
#[derive(Error, Debug)]
pub enum PatternError {
    /// Regex failed to compile; the pattern is rejected on insert.
    #[error("Invalid pattern regex '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },

    /// Unknown category name in input
    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    /// Unknown monitor state name in input
    #[error("Unknown monitor state: {0}")]
    UnknownState(String),

    /// Unknown pattern type name in input
    #[error("Unknown pattern type: {0}")]
    UnknownPatternType(String),
}

/// Detection worker errors. Scans that fail degrade to empty results.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Worker exceeded its per-tick deadline
    #[error("Worker '{worker}' timed out after {seconds}s")]
    Timeout { worker: String, seconds: u64 },

    /// Worker prerequisites missing (no session bus, no history file)
    #[error("Worker '{worker}' unavailable: {message}")]
    Unavailable { worker: String, message: String },

    /// Scan-internal failure
    #[error("Worker '{worker}' scan failed: {message}")]
    ScanFailed { worker: String, message: String },
}

/// Notification-specific errors.
#[derive(Error, Debug)]
pub enum NotifyError {
    /// No backend accepted the notification
    #[error("No notification backend available for user {user}")]
    NoBackend { user: String },

    /// Backend send failed
    #[error("Backend '{backend}' send failed: {message}")]
    SendFailed { backend: String, message: String },
}

/// Schedule grid errors.
#[derive(Error, Debug)]
pub enum ScheduleError {
    /// Wrong length (must be 168)
    #[error("Schedule must be 168 characters, got {0}")]
    BadLength(usize),

    /// Character outside {0,1}
    #[error("Schedule may only contain '0' and '1', found '{0}'")]
    BadCharacter(char),

    /// Import references a user that does not exist
    #[error("Unknown user in schedule import: {0}")]
    UnknownUser(String),
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::QueryReturnedNoRows => {
                DatabaseError::NotFound("query returned no rows".into())
            }
            rusqlite::Error::SqliteFailure(e, _) => {
                if e.code == rusqlite::ErrorCode::ConstraintViolation {
                    DatabaseError::Conflict(err.to_string())
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
