//! Admin command implementations, one module per verb.

pub mod audit;
pub mod discover;
pub mod maintenance;
pub mod message;
pub mod patterns;
pub mod run;
pub mod schedule;
pub mod status;
pub mod user;

use std::fmt;
use std::path::{Path, PathBuf};

use playtime_core::{
    ConfigError, CoreError, Database, DatabaseError, PatternError, ScheduleError,
    DEFAULT_DB_PATH,
};

/// Command failure carrying its exit code: 1 usage, 2 not found,
/// 3 permission, 4 internal.
#[derive(Debug)]
pub enum CommandError {
    Usage(String),
    NotFound(String),
    Permission(String),
    Internal(String),
}

impl CommandError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CommandError::Usage(_) => 1,
            CommandError::NotFound(_) => 2,
            CommandError::Permission(_) => 3,
            CommandError::Internal(_) => 4,
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Usage(msg)
            | CommandError::NotFound(msg)
            | CommandError::Permission(msg)
            | CommandError::Internal(msg) => f.write_str(msg),
        }
    }
}

impl From<CoreError> for CommandError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Database(e) => e.into(),
            CoreError::Config(e) => e.into(),
            CoreError::Pattern(e) => e.into(),
            CoreError::Schedule(e) => e.into(),
            other => CommandError::Internal(other.to_string()),
        }
    }
}

impl From<DatabaseError> for CommandError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(msg) => CommandError::NotFound(msg),
            DatabaseError::OpenFailed { .. } => CommandError::Permission(format!(
                "{err} (the system database needs root; try sudo, or pass --db)"
            )),
            other => CommandError::Internal(other.to_string()),
        }
    }
}

impl From<ConfigError> for CommandError {
    fn from(err: ConfigError) -> Self {
        CommandError::Usage(err.to_string())
    }
}

impl From<PatternError> for CommandError {
    fn from(err: PatternError) -> Self {
        CommandError::Usage(err.to_string())
    }
}

impl From<ScheduleError> for CommandError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::UnknownUser(user) => {
                CommandError::NotFound(format!("unknown user: {user}"))
            }
            other => CommandError::Usage(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CommandError {
    fn from(err: std::io::Error) -> Self {
        CommandError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for CommandError {
    fn from(err: serde_json::Error) -> Self {
        CommandError::Usage(format!("invalid JSON: {err}"))
    }
}

/// Effective database path after the `--db` override.
pub fn db_path(db: Option<PathBuf>) -> PathBuf {
    db.unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH))
}

/// Open the store, mapping open failures to a permission error.
pub fn open_db(db: Option<PathBuf>) -> Result<Database, CommandError> {
    Ok(Database::open(&db_path(db))?)
}

/// Refuse to touch the system database as a non-root caller. A custom
/// `--db` path is governed by ordinary file permissions instead.
pub fn require_root_for(path: &Path, verb: &str) -> Result<(), CommandError> {
    if path == Path::new(DEFAULT_DB_PATH) && unsafe { libc::geteuid() } != 0 {
        return Err(CommandError::Permission(format!(
            "'{verb}' on the system database requires root; try: sudo playtime {verb}"
        )));
    }
    Ok(())
}

/// Seconds → "1h 23m" style text.
pub fn format_minutes(total_sec: i64) -> String {
    let minutes = total_sec / 60;
    if minutes < 60 {
        return format!("{minutes}m");
    }
    let hours = minutes / 60;
    let rem = minutes % 60;
    if rem == 0 {
        format!("{hours}h")
    } else {
        format!("{hours}h {rem}m")
    }
}
