//! The `run` verb: the daemon itself.

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

use playtime_core::{Daemon, DaemonConfig, DEFAULT_CONFIG_PATH};

use super::{require_root_for, CommandError};

pub fn run(config: Option<PathBuf>, db: Option<PathBuf>) -> Result<(), CommandError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut config = DaemonConfig::load(&config_path)?;
    if let Some(db) = db {
        config.daemon.db_path = db;
    }
    require_root_for(&config.daemon.db_path, "run")?;

    tracing::info!(config = %config_path.display(), db = %config.daemon.db_path.display(), "starting");
    let mut daemon = Daemon::new(config)?;
    daemon.run()?;
    Ok(())
}
