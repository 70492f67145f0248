//! The `maintenance` verb: retention purge and compaction.

use std::path::PathBuf;

use playtime_core::RetentionPolicy;

use super::{db_path, open_db, require_root_for, CommandError};

pub fn run(db: Option<PathBuf>) -> Result<(), CommandError> {
    require_root_for(&db_path(db.clone()), "maintenance")?;
    let db = open_db(db)?;
    let report = db.maintenance(&RetentionPolicy::default())?;
    println!("deleted:");
    println!("  events:      {}", report.events_deleted);
    println!("  sessions:    {}", report.sessions_deleted);
    println!("  message log: {}", report.messages_deleted);
    Ok(())
}
