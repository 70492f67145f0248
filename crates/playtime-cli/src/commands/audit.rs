//! The `audit` verb: the enforcement trail.

use std::path::PathBuf;

use super::{open_db, CommandError};

pub fn run(
    user: Option<String>,
    limit: usize,
    db: Option<PathBuf>,
) -> Result<(), CommandError> {
    let db = open_db(db)?;
    let entries = db.list_audit(user.as_deref(), limit)?;
    if entries.is_empty() {
        println!("No enforcement actions recorded.");
        return Ok(());
    }
    println!(
        "{:<21} {:<10} {:<8} {:<20} {:<15} {:<9} {}",
        "WHEN", "USER", "PID", "PROCESS", "REASON", "SIGNAL", "EXITED"
    );
    for e in entries {
        println!(
            "{:<21} {:<10} {:<8} {:<20} {:<15} {:<9} {}",
            e.timestamp.format("%Y-%m-%d %H:%M:%S"),
            e.user,
            e.pid,
            e.process_name,
            e.reason,
            e.signal_sent,
            if e.exit_observed { "yes" } else { "no" },
        );
    }
    Ok(())
}
