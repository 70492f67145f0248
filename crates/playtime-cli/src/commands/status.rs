//! The `status` verb: today's usage per user.

use std::path::PathBuf;

use chrono::Utc;

use playtime_core::{logical_date, KernelState, Limits};

use super::{format_minutes, open_db, CommandError};

pub fn run(user: Option<String>, db: Option<PathBuf>) -> Result<(), CommandError> {
    let db = open_db(db)?;
    let users = match user {
        Some(name) => {
            let record = db
                .get_user(&name)?
                .ok_or_else(|| CommandError::NotFound(format!("unknown user: {name}")))?;
            vec![record]
        }
        None => db.get_users()?,
    };
    if users.is_empty() {
        println!("No monitored users configured.");
        println!("Add one with: playtime user add <name>");
        return Ok(());
    }

    let today = logical_date(Utc::now(), 4);
    println!(
        "{:<14} {:<10} {:<18} {:<12} {:<10}",
        "USER", "STATE", "GAMING", "TOTAL", "ENABLED"
    );
    for user in &users {
        let limits = db
            .get_limits(&user.name)?
            .unwrap_or_else(|| Limits::new(&user.name));
        let summary = db.load_daily_summary(&user.name, today)?;
        let (state, gaming_sec, total_sec) = summary
            .map(|s| (s.state, s.gaming_time_sec, s.total_time_sec))
            .unwrap_or((KernelState::Available, 0, 0));
        let limit_sec = limits.gaming_limit_min * 60;
        println!(
            "{:<14} {:<10} {:<18} {:<12} {:<10}",
            user.name,
            state.as_str(),
            format!(
                "{} / {}",
                format_minutes(gaming_sec),
                format_minutes(limit_sec)
            ),
            format_minutes(total_sec),
            if user.enabled { "yes" } else { "no" },
        );
    }
    Ok(())
}
