//! The `schedule` verb: view, edit, and round-trip the weekly grid.

use std::path::PathBuf;

use clap::Subcommand;

use playtime_core::{
    validate_import, Limits, ScheduleExport, ScheduleExportEntry, WeekSchedule,
};

use super::{db_path, open_db, require_root_for, CommandError};

const DAY_NAMES: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

#[derive(Subcommand)]
pub enum ScheduleAction {
    /// Show a user's weekly grid
    View { user: String },
    /// Replace a user's grid with a 168-character 0/1 string
    Set { user: String, grid: String },
    /// Allow or deny a block of hours on one day
    Edit {
        user: String,
        /// Day: mon..sun
        #[arg(long)]
        day: String,
        /// First hour of the block (0-23)
        #[arg(long)]
        from: u32,
        /// Hour the block ends before (1-24)
        #[arg(long)]
        to: u32,
        /// Deny instead of allow
        #[arg(long)]
        deny: bool,
    },
    /// Export all schedules as JSON
    Export,
    /// Import schedules from a JSON file (validated before any write)
    Import { file: PathBuf },
}

pub fn run(action: ScheduleAction, db: Option<PathBuf>) -> Result<(), CommandError> {
    match action {
        ScheduleAction::View { user } => {
            let db = open_db(db)?;
            let schedule = db
                .get_schedule(&user)?
                .ok_or_else(|| CommandError::NotFound(format!("unknown user: {user}")))?;
            print_grid(&schedule);
        }
        ScheduleAction::Set { user, grid } => {
            require_root_for(&db_path(db.clone()), "schedule set")?;
            let db = open_db(db)?;
            let schedule = WeekSchedule::parse(&grid)?;
            db.set_schedule(&user, &schedule)?;
            println!("schedule updated for {user}");
        }
        ScheduleAction::Edit {
            user,
            day,
            from,
            to,
            deny,
        } => {
            require_root_for(&db_path(db.clone()), "schedule edit")?;
            let day_index = DAY_NAMES
                .iter()
                .position(|d| *d == day.to_ascii_lowercase())
                .ok_or_else(|| CommandError::Usage(format!("unknown day: {day}")))?;
            if from >= to || to > 24 {
                return Err(CommandError::Usage(format!(
                    "invalid hour range {from}..{to}"
                )));
            }
            let db = open_db(db)?;
            let mut schedule = db
                .get_schedule(&user)?
                .ok_or_else(|| CommandError::NotFound(format!("unknown user: {user}")))?;
            for hour in from..to {
                schedule.set_slot(day_index * 24 + hour as usize, !deny);
            }
            db.set_schedule(&user, &schedule)?;
            println!(
                "{} {}:00-{}:00 on {} for {}",
                if deny { "denied" } else { "allowed" },
                from,
                to,
                DAY_NAMES[day_index],
                user
            );
        }
        ScheduleAction::Export => {
            let db = open_db(db)?;
            let mut export = ScheduleExport::new();
            for user in db.get_users()? {
                let limits = db
                    .get_limits(&user.name)?
                    .unwrap_or_else(|| Limits::new(&user.name));
                export.insert(
                    user.name.clone(),
                    ScheduleExportEntry {
                        schedule: limits
                            .schedule
                            .unwrap_or_else(WeekSchedule::all_allowed)
                            .as_str()
                            .to_string(),
                        gaming_limit: limits.gaming_limit_min,
                        daily_total: limits.daily_total_min.unwrap_or(0),
                    },
                );
            }
            println!("{}", serde_json::to_string_pretty(&export)?);
        }
        ScheduleAction::Import { file } => {
            require_root_for(&db_path(db.clone()), "schedule import")?;
            let content = std::fs::read_to_string(&file)?;
            let export: ScheduleExport = serde_json::from_str(&content)?;

            let db = open_db(db)?;
            let known: Vec<String> = db.get_users()?.into_iter().map(|u| u.name).collect();
            validate_import(&export, &known)?;

            for (name, entry) in &export {
                let mut limits = db
                    .get_limits(name)?
                    .unwrap_or_else(|| Limits::new(name));
                limits.schedule = Some(WeekSchedule::parse(&entry.schedule)?);
                limits.gaming_limit_min = entry.gaming_limit;
                limits.daily_total_min = (entry.daily_total > 0).then_some(entry.daily_total);
                db.set_limits(&limits)?;
            }
            println!("imported schedules for {} user(s)", export.len());
        }
    }
    Ok(())
}

fn print_grid(schedule: &WeekSchedule) {
    println!("      {}", (0..24).map(|h| format!("{h:>2}")).collect::<Vec<_>>().join(" "));
    for (day, name) in DAY_NAMES.iter().enumerate() {
        let row: Vec<&str> = (0..24)
            .map(|hour| {
                if schedule.slot(day * 24 + hour) {
                    " #"
                } else {
                    " ."
                }
            })
            .collect();
        println!("{name:<5}{}", row.join(" "));
    }
    println!();
    println!("{}", schedule.as_str());
}
