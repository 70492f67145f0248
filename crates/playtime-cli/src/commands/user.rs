//! The `user` verb: monitored users and their limits.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use playtime_core::{passwd, Limits};

use super::{db_path, open_db, require_root_for, CommandError};

#[derive(Args)]
pub struct LimitArgs {
    /// Daily gaming limit in minutes
    #[arg(long)]
    gaming_limit: Option<i64>,
    /// Daily ceiling across all tracked categories, in minutes
    #[arg(long)]
    daily_total: Option<i64>,
    /// Seconds of grace after the budget runs out
    #[arg(long)]
    grace_period: Option<i64>,
}

#[derive(Subcommand)]
pub enum UserAction {
    /// Add (or update) a monitored user
    Add {
        name: String,
        /// Numeric system id; looked up in the passwd database when
        /// omitted
        #[arg(long)]
        uid: Option<u32>,
        #[command(flatten)]
        limits: LimitArgs,
    },
    /// Edit a user's limits or enabled flag
    Edit {
        name: String,
        #[arg(long)]
        enabled: Option<bool>,
        #[command(flatten)]
        limits: LimitArgs,
    },
    /// List monitored users
    List,
}

pub fn run(action: UserAction, db: Option<PathBuf>) -> Result<(), CommandError> {
    match action {
        UserAction::Add { name, uid, limits } => {
            require_root_for(&db_path(db.clone()), "user add")?;
            let uid = match uid.or_else(|| passwd::by_name(&name).map(|a| a.uid)) {
                Some(uid) => uid,
                None => {
                    return Err(CommandError::Usage(format!(
                        "no system account '{name}'; pass --uid explicitly"
                    )))
                }
            };
            let db = open_db(db)?;
            db.upsert_user(&name, uid, true)?;
            apply_limits(&db, &name, &limits)?;
            println!("monitoring {name} (uid {uid})");
        }
        UserAction::Edit {
            name,
            enabled,
            limits,
        } => {
            require_root_for(&db_path(db.clone()), "user edit")?;
            let db = open_db(db)?;
            let user = db
                .get_user(&name)?
                .ok_or_else(|| CommandError::NotFound(format!("unknown user: {name}")))?;
            if let Some(enabled) = enabled {
                db.upsert_user(&name, user.uid, enabled)?;
            }
            apply_limits(&db, &name, &limits)?;
            println!("updated {name}");
        }
        UserAction::List => {
            let db = open_db(db)?;
            for user in db.get_users()? {
                let limits = db
                    .get_limits(&user.name)?
                    .unwrap_or_else(|| Limits::new(&user.name));
                println!(
                    "{} (uid {}): gaming {} min/day, total {}, {}",
                    user.name,
                    user.uid,
                    limits.gaming_limit_min,
                    limits
                        .daily_total_min
                        .map(|m| format!("{m} min/day"))
                        .unwrap_or_else(|| "unlimited".into()),
                    if user.enabled { "enabled" } else { "disabled" },
                );
            }
        }
    }
    Ok(())
}

fn apply_limits(
    db: &playtime_core::Database,
    name: &str,
    args: &LimitArgs,
) -> Result<(), CommandError> {
    if args.gaming_limit.is_none() && args.daily_total.is_none() && args.grace_period.is_none() {
        return Ok(());
    }
    let mut limits = db.get_limits(name)?.unwrap_or_else(|| Limits::new(name));
    if let Some(minutes) = args.gaming_limit {
        if minutes < 0 {
            return Err(CommandError::Usage("gaming limit must be >= 0".into()));
        }
        limits.gaming_limit_min = minutes;
    }
    if let Some(minutes) = args.daily_total {
        limits.daily_total_min = (minutes > 0).then_some(minutes);
    }
    if let Some(seconds) = args.grace_period {
        limits.grace_period_sec = (seconds >= 0).then_some(seconds);
    }
    db.set_limits(&limits)?;
    Ok(())
}
