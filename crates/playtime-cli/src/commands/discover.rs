//! The `discover` verb: review queue for unknown activities.

use std::path::PathBuf;
use std::str::FromStr;

use clap::Subcommand;

use playtime_core::{Category, MonitorState};

use super::{db_path, format_minutes, open_db, require_root_for, CommandError};

#[derive(Subcommand)]
pub enum DiscoverAction {
    /// List candidates still sampling and discovered patterns awaiting
    /// review
    List,
    /// Promote a discovered pattern to active monitoring
    Promote {
        id: i64,
        /// gaming | educational | social | launcher | ignored
        category: String,
        /// Friendlier display name
        #[arg(long)]
        name: Option<String>,
    },
    /// Ignore a discovered pattern
    Ignore { id: i64 },
}

pub fn run(action: DiscoverAction, db: Option<PathBuf>) -> Result<(), CommandError> {
    match action {
        DiscoverAction::List => {
            let db = open_db(db)?;

            let candidates = db.list_candidates()?;
            if !candidates.is_empty() {
                println!("Sampling (not yet promoted):");
                for c in &candidates {
                    println!(
                        "  {:<10} {:<15} {:<25} {} sample(s), {}",
                        c.owner,
                        c.pattern_type.as_str(),
                        c.key,
                        c.samples,
                        format_minutes(c.accumulated_runtime_sec),
                    );
                }
                println!();
            }

            let discovered: Vec<_> = db
                .list_patterns(None)?
                .into_iter()
                .filter(|p| p.monitor_state == MonitorState::Discovered)
                .collect();
            if discovered.is_empty() && candidates.is_empty() {
                println!("Nothing awaiting review.");
                return Ok(());
            }
            if !discovered.is_empty() {
                println!("Awaiting review:");
                println!(
                    "  {:<5} {:<10} {:<25} {:<6} {:<9}",
                    "ID", "OWNER", "NAME", "SEEN", "RUNTIME"
                );
                for p in &discovered {
                    println!(
                        "  {:<5} {:<10} {:<25} {:<6} {:<9}",
                        p.id,
                        p.owner.as_deref().unwrap_or("*"),
                        p.display_name,
                        p.times_seen,
                        format_minutes(p.total_runtime_sec),
                    );
                }
                println!();
                println!("  promote <id> <category>   start monitoring");
                println!("  ignore <id>               stop asking about it");
            }
        }
        DiscoverAction::Promote { id, category, name } => {
            require_root_for(&db_path(db.clone()), "discover promote")?;
            let db = open_db(db)?;
            let pattern = db
                .get_pattern(id)?
                .ok_or_else(|| CommandError::NotFound(format!("no pattern {id}")))?;
            if pattern.monitor_state != MonitorState::Discovered {
                return Err(CommandError::Usage(format!(
                    "pattern {id} is {}, not discovered",
                    pattern.monitor_state.as_str()
                )));
            }
            let category = Category::from_str(&category)?;
            db.set_pattern_state(id, MonitorState::Active, Some(category), name.as_deref())?;
            println!("promoted pattern {id} to active ({})", category.as_str());
        }
        DiscoverAction::Ignore { id } => {
            require_root_for(&db_path(db.clone()), "discover ignore")?;
            let db = open_db(db)?;
            db.set_pattern_state(id, MonitorState::Ignored, None, None)?;
            println!("ignored pattern {id}");
        }
    }
    Ok(())
}
