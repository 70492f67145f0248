//! The `patterns` verb: the classification rule base.

use std::path::PathBuf;
use std::str::FromStr;

use clap::Subcommand;

use playtime_core::{Category, MonitorState, NewPattern, PatternType};

use super::{db_path, format_minutes, open_db, require_root_for, CommandError};

#[derive(Subcommand)]
pub enum PatternsAction {
    /// List all patterns
    List,
    /// Add a pattern
    Add {
        /// Regex matched against process names/command lines or domains
        regex: String,
        /// Display name used in notifications
        name: String,
        /// gaming | educational | social | launcher | ignored
        category: String,
        /// process | browser_domain
        #[arg(long, default_value = "process")]
        pattern_type: String,
        /// Restrict to one user (global when omitted)
        #[arg(long)]
        owner: Option<String>,
        /// Minimum smoothed CPU% before the pattern counts as active
        #[arg(long)]
        cpu_threshold: Option<f32>,
        /// Evaluation priority; lower wins
        #[arg(long, default_value_t = 100)]
        priority: i64,
    },
    /// Modify a pattern's name, category, or state
    Modify {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// active | discovered | ignored
        #[arg(long)]
        state: Option<String>,
    },
    /// Show one pattern in full
    Show { id: i64 },
}

pub fn run(action: PatternsAction, db: Option<PathBuf>) -> Result<(), CommandError> {
    match action {
        PatternsAction::List => {
            let db = open_db(db)?;
            println!(
                "{:<5} {:<11} {:<15} {:<8} {:<20} {:<6} {:<9}",
                "ID", "STATE", "TYPE", "OWNER", "NAME", "SEEN", "RUNTIME"
            );
            for p in db.list_patterns(None)? {
                println!(
                    "{:<5} {:<11} {:<15} {:<8} {:<20} {:<6} {:<9}",
                    p.id,
                    p.monitor_state.as_str(),
                    p.pattern_type.as_str(),
                    p.owner.as_deref().unwrap_or("*"),
                    p.display_name,
                    p.times_seen,
                    format_minutes(p.total_runtime_sec),
                );
            }
        }
        PatternsAction::Add {
            regex,
            name,
            category,
            pattern_type,
            owner,
            cpu_threshold,
            priority,
        } => {
            require_root_for(&db_path(db.clone()), "patterns add")?;
            let db = open_db(db)?;
            let id = db.insert_pattern(&NewPattern {
                owner,
                pattern_type: PatternType::from_str(&pattern_type)
                    .map_err(|_| CommandError::Usage(format!("unknown type: {pattern_type}")))?,
                regex,
                display_name: name.clone(),
                category: Category::from_str(&category)?,
                monitor_state: MonitorState::Active,
                priority,
                browser: None,
                cpu_threshold,
                discovered_cmdline: None,
            })?;
            println!("added pattern {id}: {name}");
        }
        PatternsAction::Modify {
            id,
            name,
            category,
            state,
        } => {
            require_root_for(&db_path(db.clone()), "patterns modify")?;
            let db = open_db(db)?;
            let pattern = db
                .get_pattern(id)?
                .ok_or_else(|| CommandError::NotFound(format!("no pattern {id}")))?;
            let state = match state {
                Some(s) => MonitorState::from_str(&s)?,
                None => pattern.monitor_state,
            };
            let category = category.map(|c| Category::from_str(&c)).transpose()?;
            db.set_pattern_state(id, state, category, name.as_deref())?;
            println!("updated pattern {id}");
        }
        PatternsAction::Show { id } => {
            let db = open_db(db)?;
            let p = db
                .get_pattern(id)?
                .ok_or_else(|| CommandError::NotFound(format!("no pattern {id}")))?;
            println!("id:            {}", p.id);
            println!("regex:         {}", p.regex);
            println!("name:          {}", p.display_name);
            println!("type:          {}", p.pattern_type.as_str());
            println!("category:      {}", p.category.as_str());
            println!("state:         {}", p.monitor_state.as_str());
            println!("owner:         {}", p.owner.as_deref().unwrap_or("*"));
            println!("priority:      {}", p.priority);
            if let Some(cpu) = p.cpu_threshold {
                println!("cpu threshold: {cpu}%");
            }
            if let Some(cmdline) = &p.discovered_cmdline {
                println!("discovered as: {cmdline}");
            }
            println!("times seen:    {}", p.times_seen);
            println!("total runtime: {}", format_minutes(p.total_runtime_sec));
        }
    }
    Ok(())
}
