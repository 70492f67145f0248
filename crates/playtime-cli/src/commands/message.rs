//! The `message` verb: notification template management.

use std::path::PathBuf;
use std::str::FromStr;

use clap::Subcommand;

use playtime_core::{render_template, Intention, TemplateVars, Urgency};

use super::{db_path, open_db, require_root_for, CommandError};

#[derive(Subcommand)]
pub enum MessageAction {
    /// List templates, optionally for one intention
    List { intention: Option<String> },
    /// Render an intention's variants with sample values
    Test { intention: String },
    /// Add a template variant
    Add {
        intention: String,
        variant: i64,
        title: String,
        body: String,
        #[arg(long, default_value = "dialog-information")]
        icon: String,
        /// low | normal | critical
        #[arg(long, default_value = "normal")]
        urgency: String,
    },
}

pub fn run(action: MessageAction, db: Option<PathBuf>) -> Result<(), CommandError> {
    match action {
        MessageAction::List { intention } => {
            let db = open_db(db)?;
            for t in db.list_templates(intention.as_deref())? {
                println!(
                    "{:<4} {:<22} v{} [{}]{} {} :: {}",
                    t.id,
                    t.intention,
                    t.variant,
                    t.urgency.as_str(),
                    if t.enabled { "" } else { " (disabled)" },
                    t.title,
                    t.body,
                );
            }
        }
        MessageAction::Test { intention } => {
            if Intention::parse(&intention).is_none() {
                return Err(CommandError::Usage(format!(
                    "unknown intention: {intention}"
                )));
            }
            let db = open_db(db)?;
            let variants = db.enabled_templates(&intention)?;
            if variants.is_empty() {
                return Err(CommandError::NotFound(format!(
                    "no enabled templates for {intention}"
                )));
            }
            let vars = TemplateVars {
                user: "anders".into(),
                process: "Minecraft".into(),
                pattern: "java.*minecraft".into(),
                time_left: 15,
                time_used: 105,
                time_limit: 120,
                category: "gaming".into(),
                day: "Saturday".into(),
            }
            .to_map();
            for t in &variants {
                println!("--- variant {} [{}] ---", t.variant, t.urgency.as_str());
                println!("{}", render_template(&t.title, &vars));
                println!("{}", render_template(&t.body, &vars));
            }
        }
        MessageAction::Add {
            intention,
            variant,
            title,
            body,
            icon,
            urgency,
        } => {
            require_root_for(&db_path(db.clone()), "message add")?;
            if Intention::parse(&intention).is_none() {
                return Err(CommandError::Usage(format!(
                    "unknown intention: {intention}"
                )));
            }
            let urgency = Urgency::from_str(&urgency)
                .map_err(|_| CommandError::Usage(format!("unknown urgency: {urgency}")))?;
            let db = open_db(db)?;
            let id = db.insert_template(&intention, variant, &title, &body, &icon, urgency)?;
            println!("added template {id} ({intention} v{variant})");
        }
    }
    Ok(())
}
