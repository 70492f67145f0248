use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::CommandError;

#[derive(Parser)]
#[command(name = "playtime", version, about = "Screen-time enforcement daemon")]
struct Cli {
    /// Database path (defaults to the system database).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Run {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Show screen-time status
    Status {
        /// User to show (default: all monitored users)
        user: Option<String>,
    },
    /// Weekly schedule management
    Schedule {
        #[command(subcommand)]
        action: commands::schedule::ScheduleAction,
    },
    /// Show the enforcement audit log
    Audit {
        /// Restrict to one user
        #[arg(long)]
        user: Option<String>,
        /// Maximum entries to show
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Manage monitored users
    User {
        #[command(subcommand)]
        action: commands::user::UserAction,
    },
    /// Manage classification patterns
    Patterns {
        #[command(subcommand)]
        action: commands::patterns::PatternsAction,
    },
    /// Review discovered activities
    Discover {
        #[command(subcommand)]
        action: commands::discover::DiscoverAction,
    },
    /// Manage notification message templates
    Message {
        #[command(subcommand)]
        action: commands::message::MessageAction,
    },
    /// Purge old rows and compact the database
    Maintenance,
}

fn dispatch(cli: Cli) -> Result<(), CommandError> {
    let db_path = cli.db;
    match cli.command {
        Commands::Run { config } => commands::run::run(config, db_path),
        Commands::Status { user } => commands::status::run(user, db_path),
        Commands::Schedule { action } => commands::schedule::run(action, db_path),
        Commands::Audit { user, limit } => commands::audit::run(user, limit, db_path),
        Commands::User { action } => commands::user::run(action, db_path),
        Commands::Patterns { action } => commands::patterns::run(action, db_path),
        Commands::Discover { action } => commands::discover::run(action, db_path),
        Commands::Message { action } => commands::message::run(action, db_path),
        Commands::Maintenance => commands::maintenance::run(db_path),
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version are not usage errors.
            if e.use_stderr() {
                eprint!("{e}");
                std::process::exit(1);
            }
            print!("{e}");
            std::process::exit(0);
        }
    };

    if let Err(e) = dispatch(cli) {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}
