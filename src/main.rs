// src/main.rs

use clap::{Parser, Subcommand};
use log::{debug, error, info};
use practice_scheduler::{
    AttemptInput, Catalog, SchedulerConfig, SchedulerError, Scheduler, SessionType, SqliteStore,
    StaticSettings,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "practice-scheduler", version, about = "Spaced-repetition practice scheduler")]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, default_value = "practice_scheduler.db")]
    db: PathBuf,

    /// Scheduler tunables (TOML)
    #[arg(long, global = true, default_value = "scheduler.toml")]
    config: PathBuf,

    /// User settings (TOML): focus areas, limit mode, session length
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Problem bank (JSON) replacing the built-in one
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resume or start a guided session
    Next {
        /// Build the session from due reviews
        #[arg(long)]
        review: bool,
    },
    /// Record an attempt on a problem
    Attempt {
        #[arg(long, conflicts_with = "slug", required_unless_present = "slug")]
        id: Option<i64>,
        #[arg(long)]
        slug: Option<String>,
        /// The attempt was not solved
        #[arg(long)]
        failed: bool,
        #[arg(long, default_value_t = 0.0)]
        minutes: f64,
        /// Self-rated difficulty, 1-5
        #[arg(long)]
        perceived: Option<u8>,
    },
    /// Show the current focus decision
    Focus {
        #[arg(long, default_value = "local")]
        user: String,
    },
    /// Fetch extra problems beyond the planned session
    More {
        #[arg(long, default_value_t = 3)]
        count: usize,
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<i64>,
        #[arg(long, value_delimiter = ',')]
        focus: Vec<String>,
    },
    /// Time limits for a problem
    Limits { problem_id: i64 },
    /// Performance summary of a session
    Summary { session_id: String },
    /// Detect and clean up stalled sessions
    Sweep {
        /// Only report what would be done
        #[arg(long)]
        dry_run: bool,
    },
    /// Recompute and print tag mastery
    Mastery,
}

fn print_json<T: Serialize>(value: &T) -> Result<(), SchedulerError> {
    let out = serde_json::to_string_pretty(value).map_err(|e| SchedulerError::Config(e.to_string()))?;
    println!("{}", out);
    Ok(())
}

fn build_scheduler(cli: &Cli) -> Result<Scheduler, SchedulerError> {
    info!("Database path: {:?}", cli.db);
    let store = SqliteStore::open(&cli.db)?;
    let config = SchedulerConfig::load(&cli.config);
    let settings = match &cli.settings {
        Some(path) => StaticSettings::from_file(path)?,
        None => StaticSettings::default(),
    };
    let catalog = match &cli.catalog {
        Some(path) => Catalog::load(path)?,
        None => Catalog::builtin()?,
    };
    Ok(Scheduler::new(Arc::new(store), catalog, Arc::new(settings), config))
}

async fn run(cli: Cli) -> Result<(), SchedulerError> {
    let scheduler = build_scheduler(&cli)?;
    debug!("Scheduler built, dispatching command");

    let result = match cli.command {
        Command::Next { review } => {
            let session_type = if review {
                SessionType::Review
            } else {
                SessionType::Standard
            };
            print_json(&scheduler.get_or_create_session(session_type).await?)
        }
        Command::Attempt {
            id,
            slug,
            failed,
            minutes,
            perceived,
        } => {
            let input = AttemptInput {
                problem_id: id,
                slug,
                success: !failed,
                time_minutes: minutes,
                timestamp: None,
                perceived_difficulty: perceived,
            };
            print_json(&scheduler.record_attempt(input).await?)
        }
        Command::Focus { user } => print_json(&scheduler.get_focus_decision(&user).await),
        Command::More {
            count,
            exclude,
            focus,
        } => print_json(&scheduler.fetch_additional_problems(count, &exclude, &focus).await?),
        Command::Limits { problem_id } => print_json(&scheduler.get_limits(problem_id).await?),
        Command::Summary { session_id } => {
            let session = scheduler.session(&session_id).await?;
            print_json(&scheduler.summarize_session_performance(&session).await?)
        }
        Command::Sweep { dry_run: true } => print_json(&scheduler.detect_stalled_sessions().await?),
        Command::Sweep { dry_run: false } => print_json(&scheduler.run_cleanup_sweep().await?),
        Command::Mastery => print_json(&scheduler.recalculate_mastery().await?),
    };

    scheduler.shutdown();
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
