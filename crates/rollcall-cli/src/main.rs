use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{ActionKind, AttendanceEngine, EngineConfig};
use rollcall_store::{SqliteIdentityStore, SqliteLedger};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod kiosk;
mod replay;
mod report;

use config::Config;
use replay::{RecordedSession, Replay};

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-verified attendance punches", version)]
struct Cli {
    /// SQLite database file (overrides config file and ROLLCALL_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll an identity from a recorded session
    Enroll {
        /// Identity name
        name: String,
        /// Recorded session (JSON) standing in for camera and models
        #[arg(short, long)]
        session: PathBuf,
        /// Replace an existing template without asking
        #[arg(long)]
        overwrite: bool,
    },
    /// Verify a face and punch in or out
    Punch {
        /// IN or OUT
        action: ActionKind,
        #[arg(short, long)]
        session: PathBuf,
        /// Print the full attempt as JSON
        #[arg(long)]
        json: bool,
    },
    /// Interactive terminal: r <name>, i, o, q
    Kiosk {
        #[arg(short, long)]
        session: PathBuf,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove {
        name: String,
    },
    /// Show the most recent attendance records
    Log {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Print database and threshold summary as JSON
    Status,
}

#[derive(Serialize)]
struct StatusReport<'a> {
    db_path: &'a Path,
    identities: usize,
    records: u64,
    config: &'a EngineConfig,
}

type Engine = AttendanceEngine<SqliteIdentityStore, SqliteLedger>;

fn open_engine(config: &Config) -> Result<Engine> {
    let store = SqliteIdentityStore::open(&config.db_path)
        .with_context(|| format!("opening identity store {}", config.db_path.display()))?;
    let ledger = SqliteLedger::open(&config.db_path)
        .with_context(|| format!("opening attendance ledger {}", config.db_path.display()))?;
    Ok(AttendanceEngine::new(config.engine.clone(), store, ledger)?)
}

fn spawn(config: &Config, session: &Path) -> Result<engine::EngineHandle> {
    let recorded = RecordedSession::load(session)?;
    let handle = engine::spawn_engine(open_engine(config)?, Replay::new(recorded)).context("failed to spawn engine thread")?;
    Ok(handle)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load().context("loading configuration")?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    tracing::debug!(db = %config.db_path.display(), "configuration resolved");

    match cli.command {
        Commands::Enroll {
            name,
            session,
            overwrite,
        } => {
            let handle = spawn(&config, &session)?;
            eprintln!("Enrolling {name}: look at the camera, Ctrl-C to cancel");
            let enrolled = kiosk::enroll_interruptible(&handle, name, overwrite).await?;
            println!("{}", report::enrollment_line(&enrolled));
        }
        Commands::Punch { action, session, json } => {
            let handle = spawn(&config, &session)?;
            let verification = handle.verify(action).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&verification)?);
            } else {
                println!("{}", report::verification_line(&verification));
            }
        }
        Commands::Kiosk { session } => {
            let handle = spawn(&config, &session)?;
            kiosk::run(handle).await?;
        }
        Commands::List => {
            let store = SqliteIdentityStore::open(&config.db_path)?;
            let enrolled = store.enrolled()?;
            if enrolled.is_empty() {
                println!("No identities enrolled");
            }
            for identity in enrolled {
                println!(
                    "{:<24} dim={:<5} enrolled {}",
                    identity.name,
                    identity.dim,
                    identity.enrolled_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Commands::Remove { name } => {
            let mut engine = open_engine(&config)?;
            if engine.remove_identity(&name)? {
                println!("Removed {name}");
            } else {
                anyhow::bail!("no identity named {name:?}");
            }
        }
        Commands::Log { limit, json } => {
            let ledger = SqliteLedger::open(&config.db_path)?;
            let records = ledger.recent(limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for record in &records {
                    println!("{}", report::record_line(record));
                }
            }
        }
        Commands::Status => {
            let store = SqliteIdentityStore::open(&config.db_path)?;
            let ledger = SqliteLedger::open(&config.db_path)?;
            let status = StatusReport {
                db_path: &config.db_path,
                identities: store.enrolled()?.len(),
                records: ledger.count()?,
                config: &config.engine,
            };
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
