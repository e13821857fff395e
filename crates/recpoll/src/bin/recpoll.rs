//! `recpoll` command line: run the polling loop, a single cycle, or print status.

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use recpoll::config::{load_config, PollerConfig};
use recpoll::db::Database;
use recpoll::jobs::{enqueue, NewJob};
use recpoll::logging::init_logging;
use recpoll::{Poller, PollerStatus};

#[derive(Parser, Debug)]
#[command(name = "recpoll")]
#[command(about = "Matches pending recording jobs to their recordings and transcripts")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file (default: ~/.recpoll/config.json if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Poll on the configured interval until Ctrl-C
    Run,
    /// Run a single poll cycle and print its stats
    Once,
    /// Print pending job count and recent cycles
    Status,
    /// Create a pending job
    Enqueue {
        /// Meeting reference to search for
        meeting_ref: String,
        /// Optional correlation reference (e.g. alert id)
        #[arg(long)]
        correlation_ref: Option<String>,
        /// Meeting start time, RFC 3339 (default: now)
        #[arg(long)]
        created_at: Option<DateTime<Utc>>,
    },
}

fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir()
        .map(|h| h.join(".recpoll").join("config.json"))
        .filter(|p| p.exists())
}

fn resolve_config(path: Option<PathBuf>) -> Result<PollerConfig, Box<dyn Error>> {
    match path.or_else(default_config_path) {
        Some(path) => Ok(load_config(&path)?),
        None => Ok(PollerConfig::default()),
    }
}

fn open_database(config: &PollerConfig) -> Result<Database, Box<dyn Error>> {
    let path = config
        .database
        .resolved_path()
        .ok_or("database.path is unset and no home directory was found")?;
    Ok(Database::open(&path)?)
}

async fn execute(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = resolve_config(cli.config)?;
    init_logging(&config.logging);

    match cli.command {
        Commands::Run => {
            let poller = Poller::from_config(config)?;
            let polling = poller.start_polling();
            tracing::info!(instance = %poller.orchestrator().instance_id(), "recpoll running");

            let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel();
            ctrlc::set_handler(move || {
                let _ = shutdown_tx.send(());
            })?;

            tokio::task::spawn_blocking(move || {
                let _ = shutdown_rx.recv();
                tracing::info!("Shutdown requested, finishing current cycle");
                polling.join();
            })
            .await?;
        }
        Commands::Once => {
            let poller = Poller::from_config(config)?;
            let stats = poller.run_once().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Status => {
            let db = open_database(&config)?;
            let status = PollerStatus::from_store(&db)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Enqueue {
            meeting_ref,
            correlation_ref,
            created_at,
        } => {
            let db = open_database(&config)?;
            let mut new_job = NewJob::new(meeting_ref);
            if let Some(correlation_ref) = correlation_ref {
                new_job = new_job.with_correlation_ref(correlation_ref);
            }
            if let Some(created_at) = created_at {
                new_job = new_job.created_at(created_at);
            }
            let job = enqueue(&db, new_job)?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
