//! queuectl command line controller.
//!
//! Operator surface for the job queue: enqueue and inspect jobs, manage the
//! dead-letter queue, tune runtime settings, and start/stop the worker pool.

use std::fs;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use queuectl_core::queue::{
    connect, FileHeartbeat, JobStatus, JobStore, StopOutcome, StoreError, Worker, WorkerConfig,
    WorkerSupervisor,
};
use queuectl_core::settings::Settings;
use queuectl_core::Config;

#[derive(Parser)]
#[command(name = "queuectl")]
#[command(about = "Persistent shell job queue controller")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a job to the queue
    Enqueue {
        /// Job ID (unique)
        #[arg(long)]
        id: String,

        /// Shell command to execute
        #[arg(long)]
        command: String,

        /// Override per-job max retries
        #[arg(long)]
        max_retries: Option<i64>,

        /// If the job exists, replace it
        #[arg(long)]
        replace: bool,
    },

    /// List jobs, optionally filtered by state
    List {
        /// pending|processing|completed|failed
        #[arg(long)]
        state: Option<String>,

        /// Emit JSON instead of plain lines
        #[arg(long)]
        json: bool,
    },

    /// Show live workers and job counts
    Status {
        /// Emit JSON instead of plain lines
        #[arg(long)]
        json: bool,
    },

    /// Job admin commands
    Jobs {
        #[command(subcommand)]
        command: JobsCommands,
    },

    /// Worker control
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },

    /// Dead-letter queue
    Dlq {
        #[command(subcommand)]
        command: DlqCommands,
    },

    /// Runtime configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum JobsCommands {
    /// Delete an active job by id
    Delete { id: String },
}

#[derive(Subcommand)]
enum WorkerCommands {
    /// Start worker processes
    Start {
        /// Number of workers to start
        #[arg(long, default_value_t = 1)]
        count: u32,
    },

    /// Stop all tracked workers
    Stop,

    /// Run a worker loop in this process (used by `worker start`)
    #[command(hide = true)]
    Run,
}

#[derive(Subcommand)]
enum DlqCommands {
    /// List dead-lettered jobs, most recent first
    List {
        /// Emit JSON instead of plain lines
        #[arg(long)]
        json: bool,
    },

    /// Move a dead-lettered job back into the queue
    Retry { id: String },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Set a runtime setting
    Set { key: String, value: String },

    /// Print a runtime setting
    Get { key: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,queuectl_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = Config::from_env().context("failed to load configuration")?;
    fs::create_dir_all(&config.data_dir).with_context(|| {
        format!("failed to create data directory {}", config.data_dir.display())
    })?;

    let pool = connect(&config.database_url)
        .await
        .context("failed to open job database")?;
    let store = JobStore::new(pool.clone());
    let settings = Settings::new(pool);

    match cli.command {
        Commands::Enqueue {
            id,
            command,
            max_retries,
            replace,
        } => match store.enqueue(&id, &command, max_retries, replace).await {
            Ok(_) => println!("Enqueued job {id}"),
            Err(e @ StoreError::AlreadyExists(_)) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
            Err(e) => return Err(e.into()),
        },

        Commands::List { state, json } => {
            let status = match state.as_deref() {
                Some(raw) => Some(raw.parse::<JobStatus>()?),
                None => None,
            };
            let jobs = store.list(status).await?;
            if json {
                println!("{}", serde_json::to_string(&jobs)?);
            } else {
                for job in jobs {
                    let next_run_at = job
                        .next_run_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{} | {} | {} | attempts={} | next_run_at={}",
                        job.id, job.command, job.status, job.attempts, next_run_at
                    );
                }
            }
        }

        Commands::Status { json } => {
            let live = WorkerSupervisor::new(&config.data_dir).live_workers();
            let summary = store.summarize().await?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string(&serde_json::json!({
                        "workers": live,
                        "jobs": summary,
                    }))?
                );
            } else {
                println!("Workers: {live} active");
                println!("total: {}", summary.total);
                println!("pending: {}", summary.pending);
                println!("processing: {}", summary.processing);
                println!("completed: {}", summary.completed);
                println!("failed: {}", summary.failed);
            }
        }

        Commands::Jobs { command } => match command {
            JobsCommands::Delete { id } => {
                let found = store.delete(&id).await?;
                println!("{}", if found { "deleted" } else { "not found" });
            }
        },

        Commands::Worker { command } => match command {
            WorkerCommands::Start { count } => {
                let supervisor = WorkerSupervisor::new(&config.data_dir);
                let pids = supervisor.start(count)?;
                println!("Started {} worker(s): {:?}", pids.len(), pids);
            }
            WorkerCommands::Stop => {
                let supervisor = WorkerSupervisor::new(&config.data_dir);
                match supervisor.stop()? {
                    StopOutcome::NoWorkers => println!("No worker PIDs found."),
                    StopOutcome::Signaled(_) => println!("Workers signaled to stop."),
                }
            }
            WorkerCommands::Run => {
                let worker_config = WorkerConfig::default();
                let heartbeat = Box::new(FileHeartbeat::new(
                    &config.data_dir,
                    &worker_config.worker_id,
                ));
                let worker = Worker::with_config(
                    store,
                    settings,
                    heartbeat,
                    CancellationToken::new(),
                    worker_config,
                );
                worker.run_until_shutdown().await?;
            }
        },

        Commands::Dlq { command } => match command {
            DlqCommands::List { json } => {
                let dead = store.list_dead().await?;
                if json {
                    println!("{}", serde_json::to_string(&dead)?);
                } else {
                    for dead in dead {
                        println!(
                            "{} | {} | {} | failed_at={}",
                            dead.id,
                            dead.command,
                            dead.last_error.as_deref().unwrap_or("-"),
                            dead.failed_at.to_rfc3339()
                        );
                    }
                }
            }
            DlqCommands::Retry { id } => {
                if store.resurrect(&id).await? {
                    println!("Moved job {id} back to queue");
                } else {
                    println!("Not found");
                }
            }
        },

        Commands::Config { command } => match command {
            ConfigCommands::Set { key, value } => {
                settings.set(&key, &value).await?;
                println!("{key}={value}");
            }
            ConfigCommands::Get { key } => {
                println!("{}", settings.get(&key).await?.unwrap_or_default());
            }
        },
    }

    Ok(())
}
