//! # pmsync: identity sync + task reminder service
//!
//! Usage:
//!   pmsync serve                   # HTTP gateway + resume loop
//!   pmsync dispatch event.json     # Handle one event envelope and exit
//!   pmsync tick                    # Resume due workflow runs once
//!   pmsync runs --limit 20         # Show recent workflow runs
//!   pmsync init-config             # Write ~/.pmsync/config.toml

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pmsync_core::PmsyncConfig;
use pmsync_core::events::Event;
use pmsync_handlers::Dispatcher;
use pmsync_handlers::notify::notification_engine;
use pmsync_scheduler::{RunStatus, SchedulerDb, SchedulerEngine, spawn_scheduler};
use pmsync_store::AppDb;
use tracing_subscriber::EnvFilter;

const CRATES: [&str; 7] = [
    "pmsync",
    "pmsync_core",
    "pmsync_store",
    "pmsync_mail",
    "pmsync_scheduler",
    "pmsync_handlers",
    "pmsync_gateway",
];

#[derive(Parser)]
#[command(
    name = "pmsync",
    version,
    about = "🔄 pmsync: identity sync handlers and durable task reminders"
)]
struct Cli {
    /// Config file (default: ~/.pmsync/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway and the workflow resume loop
    Serve,
    /// Dispatch one JSON event envelope read from a file ("-" for stdin)
    Dispatch { file: String },
    /// Resume every sleeping run that is due, once
    Tick,
    /// List recent workflow runs
    Runs {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Write a default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Everything a command needs, wired once.
struct Runtime {
    config: PmsyncConfig,
    engine: Arc<SchedulerEngine>,
    dispatcher: Arc<Dispatcher>,
}

impl Runtime {
    fn open(config: PmsyncConfig) -> Result<Self> {
        let db_path = config.database_path();
        let sched_path = config.scheduler_db_path();
        for path in [&db_path, &sched_path] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Arc::new(AppDb::open(&db_path).context("opening application database")?);
        tracing::info!("💾 Application DB: {}", db_path.display());
        let scheduler_db =
            Arc::new(SchedulerDb::open(&sched_path).context("opening scheduler database")?);
        tracing::info!("💾 Scheduler DB: {}", sched_path.display());

        let mailer = pmsync_mail::mailer_from_config(&config.mail)?;
        let engine = Arc::new(notification_engine(scheduler_db, db.clone(), mailer));
        let dispatcher = Arc::new(Dispatcher::with_defaults(db, engine.clone()));
        Ok(Self {
            config,
            engine,
            dispatcher,
        })
    }
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config
        .as_deref()
        .map(pmsync_core::config::expand_path)
        .unwrap_or_else(PmsyncConfig::default_path)
}

fn load_config(path: &Path) -> Result<PmsyncConfig> {
    if path.exists() {
        return Ok(PmsyncConfig::load_from(path)?);
    }
    if path != PmsyncConfig::default_path() {
        anyhow::bail!("config file not found: {}", path.display());
    }
    tracing::debug!("No config at {}, using defaults", path.display());
    Ok(PmsyncConfig::load()?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { "debug" } else { "info" };
    let mut filter = CRATES
        .iter()
        .map(|c| format!("{c}={level}"))
        .collect::<Vec<_>>()
        .join(",");
    if cli.verbose {
        filter.push_str(",tower_http=debug");
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let path = config_path(&cli);
    let open = || -> Result<Runtime> { Runtime::open(load_config(&path)?) };

    match cli.command {
        Command::InitConfig { force } => {
            if path.exists() && !force {
                println!("⚠️  Config already exists at {} (use --force to overwrite)", path.display());
                return Ok(());
            }
            PmsyncConfig::default().save_to(&path)?;
            println!("✅ Config written to {}", path.display());
        }
        Command::Serve => {
            let runtime = open()?;
            let requeued = runtime.engine.recover()?;
            if requeued > 0 {
                tracing::info!("🔄 {requeued} interrupted run(s) will resume on the next tick");
            }
            tokio::spawn(spawn_scheduler(
                runtime.engine.clone(),
                runtime.config.scheduler.tick_interval_secs,
            ));

            let state = pmsync_gateway::AppState::new(
                runtime.dispatcher.clone(),
                runtime.engine.clone(),
                runtime.config.gateway.signing_secret.clone(),
            );
            tracing::info!(
                "🚀 Handling {} event type(s)",
                runtime.dispatcher.event_names().len()
            );
            pmsync_gateway::start(&runtime.config.gateway, state).await?;
        }
        Command::Dispatch { file } => {
            let raw = if file == "-" {
                std::io::read_to_string(std::io::stdin())?
            } else {
                std::fs::read_to_string(&file).with_context(|| format!("reading {file}"))?
            };
            let event: Event = serde_json::from_str(&raw).context("parsing event envelope")?;
            open()?.dispatcher.dispatch(&event).await?;
            println!("✅ {} handled", event.name);
        }
        Command::Tick => {
            let reports = open()?.engine.tick().await;
            if reports.is_empty() {
                println!("⏰ No runs due");
            }
            for report in reports {
                match report.status {
                    RunStatus::Failed => println!(
                        "❌ {} {}: {}",
                        report.run_id,
                        report.function_id,
                        report.error.as_deref().unwrap_or("unknown error")
                    ),
                    status => println!("✅ {} {} → {}", report.run_id, report.function_id, status.as_str()),
                }
            }
        }
        Command::Runs { limit } => {
            let runs = open()?.engine.list_runs(limit)?;
            if runs.is_empty() {
                println!("No workflow runs yet.");
            }
            for run in runs {
                let resume = run
                    .resume_at
                    .map(|at| format!(" (resume {})", at.to_rfc3339()))
                    .unwrap_or_default();
                println!(
                    "{}  {:<10} {:<28} {}{}",
                    run.id,
                    run.status.as_str(),
                    run.function_id,
                    run.created_at.to_rfc3339(),
                    resume
                );
                if let Some(err) = run.last_error {
                    println!("    ↳ {err}");
                }
            }
        }
    }

    Ok(())
}
