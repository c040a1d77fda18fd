//! Runkeeper main entry point
//!
//! This is the command-line interface for the Runkeeper run coordinator.

use anyhow::{Context, Result};
use clap::Parser;
use runkeeper::config::{load_config_with_hash, Config};
use runkeeper::gate::{AdmissionPolicy, ScheduleGate};
use runkeeper::notify::Notifier;
use runkeeper::runner::{CommandWork, Dispatcher, ExtractionRunner};
use runkeeper::schedule::{spawn_daily_trigger, DailySchedule};
use runkeeper::server::{request_remote_run, serve, startup_recovery, AppState, TriggerReply};
use runkeeper::storage::{open_storage, RetryPolicy, RunRecord, StoreHandle};
use runkeeper::TriggerSource;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Runkeeper: run coordination for a daily extraction job
///
/// Runkeeper serves health and status over HTTP, admits at most one
/// extraction run at a time, and records every run's outcome durably so
/// restarts never lose track of what ran.
#[derive(Parser, Debug)]
#[command(name = "runkeeper")]
#[command(version)]
#[command(about = "Run coordination for a daily extraction job", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show the effective settings without serving
    #[arg(long, conflicts_with_all = ["status", "trigger"])]
    dry_run: bool,

    /// Show recorded runs from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "trigger"])]
    status: bool,

    /// Ask the running service to start a run, then exit
    #[arg(long, conflicts_with_all = ["dry_run", "status"])]
    trigger: bool,

    /// Trigger source reported with --trigger
    #[arg(long, value_enum, default_value = "scheduled", requires = "trigger")]
    source: SourceArg,

    /// Service base URL for --trigger (default: http://127.0.0.1:<port>)
    #[arg(long, requires = "trigger")]
    url: Option<String>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum SourceArg {
    Scheduled,
    Manual,
}

impl From<SourceArg> for TriggerSource {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Scheduled => TriggerSource::Scheduled,
            SourceArg::Manual => TriggerSource::Manual,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config, &config_hash)?;
    } else if cli.status {
        handle_status(&config, &config_hash)?;
    } else if cli.trigger {
        return handle_trigger(&config, cli.source.into(), cli.url.as_deref()).await;
    } else {
        handle_serve(config, &config_hash).await?;
    }

    Ok(ExitCode::SUCCESS)
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// `RUST_LOG`, when set, takes precedence over the flags.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if quiet {
            // Only show errors
            EnvFilter::new("error")
        } else {
            match verbose {
                0 => EnvFilter::new("runkeeper=info,warn"),
                1 => EnvFilter::new("runkeeper=debug,tower_http=debug,info"),
                2 => EnvFilter::new("runkeeper=trace,debug"),
                _ => EnvFilter::new("trace"),
            }
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open_store(config: &Config, config_hash: &str) -> Result<StoreHandle> {
    let retry = RetryPolicy::new(
        config.storage.retry_attempts,
        Duration::from_millis(config.storage.retry_backoff_ms),
    );
    let store = open_storage(Path::new(&config.storage.database_path), retry, config_hash)
        .with_context(|| format!("Failed to open run store {}", config.storage.database_path))?;
    Ok(StoreHandle::new(store))
}

/// Handles the --dry-run mode: validates config and shows the effective settings
fn handle_dry_run(config: &Config, config_hash: &str) -> Result<()> {
    println!("=== Runkeeper Dry Run ===\n");

    println!("Server:");
    println!(
        "  Listen: {}:{}",
        config.server.bind_address, config.server.port
    );

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);
    println!(
        "  Transient retries: {} (backoff {}ms)",
        config.storage.retry_attempts, config.storage.retry_backoff_ms
    );
    println!(
        "  Store failures before exit: {}",
        config.storage.max_consecutive_failures
    );
    match config.storage.history_limit {
        Some(limit) => println!("  History limit: {} runs", limit),
        None => println!("  History limit: unlimited"),
    }

    let schedule = DailySchedule::from_config(&config.schedule)?;
    println!("\nSchedule:");
    println!(
        "  Fire time: {} {}",
        config.schedule.fire_time, config.schedule.timezone
    );
    println!(
        "  Minimum interval: {}s",
        config.schedule.minimum_interval_secs
    );
    println!(
        "  Manual triggers bypass interval: {}",
        config.schedule.manual_bypasses_interval
    );
    if config.schedule.enabled {
        match schedule.next_fire_after(chrono::Utc::now()) {
            Some(next) => println!("  In-process trigger: enabled, next fire {}", next.to_rfc3339()),
            None => println!("  In-process trigger: enabled, no upcoming fire time"),
        }
    } else {
        println!("  In-process trigger: disabled (external scheduler)");
    }

    println!("\nExtractor:");
    println!(
        "  Command: {} {}",
        config.extractor.command,
        config.extractor.args.join(" ")
    );
    if let Some(dir) = &config.extractor.working_dir {
        println!("  Working dir: {}", dir);
    }
    println!("  Deadline: {}s", config.extractor.timeout_secs);
    for key in config.extractor.env.keys() {
        println!("  Env: {}", key);
    }

    match &config.notify {
        Some(notify) => println!("\nNotify:\n  Webhook: {}", notify.webhook_url),
        None => println!("\nNotify:\n  disabled"),
    }

    println!("\n✓ Configuration is valid (hash: {})", config_hash);

    Ok(())
}

/// Handles the --status mode: shows recorded runs from the database
fn handle_status(config: &Config, config_hash: &str) -> Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let store = open_store(config, config_hash)?;
    let (last_succeeded, current, recent) = store.with(|store| {
        Ok((
            store.latest_succeeded()?,
            store.current_running()?,
            store.recent_runs(10)?,
        ))
    })?;

    match last_succeeded {
        Some(run) => println!(
            "Last success: {} -> {}",
            run.run_id,
            run.result_ref.as_deref().unwrap_or_default()
        ),
        None => println!("Last success: none"),
    }
    match current {
        Some(run) => println!("Running: {} ({})", run.run_id, run.trigger_source),
        None => println!("Running: none"),
    }

    println!("\nRecent runs ({}):", recent.len());
    for run in &recent {
        print_run(run);
    }

    Ok(())
}

fn print_run(run: &RunRecord) {
    let when = run
        .started_at
        .unwrap_or(run.created_at)
        .format("%Y-%m-%d %H:%M:%S UTC");
    let detail = run
        .result_ref
        .as_deref()
        .or(run.error_detail.as_deref())
        .unwrap_or("");
    println!(
        "  {}  {:<10} {:<9} {}  {}",
        when,
        run.status.to_string(),
        run.trigger_source.to_string(),
        run.run_id,
        detail
    );
}

/// Handles the --trigger mode: asks the running service for a run
///
/// Exits 0 when admitted, 2 when rejected, 1 on any other error.
async fn handle_trigger(
    config: &Config,
    source: TriggerSource,
    url: Option<&str>,
) -> Result<ExitCode> {
    let base_url = url
        .map(str::to_string)
        .unwrap_or_else(|| format!("http://127.0.0.1:{}", config.server.port));

    match request_remote_run(&base_url, source).await {
        Ok(TriggerReply::Admitted { run_id }) => {
            println!("Admitted run {}", run_id);
            Ok(ExitCode::SUCCESS)
        }
        Ok(TriggerReply::Rejected { reason, detail }) => {
            println!("Rejected ({}): {}", reason, detail);
            Ok(ExitCode::from(2))
        }
        Err(e) => {
            tracing::error!("Trigger request to {} failed: {}", base_url, e);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Handles the main service operation
async fn handle_serve(config: Config, config_hash: &str) -> Result<()> {
    let store = open_store(&config, config_hash)?;

    // Nothing is admitted before orphaned runs are settled
    startup_recovery(&store).context("Startup recovery failed")?;

    let notifier = config
        .notify
        .as_ref()
        .map(Notifier::new)
        .transpose()
        .context("Failed to build webhook client")?;

    let runner = ExtractionRunner::new(
        store.clone(),
        Arc::new(CommandWork::from(&config.extractor)),
        config.extractor.timeout(),
    )
    .with_history_limit(config.storage.history_limit)
    .with_notifier(notifier);
    let gate = ScheduleGate::new(store.clone(), AdmissionPolicy::from(&config.schedule));
    let dispatcher = Dispatcher::new(gate, runner);

    if config.schedule.enabled {
        let schedule = DailySchedule::from_config(&config.schedule)?;
        tracing::info!(
            "In-process daily trigger at {} {}",
            config.schedule.fire_time,
            config.schedule.timezone
        );
        spawn_daily_trigger(dispatcher.clone(), schedule);
    }

    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let state = AppState::new(store, dispatcher, config.storage.max_consecutive_failures);
    serve(listener, state).await?;

    tracing::info!("Runkeeper stopped");
    Ok(())
}
