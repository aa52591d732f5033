//! SleepLedger - punch-in/punch-out sleep tracking daemon
//!
//! Reads accelerometer samples from a line feed, classifies movement per
//! analysis window, drives the smart alarm and scores each session.
//!
//! Module structure:
//! - `domain/` - Core types (SleepSession, MovementDataPoint, SleepStage)
//! - `io/` - External interfaces (sensor feed, session store, wake log, control lines)
//! - `services/` - Logic (SessionController, classifier, scorer, alarm)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use sleep_ledger::infra::{Config, Metrics};
use sleep_ledger::io::control::run_control_loop;
use sleep_ledger::io::{FileSessionStore, LineSensor, LogAudio, SessionStore, WakeEventLog};
use sleep_ledger::services::{
    control_channel, create_persist_worker, HistorySummary, SessionController,
};
use std::sync::Arc;
use time::macros::format_description;
use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Persistence commands buffered between controller and worker
const PERSIST_QUEUE_CAPACITY: usize = 64;
/// Control commands buffered between stdin reader and controller
const CONTROL_QUEUE_CAPACITY: usize = 16;

/// SleepLedger - manual sleep session tracking with a smart alarm
#[derive(Parser, Debug)]
#[command(name = "sleep-ledger", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE, then config/dev.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the tracker; control lines are read from stdin
    Run,
    /// Print a summary of recent sessions as JSON
    Stats {
        /// Look-back window in days
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
}

fn init_tracing(json: bool) {
    // Default: INFO, use RUST_LOG=debug for per-window classification logs
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let timer = UtcTime::new(format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
    ));

    // Logs go to stderr; stdout carries control replies
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(timer)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(&[]),
    };

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Stats { days } => stats(&config, days),
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!("sleep-ledger starting");
    info!(
        config_file = %config.config_file(),
        sensor_device = %config.sensor_device(),
        sensor_enabled = %config.sensor_enabled(),
        sampling_hz = %config.sampling_hz(),
        window_seconds = %config.window_seconds(),
        min_session_minutes = %config.min_session_minutes(),
        alarm_window_minutes = %config.alarm_window_minutes(),
        storage_dir = %config.storage_dir(),
        wake_log = %config.wake_log_file(),
        "config_loaded"
    );

    let metrics = Arc::new(Metrics::new());
    let store: Arc<dyn SessionStore> = Arc::new(
        FileSessionStore::open(config.storage_dir())
            .with_context(|| format!("Failed to open session store {}", config.storage_dir()))?,
    );

    let (persist, worker) =
        create_persist_worker(store.clone(), metrics.clone(), PERSIST_QUEUE_CAPACITY);
    let worker_task = tokio::spawn(worker.run());

    let sensor = Arc::new(LineSensor::new(&config, metrics.clone()));
    let delivery = Arc::new(WakeEventLog::new(config.wake_log_file()));

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        // First tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    let controller = SessionController::new(
        config,
        store.as_ref(),
        persist.clone(),
        sensor,
        delivery,
        Arc::new(LogAudio),
        metrics.clone(),
    );
    let (handle, cmd_rx) = control_channel(CONTROL_QUEUE_CAPACITY);
    let controller_task = tokio::spawn(controller.run(cmd_rx));
    info!("session_controller_spawned");

    let stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = run_control_loop(stdin, tokio::io::stdout(), handle) => {
            if let Err(e) = result {
                error!(error = %format!("{e:#}"), "control_loop_failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown_signal_received");
        }
    }

    // Handle dropped: the controller snapshots any active session and exits
    if let Err(e) = controller_task.await {
        error!(error = %e, "session_controller_task_failed");
    }
    persist.flush().await;
    drop(persist);
    if let Err(e) = worker_task.await {
        error!(error = %e, "persist_worker_task_failed");
    }

    metrics.report().log();
    info!("sleep-ledger shutdown complete");
    Ok(())
}

fn stats(config: &Config, days: i64) -> anyhow::Result<()> {
    let store = FileSessionStore::open(config.storage_dir())
        .with_context(|| format!("Failed to open session store {}", config.storage_dir()))?;
    let since = stats_since(Utc::now(), days)?;
    let sessions = store.fetch_since(since).context("Failed to read sessions")?;

    let summary = HistorySummary::from_sessions(&sessions);
    info!(days = %days, sessions = %summary.session_count, "stats_computed");
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Start of the look-back window; rejects spans chrono cannot represent
fn stats_since(now: DateTime<Utc>, days: i64) -> anyhow::Result<DateTime<Utc>> {
    Duration::try_days(days.max(0))
        .and_then(|span| now.checked_sub_signed(span))
        .with_context(|| format!("--days {days} is out of range"))
}
