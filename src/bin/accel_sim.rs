//! Accelerometer feed simulator
//!
//! Writes `x y z` sample lines to the sensor feed path following a phase
//! script of sleep stages and minutes, e.g. `deep:20,light:5,awake:1`.
//! Each stage gets a motion amplitude that the classifier maps back to it.
//!
//! Usage:
//!   cargo run --bin accel-sim -- --script deep:30,light:10,awake:2 --speed 60
//!   cargo run --bin accel-sim -- --output /tmp/sleep-ledger.accel --repeat

use anyhow::{bail, Context};
use clap::Parser;
use sleep_ledger::domain::SleepStage;
use sleep_ledger::infra::Config;
use std::f64::consts::PI;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

const GRAVITY: f64 = 9.81;
/// Wall-clock batch period; samples due within it are written together
const BATCH_PERIOD: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "accel-sim")]
#[command(about = "Synthetic accelerometer feed for SleepLedger")]
struct Args {
    /// Path to TOML configuration file (feed path and rate defaults)
    #[arg(short, long)]
    config: Option<String>,

    /// Feed path (overrides sensor.device)
    #[arg(short, long)]
    output: Option<String>,

    /// Sample rate in Hz (overrides sensor.sampling_hz)
    #[arg(long)]
    rate: Option<u32>,

    /// Phase script: comma-separated `stage:minutes`
    #[arg(short, long, default_value = "deep:20,light:5,awake:1")]
    script: String,

    /// Time compression factor (60 = one simulated minute per second)
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Restart the script when it ends
    #[arg(long)]
    repeat: bool,
}

/// Standard deviation of the acceleration magnitude for a stage (m/s²)
fn stage_sigma(stage: SleepStage) -> f64 {
    match stage {
        SleepStage::Deep => 0.01,
        SleepStage::Light => 0.075,
        SleepStage::Awake => 0.3,
    }
}

fn parse_stage(name: &str) -> anyhow::Result<SleepStage> {
    match name.trim().to_ascii_lowercase().as_str() {
        "deep" => Ok(SleepStage::Deep),
        "light" => Ok(SleepStage::Light),
        "awake" => Ok(SleepStage::Awake),
        other => bail!("unknown stage `{other}` (expected deep, light or awake)"),
    }
}

/// Parse `deep:20,light:5` into (stage, minutes) phases
fn parse_script(script: &str) -> anyhow::Result<Vec<(SleepStage, f64)>> {
    let mut phases = Vec::new();
    for part in script.split(',').filter(|p| !p.trim().is_empty()) {
        let (stage, minutes) = part
            .split_once(':')
            .with_context(|| format!("phase `{part}` must look like stage:minutes"))?;
        let minutes: f64 = minutes
            .trim()
            .parse()
            .with_context(|| format!("invalid minutes in phase `{part}`"))?;
        if !(minutes.is_finite() && minutes > 0.0) {
            bail!("phase `{part}` must last a positive number of minutes");
        }
        phases.push((parse_stage(stage)?, minutes));
    }
    if phases.is_empty() {
        bail!("phase script is empty");
    }
    Ok(phases)
}

/// Sample `k` of a stage: gravity on z plus a sine whose σ matches the stage
fn sample_line(stage: SleepStage, k: u64) -> String {
    let amplitude = stage_sigma(stage) * 2f64.sqrt();
    // Irrational step so consecutive windows see the full waveform
    let phase = 2.0 * PI * (k as f64) * 0.618_033_988_7;
    let z = GRAVITY + amplitude * phase.sin();
    let x = 0.02 * (phase * 0.5).cos();
    format!("{x:.5} 0.00000 {z:.5}\n")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(&[]),
    };
    let output = args.output.unwrap_or_else(|| config.sensor_device().to_string());
    let rate = args.rate.unwrap_or(config.sampling_hz()).max(1);
    let speed = if args.speed.is_finite() && args.speed > 0.0 { args.speed } else { 1.0 };
    let phases = parse_script(&args.script)?;

    info!(
        output = %output,
        rate_hz = %rate,
        speed = %speed,
        phases = ?phases,
        repeat = %args.repeat,
        "accel_sim_starting"
    );

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&output)
        .await
        .with_context(|| format!("Failed to open feed {output}"))?;

    // Samples owed per batch at the compressed rate
    let per_batch = rate as f64 * speed * BATCH_PERIOD.as_secs_f64();
    let mut ticker = interval(BATCH_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

    let mut k: u64 = 0;
    loop {
        for &(stage, minutes) in &phases {
            let total = (minutes * 60.0 * rate as f64).round() as u64;
            info!(stage = %stage, minutes = %minutes, samples = %total, "phase_started");

            let mut written = 0u64;
            let mut owed = 0.0;
            while written < total {
                ticker.tick().await;
                owed += per_batch;
                let mut batch = String::new();
                while owed >= 1.0 && written < total {
                    batch.push_str(&sample_line(stage, k));
                    k += 1;
                    written += 1;
                    owed -= 1.0;
                }
                if !batch.is_empty() {
                    file.write_all(batch.as_bytes()).await?;
                    file.flush().await?;
                }
            }
        }
        if !args.repeat {
            break;
        }
    }

    info!(samples = %k, "accel_sim_finished");
    Ok(())
}
