//! Accelerometer sample sources
//!
//! `LineSensor` tails a device path (a regular file or a FIFO) carrying one
//! sample per line: `x y z` in m/s², separated by whitespace or commas.
//! Samples are stamped on receipt and forwarded with `try_send` so a slow
//! session owner can never stall the reader; drops are counted in metrics.

use crate::domain::types::AccelerometerSample;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long to wait for more data after reaching the end of a regular file
const TAIL_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum SensorError {
    /// No usable sensor: tracking does not start, the session runs without motion
    #[error("sensor unavailable: {0}")]
    Unavailable(String),
}

/// Running ingestion; stopping (or dropping) the handle ends delivery
pub struct SensorHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SensorHandle {
    pub fn new(shutdown: watch::Sender<bool>, task: Option<JoinHandle<()>>) -> Self {
        Self { shutdown, task }
    }

    pub fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SensorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Producer of accelerometer samples
pub trait SensorSource: Send + Sync {
    /// Begin delivering samples into `tx`. Must be called inside a tokio runtime.
    fn start(&self, tx: mpsc::Sender<AccelerometerSample>) -> Result<SensorHandle, SensorError>;
}

/// Parse one feed line: three floats separated by whitespace and/or commas
pub fn parse_sample_line(line: &str) -> Option<(f64, f64, f64)> {
    let mut fields = line.split(|c: char| c == ',' || c.is_whitespace()).filter(|f| !f.is_empty());
    let x = fields.next()?.parse::<f64>().ok()?;
    let y = fields.next()?.parse::<f64>().ok()?;
    let z = fields.next()?.parse::<f64>().ok()?;
    if fields.next().is_some() || !(x.is_finite() && y.is_finite() && z.is_finite()) {
        return None;
    }
    Some((x, y, z))
}

/// Line-oriented sensor feed read from a path
pub struct LineSensor {
    path: PathBuf,
    enabled: bool,
    metrics: Arc<Metrics>,
}

impl LineSensor {
    pub fn new(config: &Config, metrics: Arc<Metrics>) -> Self {
        Self {
            path: PathBuf::from(config.sensor_device()),
            enabled: config.sensor_enabled(),
            metrics,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SensorSource for LineSensor {
    fn start(&self, tx: mpsc::Sender<AccelerometerSample>) -> Result<SensorHandle, SensorError> {
        if !self.enabled {
            return Err(SensorError::Unavailable("sensor disabled in config".to_string()));
        }
        if !self.path.exists() {
            return Err(SensorError::Unavailable(format!(
                "no sensor feed at {}",
                self.path.display()
            )));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let path = self.path.clone();
        let metrics = self.metrics.clone();
        let task = tokio::spawn(async move {
            read_feed(path, tx, metrics, shutdown_rx).await;
        });

        info!(device = %self.path.display(), "sensor_started");
        Ok(SensorHandle::new(shutdown_tx, Some(task)))
    }
}

async fn read_feed(
    path: PathBuf,
    tx: mpsc::Sender<AccelerometerSample>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            warn!(device = %path.display(), error = %e, "sensor_open_failed");
            return;
        }
    };
    let mut lines = BufReader::new(file).lines();

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    loop {
        let next = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            next = lines.next_line() => next,
        };

        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => {
                // End of a regular file: keep tailing
                tokio::time::sleep(TAIL_POLL_INTERVAL).await;
                continue;
            }
            Err(e) => {
                warn!(device = %path.display(), error = %e, "sensor_read_failed");
                break;
            }
        };

        let Some((x, y, z)) = parse_sample_line(line.trim()) else {
            if !line.trim().is_empty() {
                debug!(line = %line, "sensor_line_unparsed");
            }
            continue;
        };

        match tx.try_send(AccelerometerSample::new(Utc::now(), x, y, z)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                metrics.record_sample_dropped();
                if last_drop_warn.elapsed() > Duration::from_secs(1) {
                    warn!(device = %path.display(), "sensor_sample_dropped: channel full");
                    last_drop_warn = Instant::now();
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!(device = %path.display(), "sensor_channel_closed");
                break;
            }
        }
    }

    info!(device = %path.display(), "sensor_stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_sample_line() {
        assert_eq!(parse_sample_line("0.1 0.2 9.8"), Some((0.1, 0.2, 9.8)));
        assert_eq!(parse_sample_line("0.1,0.2,9.8"), Some((0.1, 0.2, 9.8)));
        assert_eq!(parse_sample_line(" -1 , 2\t3 "), Some((-1.0, 2.0, 3.0)));
        assert_eq!(parse_sample_line("1 2"), None);
        assert_eq!(parse_sample_line("1 2 3 4"), None);
        assert_eq!(parse_sample_line("a b c"), None);
        assert_eq!(parse_sample_line("NaN 1 1"), None);
        assert_eq!(parse_sample_line(""), None);
    }

    #[tokio::test]
    async fn test_missing_device_is_unavailable() {
        let config = Config::default().with_sensor_device("/nonexistent/sleep-ledger.accel");
        let sensor = LineSensor::new(&config, Arc::new(Metrics::new()));
        let (tx, _rx) = mpsc::channel(8);

        let err = sensor.start(tx).err().unwrap();
        assert!(matches!(err, SensorError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_disabled_sensor_is_unavailable() {
        let file = NamedTempFile::new().unwrap();
        let config = Config::default()
            .with_sensor_device(file.path().to_str().unwrap())
            .with_sensor_enabled(false);
        let sensor = LineSensor::new(&config, Arc::new(Metrics::new()));
        let (tx, _rx) = mpsc::channel(8);

        assert!(sensor.start(tx).is_err());
    }

    #[tokio::test]
    async fn test_reads_samples_and_skips_garbage() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "0 0 9.81").unwrap();
        writeln!(file, "garbage").unwrap();
        writeln!(file, "0.5,0.5,9.7").unwrap();
        file.flush().unwrap();

        let config = Config::default().with_sensor_device(file.path().to_str().unwrap());
        let sensor = LineSensor::new(&config, Arc::new(Metrics::new()));
        let (tx, mut rx) = mpsc::channel(8);
        let mut handle = sensor.start(tx).unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!((first.x, first.y, first.z), (0.0, 0.0, 9.81));
        assert_eq!((second.x, second.y, second.z), (0.5, 0.5, 9.7));

        handle.stop();
    }

    #[tokio::test]
    async fn test_full_channel_counts_drops() {
        let mut file = NamedTempFile::new().unwrap();
        for _ in 0..10 {
            writeln!(file, "0 0 9.81").unwrap();
        }
        file.flush().unwrap();

        let metrics = Arc::new(Metrics::new());
        let config = Config::default().with_sensor_device(file.path().to_str().unwrap());
        let sensor = LineSensor::new(&config, metrics.clone());
        let (tx, _rx) = mpsc::channel(2);
        let _handle = sensor.start(tx).unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(metrics.samples_dropped(), 8);
    }
}
