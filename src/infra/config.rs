//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

// Upper bounds keep derived buffers, channels and durations in range
const MAX_SAMPLING_HZ: u32 = 500;
const MAX_CHANNEL_CAPACITY: usize = 1 << 20;
const MAX_WINDOW_SECONDS: u64 = 600;
const MAX_ALARM_WINDOW_MINUTES: u64 = 24 * 60;
const MAX_INTERVAL_SECS: u64 = 86_400;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Path of the line-oriented sample feed (file or FIFO)
    pub device: String,
    /// Disable to run sessions in duration-only mode
    pub enabled: bool,
    /// Nominal accelerometer rate (Hz)
    pub sampling_hz: u32,
    /// Bounded sample channel size between reader and session owner
    pub channel_capacity: usize,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            device: "/tmp/sleep-ledger.accel".to_string(),
            enabled: true,
            sampling_hz: 50,
            channel_capacity: 4096,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Length of one analysis window (seconds)
    pub window_seconds: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self { window_seconds: 60 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions shorter than this are discarded at punch-out
    pub min_session_minutes: f64,
    /// Goal used when punch-in does not name one
    pub default_goal_hours: f64,
    /// Request a snapshot save every N movement points
    pub snapshot_every_points: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { min_session_minutes: 5.0, default_goal_hours: 8.0, snapshot_every_points: 5 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlarmConfig {
    /// Pre-wake horizon before the target time
    pub window_minutes: u64,
    /// Hard-deadline check cadence
    pub fallback_interval_secs: u64,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self { window_minutes: 30, fallback_interval_secs: 60 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one JSON document per session
    pub dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { dir: "data/sessions".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WakeLogConfig {
    /// File path for alarm delivery events (JSONL format)
    pub file: String,
}

impl Default for WakeLogConfig {
    fn default() -> Self {
        Self { file: "wake_events.jsonl".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TomlConfig {
    pub sensor: SensorConfig,
    pub analysis: AnalysisConfig,
    pub session: SessionConfig,
    pub alarm: AlarmConfig,
    pub storage: StorageConfig,
    pub wake_log: WakeLogConfig,
    pub metrics: MetricsConfig,
}

/// Main configuration struct passed explicitly to every component
#[derive(Debug, Clone)]
pub struct Config {
    sensor_device: String,
    sensor_enabled: bool,
    sampling_hz: u32,
    sample_channel_capacity: usize,
    window_seconds: u64,
    min_session_minutes: f64,
    default_goal_hours: f64,
    snapshot_every_points: usize,
    alarm_window_minutes: u64,
    alarm_fallback_interval_secs: u64,
    storage_dir: String,
    wake_log_file: String,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        Self {
            sensor_device: toml_config.sensor.device,
            sensor_enabled: toml_config.sensor.enabled,
            sampling_hz: toml_config.sensor.sampling_hz.clamp(1, MAX_SAMPLING_HZ),
            sample_channel_capacity: toml_config.sensor.channel_capacity.clamp(1, MAX_CHANNEL_CAPACITY),
            window_seconds: toml_config.analysis.window_seconds.clamp(1, MAX_WINDOW_SECONDS),
            min_session_minutes: toml_config.session.min_session_minutes,
            default_goal_hours: toml_config.session.default_goal_hours,
            snapshot_every_points: toml_config.session.snapshot_every_points.max(1),
            alarm_window_minutes: toml_config.alarm.window_minutes.min(MAX_ALARM_WINDOW_MINUTES),
            alarm_fallback_interval_secs: toml_config
                .alarm
                .fallback_interval_secs
                .clamp(1, MAX_INTERVAL_SECS),
            storage_dir: toml_config.storage.dir,
            wake_log_file: toml_config.wake_log.file,
            metrics_interval_secs: toml_config.metrics.interval_secs.clamp(1, MAX_INTERVAL_SECS),
            config_file: config_file.to_string(),
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load configuration from a path, falling back to defaults on error
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    /// Number of samples that make up one analysis window
    pub fn window_sample_count(&self) -> usize {
        (self.sampling_hz as u64 * self.window_seconds) as usize
    }

    /// Rolling buffer capacity: two windows of history
    pub fn sample_buffer_capacity(&self) -> usize {
        self.window_sample_count() * 2
    }

    pub fn window_duration(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub fn alarm_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.alarm_window_minutes as i64)
    }

    pub fn alarm_fallback_interval(&self) -> Duration {
        Duration::from_secs(self.alarm_fallback_interval_secs)
    }

    // Getters for all config fields
    pub fn sensor_device(&self) -> &str {
        &self.sensor_device
    }

    pub fn sensor_enabled(&self) -> bool {
        self.sensor_enabled
    }

    pub fn sampling_hz(&self) -> u32 {
        self.sampling_hz
    }

    pub fn sample_channel_capacity(&self) -> usize {
        self.sample_channel_capacity
    }

    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    pub fn min_session_minutes(&self) -> f64 {
        self.min_session_minutes
    }

    pub fn default_goal_hours(&self) -> f64 {
        self.default_goal_hours
    }

    pub fn snapshot_every_points(&self) -> usize {
        self.snapshot_every_points
    }

    pub fn alarm_window_minutes(&self) -> u64 {
        self.alarm_window_minutes
    }

    pub fn alarm_fallback_interval_secs(&self) -> u64 {
        self.alarm_fallback_interval_secs
    }

    pub fn storage_dir(&self) -> &str {
        &self.storage_dir
    }

    pub fn wake_log_file(&self) -> &str {
        &self.wake_log_file
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method to set the sensor feed path
    pub fn with_sensor_device(mut self, device: &str) -> Self {
        self.sensor_device = device.to_string();
        self
    }

    /// Builder method to enable or disable the sensor
    pub fn with_sensor_enabled(mut self, enabled: bool) -> Self {
        self.sensor_enabled = enabled;
        self
    }

    /// Builder method to shrink the sampling rate and window (tests)
    pub fn with_sampling(mut self, sampling_hz: u32, window_seconds: u64) -> Self {
        self.sampling_hz = sampling_hz.clamp(1, MAX_SAMPLING_HZ);
        self.window_seconds = window_seconds.clamp(1, MAX_WINDOW_SECONDS);
        self
    }

    pub fn with_snapshot_every_points(mut self, points: usize) -> Self {
        self.snapshot_every_points = points.max(1);
        self
    }

    pub fn with_storage_dir(mut self, dir: &str) -> Self {
        self.storage_dir = dir.to_string();
        self
    }

    pub fn with_wake_log_file(mut self, file: &str) -> Self {
        self.wake_log_file = file.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sampling_hz(), 50);
        assert_eq!(config.window_seconds(), 60);
        assert_eq!(config.min_session_minutes(), 5.0);
        assert_eq!(config.default_goal_hours(), 8.0);
        assert_eq!(config.snapshot_every_points(), 5);
        assert_eq!(config.alarm_window_minutes(), 30);
        assert_eq!(config.alarm_fallback_interval_secs(), 60);
        assert_eq!(config.config_file(), "default");
    }

    #[test]
    fn test_buffer_sizes_follow_rate_and_window() {
        let config = Config::default();
        assert_eq!(config.window_sample_count(), 3000);
        assert_eq!(config.sample_buffer_capacity(), 6000);

        let small = Config::default().with_sampling(10, 6);
        assert_eq!(small.window_sample_count(), 60);
        assert_eq!(small.sample_buffer_capacity(), 120);
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[alarm]
window_minutes = 20
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline");

        assert_eq!(config.alarm_window_minutes(), 20);
        assert_eq!(config.alarm_fallback_interval_secs(), 60);
        assert_eq!(config.sampling_hz(), 50);
        assert_eq!(config.storage_dir(), "data/sessions");
    }

    #[test]
    fn test_zero_values_are_floored() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[sensor]
sampling_hz = 0

[analysis]
window_seconds = 0
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline");
        assert_eq!(config.sampling_hz(), 1);
        assert_eq!(config.window_seconds(), 1);
    }

    #[test]
    fn test_huge_values_are_capped() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[sensor]
sampling_hz = 4000000000
channel_capacity = 9223372036854775807

[analysis]
window_seconds = 9223372036854775807

[alarm]
window_minutes = 9223372036854775807
fallback_interval_secs = 9223372036854775807

[metrics]
interval_secs = 9223372036854775807
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline");
        assert_eq!(config.sampling_hz(), MAX_SAMPLING_HZ);
        assert_eq!(config.window_seconds(), MAX_WINDOW_SECONDS);
        assert_eq!(config.sample_buffer_capacity(), 500 * 600 * 2);
        assert_eq!(config.sample_channel_capacity(), MAX_CHANNEL_CAPACITY);
        assert_eq!(config.alarm_window(), chrono::Duration::minutes(24 * 60));
        assert_eq!(config.alarm_fallback_interval(), Duration::from_secs(86_400));
        assert_eq!(config.metrics_interval_secs(), 86_400);
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> =
            vec!["sleep-ledger".to_string(), "--config".to_string(), "config/night.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/night.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["sleep-ledger".to_string(), "--config=config/nap.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/nap.toml");
    }
}
