//! Shared types for sleep tracking

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Newtype wrapper for session IDs (UUIDv7, time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One raw triaxial accelerometer reading (m/s²)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelerometerSample {
    pub timestamp: DateTime<Utc>,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AccelerometerSample {
    pub fn new(timestamp: DateTime<Utc>, x: f64, y: f64, z: f64) -> Self {
        Self { timestamp, x, y, z }
    }

    #[inline]
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Intensity at or above which a window counts as light sleep
pub const LIGHT_SLEEP_THRESHOLD: f64 = 0.3;
/// Intensity at or above which a window counts as awake
pub const AWAKE_THRESHOLD: f64 = 0.7;

/// Coarse sleep stage derived from movement intensity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepStage {
    Deep,
    Light,
    Awake,
}

impl SleepStage {
    /// Classify an intensity in [0,1]. Boundaries belong to the calmer stage
    /// below them: 0.3 is light, 0.7 is awake.
    pub fn from_intensity(intensity: f64) -> Self {
        if intensity < LIGHT_SLEEP_THRESHOLD {
            SleepStage::Deep
        } else if intensity < AWAKE_THRESHOLD {
            SleepStage::Light
        } else {
            SleepStage::Awake
        }
    }

    /// Light sleep or wakefulness: a good moment for a gentle alarm
    pub fn is_wakeable(&self) -> bool {
        matches!(self, SleepStage::Light | SleepStage::Awake)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SleepStage::Deep => "deep",
            SleepStage::Light => "light",
            SleepStage::Awake => "awake",
        }
    }
}

impl std::fmt::Display for SleepStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Movement summary of one analysis window. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementDataPoint {
    pub timestamp: DateTime<Utc>,
    /// Normalized restlessness in [0,1]
    pub intensity: f64,
    /// Span of time this point represents
    pub duration_minutes: f64,
}

impl MovementDataPoint {
    pub fn new(timestamp: DateTime<Utc>, intensity: f64, duration_minutes: f64) -> Self {
        Self { timestamp, intensity: intensity.clamp(0.0, 1.0), duration_minutes }
    }

    pub fn stage(&self) -> SleepStage {
        SleepStage::from_intensity(self.intensity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_thresholds_are_inclusive_exclusive() {
        assert_eq!(SleepStage::from_intensity(0.0), SleepStage::Deep);
        assert_eq!(SleepStage::from_intensity(0.2999), SleepStage::Deep);
        assert_eq!(SleepStage::from_intensity(0.3), SleepStage::Light);
        assert_eq!(SleepStage::from_intensity(0.6999), SleepStage::Light);
        assert_eq!(SleepStage::from_intensity(0.7), SleepStage::Awake);
        assert_eq!(SleepStage::from_intensity(1.0), SleepStage::Awake);
    }

    #[test]
    fn test_wakeable_stages() {
        assert!(!SleepStage::Deep.is_wakeable());
        assert!(SleepStage::Light.is_wakeable());
        assert!(SleepStage::Awake.is_wakeable());
    }

    #[test]
    fn test_sample_magnitude() {
        let sample = AccelerometerSample::new(Utc::now(), 3.0, 4.0, 0.0);
        assert!((sample.magnitude() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_point_intensity_is_clamped() {
        let point = MovementDataPoint::new(Utc::now(), 1.7, 1.0);
        assert_eq!(point.intensity, 1.0);
        assert_eq!(point.stage(), SleepStage::Awake);
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert_eq!(a.0.get_version_num(), 7);
    }
}
