//! Movement intensity and sleep stage classification
//!
//! Each analysis window reduces the most recent `window_seconds` of samples
//! to one intensity value: the population standard deviation of the
//! acceleration magnitude, normalized against an empirical ceiling and
//! saturated at 1.0.

use crate::domain::types::{AccelerometerSample, MovementDataPoint, SleepStage};
use crate::infra::config::Config;
use crate::services::sample_buffer::SampleBuffer;
use chrono::{DateTime, Utc};

/// Magnitude standard deviation (m/s²) that maps to full intensity
pub const INTENSITY_CEILING: f64 = 0.15;

/// Output of one analysis window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub point: MovementDataPoint,
    pub stage: SleepStage,
    /// Samples that contributed to this window
    pub sample_count: usize,
}

/// Rolling sample store plus the window reduction
#[derive(Debug)]
pub struct StageClassifier {
    buffer: SampleBuffer,
    window_samples: usize,
    window_minutes: f64,
}

impl StageClassifier {
    pub fn new(config: &Config) -> Self {
        Self {
            buffer: SampleBuffer::new(config.sample_buffer_capacity()),
            window_samples: config.window_sample_count().max(1),
            window_minutes: config.window_seconds() as f64 / 60.0,
        }
    }

    /// Fold one sample into the rolling buffer
    pub fn observe(&mut self, sample: AccelerometerSample) {
        self.buffer.push(sample);
    }

    /// Reduce the current window to a movement point stamped at `now`.
    /// An empty window means no motion was observed: intensity 0.0, deep.
    pub fn classify_window(&self, now: DateTime<Utc>) -> Classification {
        let sample_count = self.buffer.len().min(self.window_samples);
        let intensity = movement_intensity(self.buffer.recent(self.window_samples));
        let point = MovementDataPoint::new(now, intensity, self.window_minutes);
        Classification { point, stage: SleepStage::from_intensity(intensity), sample_count }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }
}

/// Normalized standard deviation of acceleration magnitude, in [0,1]
pub fn movement_intensity<'a, I>(samples: I) -> f64
where
    I: IntoIterator<Item = &'a AccelerometerSample>,
{
    let magnitudes: Vec<f64> = samples.into_iter().map(|s| s.magnitude()).collect();
    if magnitudes.is_empty() {
        return 0.0;
    }

    let n = magnitudes.len() as f64;
    let mean = magnitudes.iter().sum::<f64>() / n;
    let variance = magnitudes.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / n;

    (variance.sqrt() / INTENSITY_CEILING).min(1.0)
}
