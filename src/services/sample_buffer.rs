//! Fixed-capacity rolling store of recent accelerometer samples

use crate::domain::types::AccelerometerSample;
use std::collections::VecDeque;

/// Insertion-ordered ring of samples. When full, the oldest sample is
/// dropped to make room, so `len() <= capacity()` always holds.
#[derive(Debug)]
pub struct SampleBuffer {
    samples: VecDeque<AccelerometerSample>,
    capacity: usize,
}

impl SampleBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { samples: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, sample: AccelerometerSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// The most recent `count` samples, oldest first
    pub fn recent(&self, count: usize) -> impl Iterator<Item = &AccelerometerSample> {
        let skip = self.samples.len().saturating_sub(count);
        self.samples.iter().skip(skip)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
