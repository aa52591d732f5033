//! Services - sleep tracking logic and session ownership
//!
//! This module contains the core services:
//! - `controller` - single owner of the active session (actor + handle)
//! - `classifier` - movement intensity and sleep stage per window
//! - `sample_buffer` - bounded rolling sample history
//! - `scorer` - quality score, stage minutes and sleep debt
//! - `alarm` - smart alarm state machine
//! - `persist_worker` - async store writes off the controller loop
//! - `history` - aggregates over past sessions

pub mod alarm;
pub mod classifier;
pub mod controller;
pub mod history;
pub mod persist_worker;
pub mod sample_buffer;
pub mod scorer;

// Re-export commonly used types
pub use alarm::{AlarmState, AlarmTrigger};
pub use classifier::StageClassifier;
pub use controller::{control_channel, SessionController, SessionHandle};
pub use history::HistorySummary;
pub use persist_worker::{create_persist_worker, PersistCmd, PersistQueue, PersistWorker};
