//! IO modules - external system interfaces
//!
//! This module contains the collaborators the core talks to:
//! - `sensor` - accelerometer sample feed (file or FIFO)
//! - `store` - session persistence (JSON files, in-memory)
//! - `delivery` - alarm delivery and audio traits
//! - `wake_log` - alarm delivery to a JSONL file
//! - `control` - line-oriented punch-in/out control surface

pub mod control;
pub mod delivery;
pub mod sensor;
pub mod store;
pub mod wake_log;

// Re-export commonly used types
pub use delivery::{AlarmDelivery, AudioSink, LogAudio, WakePayload, WakeReason};
pub use sensor::{LineSensor, SensorError, SensorHandle, SensorSource};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore, StoreError};
pub use wake_log::WakeEventLog;
