//! Domain models - core sleep tracking types
//!
//! This module contains the canonical data types used throughout the system:
//! - `SleepSession` - the persisted record of one punch-in/punch-out
//! - `MovementDataPoint` - one analysis window's movement summary
//! - `AccelerometerSample` - raw sensor reading
//! - `SleepStage` - coarse stage classification

pub mod session;
pub mod types;

pub use session::SleepSession;
pub use types::{AccelerometerSample, MovementDataPoint, SessionId, SleepStage};
