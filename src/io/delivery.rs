//! Side-effect sinks the core calls into: alarm delivery and audio
//!
//! Neither returns anything the core acts on. Implementations log their own
//! failures.

use crate::domain::types::{SessionId, SleepStage};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

/// Why a wake event is being delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeReason {
    /// Backup alarm scheduled at the hard target time
    Scheduled,
    /// Classifier reported light sleep or wakefulness inside the window
    LightSleep,
    /// Target time reached without a light-sleep window
    Deadline,
}

impl WakeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            WakeReason::Scheduled => "scheduled",
            WakeReason::LightSleep => "light_sleep",
            WakeReason::Deadline => "deadline",
        }
    }
}

/// Content handed to the alarm delivery collaborator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WakePayload {
    pub target_wake_time: DateTime<Utc>,
    pub reason: WakeReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<SleepStage>,
}

/// Delivers wake events to the user (notification, speaker, ...)
pub trait AlarmDelivery: Send + Sync {
    fn schedule_wake(&self, session_id: SessionId, fire_at: DateTime<Utc>, payload: &WakePayload);
    fn cancel_wake(&self, session_id: SessionId);
    fn fire_immediately(&self, session_id: SessionId, payload: &WakePayload);
}

/// Keep-alive audio and the alarm tone
pub trait AudioSink: Send + Sync {
    fn start_background_audio(&self);
    fn stop_background_audio(&self);
    fn play_alarm_tone(&self);
    fn stop_alarm_tone(&self);
}

/// Audio sink for headless hosts: records the calls in the log only
#[derive(Debug, Default)]
pub struct LogAudio;

impl AudioSink for LogAudio {
    fn start_background_audio(&self) {
        info!("background_audio_started");
    }

    fn stop_background_audio(&self) {
        info!("background_audio_stopped");
    }

    fn play_alarm_tone(&self) {
        info!("alarm_tone_playing");
    }

    fn stop_alarm_tone(&self) {
        info!("alarm_tone_stopped");
    }
}
