//! Smart alarm state machine
//!
//! ```text
//! Idle --(now >= target - window)--> Armed --(light/awake stage)--> Triggered
//!   |                                  |
//!   +------(now >= target, fallback)---+-----------------------------> Triggered
//!   |                                  |
//!   +----------(session ends)----------+-----------------------------> Cancelled
//! ```
//!
//! `Triggered` and `Cancelled` are terminal, so a session can fire at most once.

use crate::domain::types::{SessionId, SleepStage};
use crate::io::delivery::{AlarmDelivery, WakePayload, WakeReason};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    Idle,
    Armed,
    Triggered,
    Cancelled,
}

impl AlarmState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AlarmState::Triggered | AlarmState::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmState::Idle => "idle",
            AlarmState::Armed => "armed",
            AlarmState::Triggered => "triggered",
            AlarmState::Cancelled => "cancelled",
        }
    }
}

/// Emitted exactly once, on the transition into `Triggered`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlarmFire {
    pub session_id: SessionId,
    pub fired_at: DateTime<Utc>,
    pub reason: WakeReason,
    pub stage: Option<SleepStage>,
}

/// One smart alarm, scoped to one session
pub struct AlarmTrigger {
    session_id: SessionId,
    target: DateTime<Utc>,
    window: Duration,
    state: AlarmState,
    fired_at: Option<DateTime<Utc>>,
    delivery: Arc<dyn AlarmDelivery>,
}

impl AlarmTrigger {
    /// Create an idle alarm and schedule the hard backup wake at `target`
    pub fn new(
        session_id: SessionId,
        target: DateTime<Utc>,
        window: Duration,
        delivery: Arc<dyn AlarmDelivery>,
    ) -> Self {
        let trigger =
            Self { session_id, target, window, state: AlarmState::Idle, fired_at: None, delivery };
        trigger.delivery.schedule_wake(
            session_id,
            target,
            &WakePayload { target_wake_time: target, reason: WakeReason::Scheduled, stage: None },
        );
        info!(
            session_id = %session_id,
            target = %target,
            window_minutes = window.num_minutes(),
            "alarm_scheduled"
        );
        trigger
    }

    /// Rebuild an alarm that already fired before a restart. Nothing is
    /// delivered and no further transition is possible.
    pub fn already_triggered(
        session_id: SessionId,
        target: DateTime<Utc>,
        window: Duration,
        fired_at: DateTime<Utc>,
        delivery: Arc<dyn AlarmDelivery>,
    ) -> Self {
        Self {
            session_id,
            target,
            window,
            state: AlarmState::Triggered,
            fired_at: Some(fired_at),
            delivery,
        }
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn target(&self) -> DateTime<Utc> {
        self.target
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.target - self.window
    }

    pub fn fired_at(&self) -> Option<DateTime<Utc>> {
        self.fired_at
    }

    /// Idle -> Armed once the pre-wake window has opened
    pub fn arm_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.state == AlarmState::Idle && now >= self.window_start() {
            self.state = AlarmState::Armed;
            info!(session_id = %self.session_id, at = %now, "alarm_armed");
            return true;
        }
        false
    }

    /// Feed the latest classified stage. Fires when armed and the sleeper is
    /// in light sleep or awake.
    pub fn on_stage(&mut self, stage: SleepStage, now: DateTime<Utc>) -> Option<AlarmFire> {
        self.arm_if_due(now);
        if self.state != AlarmState::Armed {
            return None;
        }
        if !stage.is_wakeable() {
            debug!(session_id = %self.session_id, stage = %stage, "alarm_waiting_for_light_sleep");
            return None;
        }
        Some(self.fire(now, WakeReason::LightSleep, Some(stage)))
    }

    /// Periodic time-based check: fires unconditionally once the target time
    /// is reached and the alarm has not fired or been cancelled.
    pub fn check_deadline(&mut self, now: DateTime<Utc>) -> Option<AlarmFire> {
        self.arm_if_due(now);
        if self.state.is_terminal() || now < self.target {
            return None;
        }
        Some(self.fire(now, WakeReason::Deadline, None))
    }

    /// Session ended before the alarm fired. Returns false if already terminal.
    pub fn cancel(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = AlarmState::Cancelled;
        self.delivery.cancel_wake(self.session_id);
        info!(session_id = %self.session_id, "alarm_cancelled");
        true
    }

    fn fire(
        &mut self,
        now: DateTime<Utc>,
        reason: WakeReason,
        stage: Option<SleepStage>,
    ) -> AlarmFire {
        self.state = AlarmState::Triggered;
        self.fired_at = Some(now);

        let payload = WakePayload { target_wake_time: self.target, reason, stage };
        self.delivery.fire_immediately(self.session_id, &payload);
        // The backup scheduled at the target is no longer needed
        self.delivery.cancel_wake(self.session_id);

        info!(
            session_id = %self.session_id,
            reason = %reason.as_str(),
            fired_at = %now,
            early_minutes = (self.target - now).num_minutes(),
            "alarm_triggered"
        );

        AlarmFire { session_id: self.session_id, fired_at: now, reason, stage }
    }
}
