//! Lifecycle and timer handlers for the SessionController
//!
//! Handlers take `now` explicitly; the run loop passes the wall clock.

use super::{
    ControlError, Phase, PunchInReport, PunchInRequest, PunchOutReport, SessionController,
    StatusReport, TrackingStatus,
};
use crate::domain::session::SleepSession;
use crate::domain::types::AccelerometerSample;
use crate::io::delivery::WakeReason;
use crate::services::alarm::{AlarmFire, AlarmTrigger};
use crate::services::persist_worker::PersistFailure;
use crate::services::scorer;
use chrono::{DateTime, Utc};
use std::time::Instant;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::mpsc;
use tokio::time::{interval, interval_at, MissedTickBehavior};
use tracing::{debug, info, warn};

impl SessionController {
    /// Start a session. Refused while another session is active.
    pub fn punch_in(
        &mut self,
        request: PunchInRequest,
        now: DateTime<Utc>,
    ) -> Result<PunchInReport, ControlError> {
        if let Some(active) = &self.session {
            warn!(session_id = %active.id, "punch_in_rejected_already_active");
            return Err(ControlError::AlreadyActiveSession(active.id));
        }

        let goal_hours = request
            .goal_hours
            .filter(|g| g.is_finite() && *g > 0.0)
            .unwrap_or_else(|| self.config.default_goal_hours());
        let session = SleepSession::new(
            now,
            goal_hours,
            request.smart_alarm_enabled,
            request.target_wake_time,
        );
        let session_id = session.id;

        let tracking = self.start_tracking();
        self.arm_alarm(&session);
        self.audio.start_background_audio();

        info!(
            session_id = %session_id,
            goal_hours = %goal_hours,
            smart_alarm = %session.wants_smart_alarm(),
            target = ?session.target_wake_time,
            tracking = ?tracking,
            "session_started"
        );

        self.session = Some(session);
        self.phase = Phase::Active;
        self.points_since_snapshot = 0;
        self.request_snapshot();

        Ok(PunchInReport { session_id, tracking })
    }

    /// End the active session: stop ingestion and timers, settle the alarm,
    /// then score and save it or discard it if it was too short.
    pub fn punch_out(&mut self, now: DateTime<Utc>) -> Result<PunchOutReport, ControlError> {
        let Some(mut session) = self.session.take() else {
            warn!("punch_out_rejected_no_active_session");
            return Err(ControlError::NoActiveSession);
        };

        self.stop_tracking();
        if let Some(mut alarm) = self.alarm.take() {
            alarm.cancel();
        }
        self.audio.stop_alarm_tone();
        self.audio.stop_background_audio();
        self.phase = Phase::Ended;
        self.snapshot_dirty = false;

        let elapsed_minutes = session.elapsed_minutes(now);
        session.end(now);

        if elapsed_minutes < self.config.min_session_minutes() {
            if !self.persist.delete(session.id) {
                warn!(session_id = %session.id, "session_discard_not_queued");
                self.pending_deletes.push(session.id);
            }
            self.metrics.record_session_discarded();
            info!(
                session_id = %session.id,
                elapsed_minutes = format!("{:.1}", elapsed_minutes),
                min_minutes = %self.config.min_session_minutes(),
                "session_discarded"
            );
            return Ok(PunchOutReport::Discarded { id: session.id, elapsed_minutes });
        }

        scorer::apply_score(&mut session);
        if let Some(optimal) =
            scorer::find_optimal_wake_time(&session, self.config.alarm_window())
        {
            debug!(session_id = %session.id, optimal = %optimal, "optimal_wake_time");
        }

        self.metrics.record_session_saved();
        if !self.persist.save(&session) {
            warn!(session_id = %session.id, "session_final_save_deferred");
            self.unsaved_finals.push(session.clone());
        }

        info!(
            session_id = %session.id,
            duration_hours = format!("{:.2}", session.duration_hours().unwrap_or(0.0)),
            points = session.movement_data.len(),
            quality = ?session.sleep_quality_score,
            debt_hours = ?session.sleep_debt_hours,
            woke_at = ?session.actual_wake_time,
            "session_saved"
        );

        Ok(PunchOutReport::Saved { session: Box::new(session) })
    }

    pub fn status(&self) -> StatusReport {
        let latest = self.session.as_ref().and_then(|s| s.latest_point());
        StatusReport {
            phase: self.phase,
            session_id: self.session.as_ref().map(|s| s.id),
            start_time: self.session.as_ref().map(|s| s.start_time),
            points: self.session.as_ref().map_or(0, |s| s.movement_data.len()),
            latest_intensity: latest.map(|p| p.intensity),
            latest_stage: latest.map(|p| p.stage()),
            alarm: self.alarm_state(),
            tracking: self.is_tracking(),
        }
    }

    /// Fold one sensor sample into the rolling buffer
    pub fn handle_sample(&mut self, sample: AccelerometerSample) {
        if self.session.is_none() {
            return;
        }
        self.classifier.observe(sample);
        self.metrics.record_sample();
    }

    /// Close one analysis window: append its movement point and feed the alarm
    pub fn handle_analysis_tick(&mut self, now: DateTime<Utc>) {
        self.retry_pending_writes();
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let classify_start = Instant::now();
        let classification = self.classifier.classify_window(now);
        self.metrics.record_window_classified(classify_start.elapsed().as_micros() as u64);

        if !session.append_point(classification.point) {
            warn!(session_id = %session.id, at = %now, "movement_point_rejected");
            return;
        }

        debug!(
            session_id = %session.id,
            intensity = format!("{:.3}", classification.point.intensity),
            stage = %classification.stage,
            samples = classification.sample_count,
            points = session.movement_data.len(),
            "window_classified"
        );

        self.points_since_snapshot += 1;

        let fire = self.alarm.as_mut().and_then(|alarm| alarm.on_stage(classification.stage, now));
        if let Some(fire) = fire {
            self.on_alarm_fired(fire);
        } else if self.points_since_snapshot >= self.config.snapshot_every_points()
            || self.snapshot_dirty
        {
            self.request_snapshot();
        }
    }

    /// Time-based alarm check, independent of the classifier cadence
    pub fn handle_fallback_tick(&mut self, now: DateTime<Utc>) {
        self.retry_pending_writes();
        let fire = self.alarm.as_mut().and_then(|alarm| alarm.check_deadline(now));
        if let Some(fire) = fire {
            self.on_alarm_fired(fire);
        } else if self.snapshot_dirty {
            self.request_snapshot();
        }

        if self.alarm.as_ref().map_or(true, |a| a.state().is_terminal()) {
            self.fallback_timer = None;
        }
    }

    /// Sensor task ended on its own (feed closed or read error)
    pub(crate) fn handle_sensor_closed(&mut self) {
        warn!(
            session_id = ?self.session.as_ref().map(|s| s.id),
            "sensor_feed_ended"
        );
        self.sample_rx = None;
        self.sensor_handle = None;
    }

    /// Adopt a session found active in storage after a restart
    pub(crate) fn adopt(&mut self, session: SleepSession) {
        let tracking = self.start_tracking();

        match (session.wants_smart_alarm(), session.target_wake_time, session.actual_wake_time) {
            (true, Some(target), Some(woke_at)) => {
                self.alarm = Some(AlarmTrigger::already_triggered(
                    session.id,
                    target,
                    self.config.alarm_window(),
                    woke_at,
                    self.delivery.clone(),
                ));
            }
            _ => self.arm_alarm(&session),
        }
        self.audio.start_background_audio();

        info!(
            session_id = %session.id,
            started = %session.start_time,
            points = session.movement_data.len(),
            alarm = ?self.alarm_state(),
            tracking = ?tracking,
            "session_recovered"
        );

        self.session = Some(session);
        self.phase = Phase::Active;
        self.points_since_snapshot = 0;
    }

    /// Command channel closed: stop ingestion and leave the session active
    /// in storage so the next start recovers it.
    pub(crate) fn shutdown(&mut self) {
        self.stop_tracking();
        self.request_snapshot();
        if let Some(session) = &self.session {
            info!(session_id = %session.id, "session_left_active_for_recovery");
        }
    }

    fn start_tracking(&mut self) -> TrackingStatus {
        let (tx, rx) = mpsc::channel(self.config.sample_channel_capacity());
        match self.sensor.start(tx) {
            Ok(handle) => {
                self.classifier.reset();
                self.sensor_handle = Some(handle);
                self.sample_rx = Some(rx);

                let period = self.config.window_duration();
                let mut timer = interval_at(tokio::time::Instant::now() + period, period);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.analysis_timer = Some(timer);
                TrackingStatus::Started
            }
            Err(e) => {
                warn!(error = %e, "tracking_not_started");
                TrackingStatus::SensorUnavailable(e.to_string())
            }
        }
    }

    fn stop_tracking(&mut self) {
        if let Some(mut handle) = self.sensor_handle.take() {
            handle.stop();
        }
        self.sample_rx = None;
        self.analysis_timer = None;
        self.fallback_timer = None;
        self.classifier.reset();
    }

    fn arm_alarm(&mut self, session: &SleepSession) {
        let (true, Some(target)) = (session.smart_alarm_enabled, session.target_wake_time) else {
            return;
        };
        self.alarm = Some(AlarmTrigger::new(
            session.id,
            target,
            self.config.alarm_window(),
            self.delivery.clone(),
        ));

        let mut timer = interval(self.config.alarm_fallback_interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.fallback_timer = Some(timer);
    }

    fn on_alarm_fired(&mut self, fire: AlarmFire) {
        if let Some(session) = self.session.as_mut() {
            session.record_wake(fire.fired_at);
        }
        self.audio.play_alarm_tone();
        self.metrics.record_alarm_fired(fire.reason == WakeReason::Deadline);
        self.fallback_timer = None;
        // Persist the wake time now so a restart does not fire again
        self.request_snapshot();
    }

    fn request_snapshot(&mut self) {
        self.retry_pending_writes();
        let Some(session) = &self.session else {
            return;
        };
        if self.persist.save(session) {
            self.points_since_snapshot = 0;
            self.snapshot_dirty = false;
        } else {
            self.snapshot_dirty = true;
            warn!(session_id = %session.id, "snapshot_deferred");
        }
    }

    /// Record one report from the persistence worker
    pub(crate) fn handle_persist_report(&mut self, report: Result<PersistFailure, RecvError>) {
        match report {
            Ok(PersistFailure::Save(record)) => self.on_save_failed(*record),
            Ok(PersistFailure::Delete(id)) => {
                warn!(session_id = %id, "session_discard_failed_will_retry");
                if !self.pending_deletes.contains(&id) {
                    self.pending_deletes.push(id);
                }
            }
            Err(RecvError::Lagged(missed)) => {
                // Lost reports may include our own snapshot
                warn!(missed = %missed, "persist_failure_reports_lost");
                self.snapshot_dirty = self.session.is_some();
            }
            Err(RecvError::Closed) => {
                self.persist_failures = None;
            }
        }
    }

    fn on_save_failed(&mut self, record: SleepSession) {
        if record.is_active {
            // Snapshots of a session that has since ended are superseded by its final record
            if self.session.as_ref().is_some_and(|s| s.id == record.id) {
                self.snapshot_dirty = true;
            }
            return;
        }
        warn!(session_id = %record.id, "session_final_save_failed_will_retry");
        self.unsaved_finals.retain(|s| s.id != record.id);
        self.unsaved_finals.push(record);
    }

    /// Apply reports already received, without waiting
    fn drain_persist_failures(&mut self) {
        loop {
            let Some(rx) = self.persist_failures.as_mut() else {
                return;
            };
            let report = match rx.try_recv() {
                Ok(failure) => Ok(failure),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Lagged(missed)) => Err(RecvError::Lagged(missed)),
                Err(TryRecvError::Closed) => Err(RecvError::Closed),
            };
            self.handle_persist_report(report);
        }
    }

    /// Re-queue finished records and removals the store has not confirmed.
    /// Runs before any snapshot so an ended session is closed in the store
    /// before the next one claims the active slot.
    fn retry_pending_writes(&mut self) {
        self.drain_persist_failures();

        let persist = &self.persist;
        self.pending_deletes.retain(|id| {
            let queued = persist.delete(*id);
            if queued {
                info!(session_id = %id, "deferred_discard_queued");
            }
            !queued
        });

        for record in std::mem::take(&mut self.unsaved_finals) {
            if self.persist.save(&record) {
                info!(session_id = %record.id, "deferred_final_save_queued");
            } else {
                self.unsaved_finals.push(record);
            }
        }
    }
}
