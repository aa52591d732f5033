//! Session ownership and lifecycle orchestration
//!
//! The SessionController is the single owner of the active sleep session.
//! One task selects over:
//! - control commands (punch-in, punch-out, status)
//! - the per-session sample channel fed by the sensor
//! - the analysis timer (one movement point per window)
//! - the alarm fallback timer (hard deadline check)
//! - failure reports from the persistence worker
//!
//! Every mutation of the session happens inside that task. The sample
//! channel is created at punch-in and dropped at punch-out, so nothing
//! delivered after punch-out can reach a closed session.

mod handlers;

use crate::domain::session::SleepSession;
use crate::domain::types::{AccelerometerSample, SessionId, SleepStage};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::delivery::{AlarmDelivery, AudioSink};
use crate::io::sensor::{SensorHandle, SensorSource};
use crate::io::store::SessionStore;
use crate::services::alarm::{AlarmState, AlarmTrigger};
use crate::services::classifier::StageClassifier;
use crate::services::persist_worker::{PersistFailure, PersistQueue};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Interval;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    NoSession,
    Active,
    Ended,
}

#[derive(Debug, Error, PartialEq)]
pub enum ControlError {
    #[error("session {0} is already active")]
    AlreadyActiveSession(SessionId),
    #[error("no active session")]
    NoActiveSession,
    #[error("session controller has stopped")]
    ControllerStopped,
}

/// Parameters of a punch-in
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PunchInRequest {
    /// Falls back to the configured default when absent or not positive
    pub goal_hours: Option<f64>,
    pub smart_alarm_enabled: bool,
    pub target_wake_time: Option<DateTime<Utc>>,
}

impl PunchInRequest {
    pub fn new(goal_hours: Option<f64>) -> Self {
        Self { goal_hours, ..Self::default() }
    }

    /// Enable the smart alarm for `target`
    pub fn with_alarm(mut self, target: DateTime<Utc>) -> Self {
        self.smart_alarm_enabled = true;
        self.target_wake_time = Some(target);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum TrackingStatus {
    Started,
    /// Session runs without motion data and scores on duration alone
    SensorUnavailable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PunchInReport {
    pub session_id: SessionId,
    pub tracking: TrackingStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PunchOutReport {
    Saved { session: Box<SleepSession> },
    /// Shorter than the minimum session length; removed from storage
    Discarded { id: SessionId, elapsed_minutes: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    pub points: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_intensity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_stage: Option<SleepStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alarm: Option<AlarmState>,
    pub tracking: bool,
}

/// Commands accepted by the controller task
#[derive(Debug)]
pub enum ControlCommand {
    PunchIn {
        request: PunchInRequest,
        reply: oneshot::Sender<Result<PunchInReport, ControlError>>,
    },
    PunchOut {
        reply: oneshot::Sender<Result<PunchOutReport, ControlError>>,
    },
    Status {
        reply: oneshot::Sender<StatusReport>,
    },
}

/// Cloneable front door to a running controller
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<ControlCommand>,
}

impl SessionHandle {
    pub async fn punch_in(&self, request: PunchInRequest) -> Result<PunchInReport, ControlError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlCommand::PunchIn { request, reply }).await?;
        rx.await.map_err(|_| ControlError::ControllerStopped)?
    }

    pub async fn punch_out(&self) -> Result<PunchOutReport, ControlError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlCommand::PunchOut { reply }).await?;
        rx.await.map_err(|_| ControlError::ControllerStopped)?
    }

    pub async fn status(&self) -> Result<StatusReport, ControlError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlCommand::Status { reply }).await?;
        rx.await.map_err(|_| ControlError::ControllerStopped)
    }

    async fn send(&self, cmd: ControlCommand) -> Result<(), ControlError> {
        self.tx.send(cmd).await.map_err(|_| ControlError::ControllerStopped)
    }
}

/// Create the command channel: the handle for callers, the receiver for `run`
pub fn control_channel(buffer_size: usize) -> (SessionHandle, mpsc::Receiver<ControlCommand>) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    (SessionHandle { tx }, rx)
}

/// Single owner of the active sleep session
pub struct SessionController {
    pub(crate) config: Config,
    pub(crate) phase: Phase,
    /// The active session, if any
    pub(crate) session: Option<SleepSession>,
    pub(crate) classifier: StageClassifier,
    pub(crate) alarm: Option<AlarmTrigger>,
    pub(crate) sensor: Arc<dyn SensorSource>,
    pub(crate) sensor_handle: Option<SensorHandle>,
    /// Per-session sample channel; `None` when not tracking
    pub(crate) sample_rx: Option<mpsc::Receiver<AccelerometerSample>>,
    pub(crate) analysis_timer: Option<Interval>,
    pub(crate) fallback_timer: Option<Interval>,
    pub(crate) persist: PersistQueue,
    pub(crate) delivery: Arc<dyn AlarmDelivery>,
    pub(crate) audio: Arc<dyn AudioSink>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) points_since_snapshot: usize,
    /// Last snapshot could not be queued; retried on the next tick
    pub(crate) snapshot_dirty: bool,
    /// Finished sessions not yet confirmed in the store; retried before
    /// every snapshot until the worker stops reporting them
    pub(crate) unsaved_finals: Vec<SleepSession>,
    /// Discarded sessions whose record removal failed or was not queued
    pub(crate) pending_deletes: Vec<SessionId>,
    pub(crate) persist_failures: Option<broadcast::Receiver<PersistFailure>>,
}

impl SessionController {
    /// Build the controller and adopt any session left active in `store`.
    ///
    /// Must be called inside a tokio runtime: a recovered session restarts
    /// ingestion and its timers immediately.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        store: &dyn SessionStore,
        persist: PersistQueue,
        sensor: Arc<dyn SensorSource>,
        delivery: Arc<dyn AlarmDelivery>,
        audio: Arc<dyn AudioSink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let classifier = StageClassifier::new(&config);
        let persist_failures = Some(persist.failures());
        let mut controller = Self {
            config,
            phase: Phase::NoSession,
            session: None,
            classifier,
            alarm: None,
            sensor,
            sensor_handle: None,
            sample_rx: None,
            analysis_timer: None,
            fallback_timer: None,
            persist,
            delivery,
            audio,
            metrics,
            points_since_snapshot: 0,
            snapshot_dirty: false,
            unsaved_finals: Vec::new(),
            pending_deletes: Vec::new(),
            persist_failures,
        };

        match store.fetch_active() {
            Ok(Some(session)) => controller.adopt(session),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "session_recovery_failed"),
        }

        controller
    }

    /// Process commands, samples and timer ticks until the command channel closes
    pub async fn run(mut self, mut cmd_rx: mpsc::Receiver<ControlCommand>) {
        info!(phase = ?self.phase, "session_controller_started");

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => break,
                    }
                }
                sample = next_sample(&mut self.sample_rx) => {
                    match sample {
                        Some(sample) => self.handle_sample(sample),
                        None => self.handle_sensor_closed(),
                    }
                }
                _ = next_tick(&mut self.analysis_timer) => {
                    self.handle_analysis_tick(Utc::now());
                }
                _ = next_tick(&mut self.fallback_timer) => {
                    self.handle_fallback_tick(Utc::now());
                }
                report = next_failure(&mut self.persist_failures) => {
                    self.handle_persist_report(report);
                }
            }
        }

        self.shutdown();
        info!("session_controller_stopped");
    }

    /// Dispatch one control command and reply to the caller
    pub(crate) fn handle_command(&mut self, cmd: ControlCommand) {
        let now = Utc::now();
        match cmd {
            ControlCommand::PunchIn { request, reply } => {
                let _ = reply.send(self.punch_in(request, now));
            }
            ControlCommand::PunchOut { reply } => {
                let _ = reply.send(self.punch_out(now));
            }
            ControlCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn active_session(&self) -> Option<&SleepSession> {
        self.session.as_ref()
    }

    pub fn alarm_state(&self) -> Option<AlarmState> {
        self.alarm.as_ref().map(|a| a.state())
    }

    pub fn is_tracking(&self) -> bool {
        self.sample_rx.is_some()
    }
}

async fn next_sample(
    rx: &mut Option<mpsc::Receiver<AccelerometerSample>>,
) -> Option<AccelerometerSample> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_failure(
    rx: &mut Option<broadcast::Receiver<PersistFailure>>,
) -> Result<PersistFailure, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
