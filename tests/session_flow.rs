//! End-to-end session lifecycle against the file store
//!
//! Drives the controller through its public handlers with explicit clock
//! values and checks what lands on disk and in the wake log.

use chrono::{DateTime, Duration, TimeZone, Utc};
use sleep_ledger::infra::{Config, Metrics};
use sleep_ledger::io::{FileSessionStore, LineSensor, LogAudio, SessionStore, WakeEventLog};
use sleep_ledger::services::controller::{Phase, PunchInRequest, PunchOutReport, TrackingStatus};
use sleep_ledger::services::{create_persist_worker, AlarmState, PersistQueue, SessionController};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 12, 22, 30, 0).unwrap()
}

/// Controller wired to a file store in `dir`, without a motion sensor
fn start(dir: &Path) -> (SessionController, PersistQueue, Arc<Metrics>) {
    let config = Config::default().with_sensor_enabled(false);
    let metrics = Arc::new(Metrics::new());
    let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::open(dir.join("sessions")).unwrap());
    let (persist, worker) = create_persist_worker(store.clone(), metrics.clone(), 16);
    tokio::spawn(worker.run());

    let sensor = Arc::new(LineSensor::new(&config, metrics.clone()));
    let wake_log = dir.join("wake.jsonl");
    let delivery = Arc::new(WakeEventLog::new(wake_log.to_str().unwrap()));

    let controller = SessionController::new(
        config,
        store.as_ref(),
        persist.clone(),
        sensor,
        delivery,
        Arc::new(LogAudio),
        metrics.clone(),
    );
    (controller, persist, metrics)
}

fn reopen(dir: &Path) -> FileSessionStore {
    FileSessionStore::open(dir.join("sessions")).unwrap()
}

fn wake_log_kinds(dir: &Path) -> Vec<String> {
    let content = std::fs::read_to_string(dir.join("wake.jsonl")).unwrap_or_default();
    content
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            value["t"].as_str().unwrap().to_string()
        })
        .collect()
}

#[tokio::test]
async fn test_short_session_leaves_nothing_on_disk() {
    let dir = tempdir().unwrap();
    let (mut controller, persist, metrics) = start(dir.path());

    let report = controller.punch_in(PunchInRequest::new(None), t0()).unwrap();
    assert!(matches!(report.tracking, TrackingStatus::SensorUnavailable(_)));
    persist.flush().await;
    assert!(reopen(dir.path()).fetch_active().unwrap().is_some());

    let out = controller.punch_out(t0() + Duration::minutes(3)).unwrap();
    assert!(matches!(out, PunchOutReport::Discarded { .. }));
    persist.flush().await;

    let store = reopen(dir.path());
    assert!(store.fetch_active().unwrap().is_none());
    assert!(store.fetch_since(t0() - Duration::days(1)).unwrap().is_empty());
    assert_eq!(metrics.report().sessions_discarded, 1);
}

#[tokio::test]
async fn test_session_survives_restart_and_scores_on_duration() {
    let dir = tempdir().unwrap();

    let session_id = {
        let (mut controller, persist, _) = start(dir.path());
        let report = controller.punch_in(PunchInRequest::new(Some(7.5)), t0()).unwrap();
        persist.flush().await;
        report.session_id
    };

    // Restart: the active record is adopted as-is
    let (mut controller, persist, _) = start(dir.path());
    assert_eq!(controller.phase(), Phase::Active);
    let recovered = controller.active_session().unwrap();
    assert_eq!(recovered.id, session_id);
    assert_eq!(recovered.sleep_goal_hours, 7.5);

    let out = controller.punch_out(t0() + Duration::hours(8)).unwrap();
    let PunchOutReport::Saved { session } = out else {
        panic!("expected a saved session");
    };
    assert!((session.sleep_quality_score.unwrap() - 95.0).abs() < 1e-9);
    assert_eq!(session.sleep_debt_hours, Some(0.5));
    persist.flush().await;

    let store = reopen(dir.path());
    assert!(store.fetch_active().unwrap().is_none());
    let saved = store.fetch_since(t0() - Duration::days(1)).unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].id, session_id);
    assert!(!saved[0].is_active);
    assert_eq!(saved[0].end_time, Some(t0() + Duration::hours(8)));

    // A fresh session is accepted once the old one is closed
    controller.punch_in(PunchInRequest::new(None), t0() + Duration::hours(20)).unwrap();
}

#[tokio::test]
async fn test_deadline_alarm_is_logged_and_recorded() {
    let dir = tempdir().unwrap();
    let (mut controller, persist, _) = start(dir.path());
    let target = t0() + Duration::hours(8);

    controller.punch_in(PunchInRequest::new(None).with_alarm(target), t0()).unwrap();
    assert_eq!(controller.alarm_state(), Some(AlarmState::Idle));

    // No motion data: only the fallback deadline can wake the user
    controller.handle_fallback_tick(target - Duration::minutes(10));
    assert_eq!(controller.alarm_state(), Some(AlarmState::Armed));
    controller.handle_fallback_tick(target);
    assert_eq!(controller.alarm_state(), Some(AlarmState::Triggered));
    assert_eq!(controller.active_session().unwrap().actual_wake_time, Some(target));

    let out = controller.punch_out(target + Duration::minutes(5)).unwrap();
    assert!(matches!(out, PunchOutReport::Saved { .. }));
    persist.flush().await;

    assert_eq!(wake_log_kinds(dir.path()), vec!["schedule", "fire", "cancel"]);
    let saved = reopen(dir.path()).fetch_since(t0()).unwrap();
    assert_eq!(saved[0].actual_wake_time, Some(target));
}
