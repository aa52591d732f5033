//! # Property-Based Tests
//!
//! Scoring invariants and record round-trips over generated inputs.

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::collection::vec;
use proptest::option;
use proptest::prelude::*;
use sleep_ledger::domain::{MovementDataPoint, SleepSession};
use sleep_ledger::services::scorer::{duration_penalty, score, sleep_debt_hours};

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 22, 0, 0).unwrap()
}

/// Values with a short exact decimal form, so JSON text round-trips bit for bit
fn quarter_hours() -> impl Strategy<Value = f64> {
    (1u32..=64).prop_map(|q| q as f64 / 4.0)
}

fn intensity() -> impl Strategy<Value = f64> {
    (0u32..=1000).prop_map(|v| v as f64 / 1000.0)
}

fn movement() -> impl Strategy<Value = Vec<MovementDataPoint>> {
    vec((intensity(), 0u32..=4), 0..120).prop_map(|raw| {
        raw.into_iter()
            .enumerate()
            .map(|(i, (intensity, minutes))| {
                MovementDataPoint::new(base() + Duration::minutes(i as i64), intensity, minutes as f64)
            })
            .collect()
    })
}

fn session() -> impl Strategy<Value = SleepSession> {
    (
        0i64..86_400,
        option::of(1i64..50_000),
        movement(),
        quarter_hours(),
        any::<bool>(),
        option::of(0i64..50_000),
        option::of(0i64..50_000),
        option::of((0u32..=400).prop_map(|v| v as f64 / 4.0)),
        option::of("[a-z ]{0,24}"),
        vec("[a-z]{1,8}", 0..3),
    )
        .prop_map(
            |(start, end, movement, goal, alarm, target, woke, quality, notes, tags)| {
                let start_time = base() + Duration::seconds(start);
                let mut session = SleepSession::new(
                    start_time,
                    goal,
                    alarm,
                    target.map(|t| start_time + Duration::seconds(t)),
                );
                session.movement_data = movement;
                session.actual_wake_time = woke.map(|w| start_time + Duration::seconds(w));
                if let Some(end) = end {
                    session.end(start_time + Duration::seconds(end));
                    session.sleep_quality_score = quality;
                    session.light_sleep_minutes = quality.map(|q| q / 2.0);
                    session.deep_sleep_minutes = quality.map(|q| q / 4.0);
                    session.sleep_debt_hours = quality.map(|q| q / 8.0 - 6.0);
                }
                session.notes = notes;
                session.tags = tags;
                session
            },
        )
}

#[test]
fn duration_penalty_is_continuous_at_breakpoints() {
    for h in [1.0, 3.0, 5.0, 7.0, 11.0] {
        let left = duration_penalty(h - 1e-9);
        let right = duration_penalty(h + 1e-9);
        assert!((left - right).abs() < 1e-6, "step at {h}h: {left} vs {right}");
    }
}

#[test]
fn duration_penalty_steps_down_at_nine_hours() {
    let left = duration_penalty(9.0 - 1e-9);
    let right = duration_penalty(9.0 + 1e-9);
    assert!((left - 1.0).abs() < 1e-6);
    assert!((right - 0.9).abs() < 1e-6);
}

proptest! {
    /// The duration weight stays inside [0,1].
    #[test]
    fn duration_penalty_is_bounded(hours in 0.0f64..48.0) {
        let p = duration_penalty(hours);
        prop_assert!((0.0..=1.0).contains(&p));
    }

    /// Rising below 9 hours, falling from 9 hours on.
    #[test]
    fn duration_penalty_is_inverted_u(a in 0.0f64..48.0, b in 0.0f64..48.0) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        if hi < 9.0 {
            prop_assert!(duration_penalty(lo) <= duration_penalty(hi) + 1e-12);
        } else if lo >= 9.0 {
            prop_assert!(duration_penalty(lo) + 1e-12 >= duration_penalty(hi));
        }
        prop_assert!(duration_penalty(a) <= 1.0);
    }

    /// Sessions under one hour never produce debt, whatever the goal.
    #[test]
    fn sleep_debt_is_zero_below_one_hour(hours in 0.0f64..1.0, goal in 0.0f64..24.0) {
        prop_assert_eq!(sleep_debt_hours(hours, goal), 0.0);
    }

    #[test]
    fn sleep_debt_is_signed_difference_above_one_hour(hours in 1.0f64..24.0, goal in 0.0f64..24.0) {
        prop_assert!((sleep_debt_hours(hours, goal) - (hours - goal)).abs() < 1e-12);
    }

    /// Quality, when defined, is a 0-100 score.
    #[test]
    fn quality_score_is_bounded(points in movement(), hours in 0.0f64..30.0) {
        let result = score(&points, hours, 8.0);
        if let Some(quality) = result.quality {
            prop_assert!((0.0..=100.0).contains(&quality), "quality {}", quality);
        }
        prop_assert!(result.deep_sleep_minutes >= 0.0);
        prop_assert!(result.light_sleep_minutes >= 0.0);
        let tracked: f64 = points.iter().map(|p| p.duration_minutes).sum();
        prop_assert!(result.deep_sleep_minutes + result.light_sleep_minutes <= tracked + 1e-9);
    }

    /// Encoding then decoding a session yields an identical record.
    #[test]
    fn session_record_round_trips(session in session()) {
        let json = session.to_json().unwrap();
        let decoded = SleepSession::from_json(&json).unwrap();
        prop_assert_eq!(decoded, session);
    }
}
