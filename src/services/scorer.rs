//! Session scoring: quality score, per-stage minutes and sleep debt
//!
//! Pure functions over a finished session's movement history and its
//! wall-clock duration. Two modes:
//! - basic: no movement data, score comes from duration alone
//! - advanced: efficiency (30) + deep-sleep share (30) + duration (30) +
//!   restfulness (10)

use crate::domain::session::SleepSession;
use crate::domain::types::{MovementDataPoint, SleepStage};
use chrono::{DateTime, Duration, Utc};

/// Deep-sleep share of total sleep that earns the full deep-sleep score
const DEEP_SLEEP_TARGET_RATIO: f64 = 0.25;
/// Sessions shorter than this never produce debt
const MIN_DEBT_HOURS: f64 = 1.0;

/// Result of scoring one session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionScore {
    /// 0-100; `None` when movement data exists but covers zero minutes
    pub quality: Option<f64>,
    pub light_sleep_minutes: f64,
    pub deep_sleep_minutes: f64,
    pub sleep_debt_hours: f64,
}

/// Duration weight in [0,1]: an inverted U peaking between 7 and 9 hours.
/// Continuous at 1, 3, 5, 7 and 11 hours; drops from just under 1.0 to 0.9 at 9.
pub fn duration_penalty(hours: f64) -> f64 {
    let hours = hours.max(0.0);
    if hours < 1.0 {
        hours * 0.2
    } else if hours < 3.0 {
        0.2 + ((hours - 1.0) / 2.0) * 0.3
    } else if hours < 5.0 {
        0.5 + ((hours - 3.0) / 2.0) * 0.2
    } else if hours < 7.0 {
        0.7 + ((hours - 5.0) / 2.0) * 0.2
    } else if hours < 9.0 {
        0.9 + ((hours - 7.0) / 2.0) * 0.1
    } else if hours < 11.0 {
        // Restarts at 0.9: a step down from the 1.0 approached just below 9h
        0.9 - ((hours - 9.0) / 2.0) * 0.1
    } else {
        (0.8 - ((hours - 11.0) / 2.0) * 0.1).max(0.6)
    }
}

/// Signed hours versus goal (positive = surplus). Sessions under one hour
/// yield exactly zero so quick punch-in/out cycles cannot fake a deficit.
pub fn sleep_debt_hours(hours: f64, goal_hours: f64) -> f64 {
    if hours < MIN_DEBT_HOURS {
        return 0.0;
    }
    hours - goal_hours
}

/// Score a movement history of a session that lasted `hours`
pub fn score(movement: &[MovementDataPoint], hours: f64, goal_hours: f64) -> SessionScore {
    let sleep_debt_hours = sleep_debt_hours(hours, goal_hours);

    if movement.is_empty() {
        return SessionScore {
            quality: Some((duration_penalty(hours) * 100.0).clamp(0.0, 100.0)),
            light_sleep_minutes: 0.0,
            deep_sleep_minutes: 0.0,
            sleep_debt_hours,
        };
    }

    let mut deep_minutes = 0.0;
    let mut light_minutes = 0.0;
    let mut tracked_minutes = 0.0;
    let mut intensity_sum = 0.0;

    for point in movement {
        tracked_minutes += point.duration_minutes;
        intensity_sum += point.intensity;
        match point.stage() {
            SleepStage::Deep => deep_minutes += point.duration_minutes,
            SleepStage::Light => light_minutes += point.duration_minutes,
            SleepStage::Awake => {}
        }
    }

    let quality = if tracked_minutes > 0.0 {
        let sleep_minutes = deep_minutes + light_minutes;
        let efficiency_score = (sleep_minutes / tracked_minutes) * 30.0;
        let deep_sleep_score = if sleep_minutes > 0.0 {
            ((deep_minutes / sleep_minutes) / DEEP_SLEEP_TARGET_RATIO).min(1.0) * 30.0
        } else {
            0.0
        };
        let duration_score = duration_penalty(hours) * 30.0;
        let avg_intensity = intensity_sum / movement.len() as f64;
        let movement_score = ((1.0 - avg_intensity) * 10.0).max(0.0);

        Some(
            (efficiency_score + deep_sleep_score + duration_score + movement_score)
                .clamp(0.0, 100.0),
        )
    } else {
        None
    };

    SessionScore {
        quality,
        light_sleep_minutes: light_minutes,
        deep_sleep_minutes: deep_minutes,
        sleep_debt_hours,
    }
}

/// Score a closed session. Returns `None` while the session is still open.
pub fn score_session(session: &SleepSession) -> Option<SessionScore> {
    let hours = session.duration_hours()?;
    Some(score(&session.movement_data, hours, session.sleep_goal_hours))
}

/// Write the score fields of a closed session. Returns false if still open.
pub fn apply_score(session: &mut SleepSession) -> bool {
    let Some(result) = score_session(session) else {
        return false;
    };
    session.sleep_quality_score = result.quality;
    session.light_sleep_minutes = Some(result.light_sleep_minutes);
    session.deep_sleep_minutes = Some(result.deep_sleep_minutes);
    session.sleep_debt_hours = Some(result.sleep_debt_hours);
    true
}

/// Most restless moment in the pre-wake window `[target - window, target]`.
///
/// Only defined for sessions with a smart alarm, a target and movement data.
/// Ties go to the earliest point; an empty window yields the target itself.
pub fn find_optimal_wake_time(session: &SleepSession, window: Duration) -> Option<DateTime<Utc>> {
    if !session.smart_alarm_enabled || session.movement_data.is_empty() {
        return None;
    }
    let target = session.target_wake_time?;
    let window_start = target - window;

    let mut best: Option<&MovementDataPoint> = None;
    for point in &session.movement_data {
        if point.timestamp < window_start || point.timestamp > target {
            continue;
        }
        if best.map_or(true, |b| point.intensity > b.intensity) {
            best = Some(point);
        }
    }

    Some(best.map_or(target, |p| p.timestamp))
}
