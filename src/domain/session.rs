//! Sleep session record: the unit that is tracked, scored and persisted

use crate::domain::types::{MovementDataPoint, SessionId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default nightly sleep goal
pub const DEFAULT_SLEEP_GOAL_HOURS: f64 = 8.0;

/// One punch-in/punch-out tracking session.
///
/// `is_active` mirrors `end_time.is_none()`; both only change through
/// [`SleepSession::end`]. After that the record is frozen: movement points,
/// wake time and scores are no longer accepted through the mutating methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepSession {
    pub id: SessionId,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub is_active: bool,
    #[serde(default)]
    pub movement_data: Vec<MovementDataPoint>,
    pub sleep_goal_hours: f64,
    #[serde(default)]
    pub smart_alarm_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_wake_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_wake_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_quality_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light_sleep_minutes: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deep_sleep_minutes: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_debt_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl SleepSession {
    /// Start a new active session.
    ///
    /// # Example
    ///
    /// ```
    /// use chrono::Utc;
    /// use sleep_ledger::domain::session::SleepSession;
    ///
    /// let session = SleepSession::new(Utc::now(), 8.0, false, None);
    /// assert!(session.is_active);
    /// assert!(session.movement_data.is_empty());
    /// ```
    pub fn new(
        start_time: DateTime<Utc>,
        sleep_goal_hours: f64,
        smart_alarm_enabled: bool,
        target_wake_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            start_time,
            end_time: None,
            is_active: true,
            movement_data: Vec::with_capacity(512),
            sleep_goal_hours,
            smart_alarm_enabled,
            target_wake_time,
            actual_wake_time: None,
            sleep_quality_score: None,
            light_sleep_minutes: None,
            deep_sleep_minutes: None,
            sleep_debt_hours: None,
            notes: None,
            tags: Vec::new(),
        }
    }

    /// Whether a smart alarm should watch this session
    pub fn wants_smart_alarm(&self) -> bool {
        self.smart_alarm_enabled && self.target_wake_time.is_some()
    }

    /// Append a movement point. Rejected once the session has ended or if the
    /// point would break timestamp order.
    pub fn append_point(&mut self, point: MovementDataPoint) -> bool {
        if !self.is_active {
            return false;
        }
        if let Some(last) = self.movement_data.last() {
            if point.timestamp < last.timestamp {
                return false;
            }
        }
        self.movement_data.push(point);
        true
    }

    /// Record the moment the alarm woke the user. Settable once, while active.
    pub fn record_wake(&mut self, at: DateTime<Utc>) -> bool {
        if !self.is_active || self.actual_wake_time.is_some() {
            return false;
        }
        self.actual_wake_time = Some(at);
        true
    }

    /// Close the session. Returns false if it was already closed.
    pub fn end(&mut self, at: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        self.end_time = Some(at.max(self.start_time));
        self.is_active = false;
        true
    }

    /// Wall-clock span between punch-in and punch-out
    pub fn duration(&self) -> Option<Duration> {
        self.end_time.map(|end| end - self.start_time)
    }

    pub fn duration_hours(&self) -> Option<f64> {
        self.duration().map(|d| d.num_milliseconds() as f64 / 3_600_000.0)
    }

    /// Minutes since punch-in as seen at `now` (uses end time once closed)
    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> f64 {
        let end = self.end_time.unwrap_or(now);
        (end - self.start_time).num_milliseconds().max(0) as f64 / 60_000.0
    }

    pub fn met_sleep_goal(&self) -> bool {
        self.duration_hours().is_some_and(|hours| hours >= self.sleep_goal_hours)
    }

    pub fn latest_point(&self) -> Option<&MovementDataPoint> {
        self.movement_data.last()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
