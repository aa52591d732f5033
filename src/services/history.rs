//! Aggregates over completed sessions for the stats view

use crate::domain::session::SleepSession;
use crate::domain::types::SessionId;
use serde::Serialize;

/// Summary of a run of completed sessions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistorySummary {
    pub session_count: usize,
    pub average_duration_hours: f64,
    /// Mean over sessions that carry a quality score
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_quality: Option<f64>,
    /// Sum of per-session debt (negative = net deficit)
    pub cumulative_debt_hours: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_session: Option<BestSession>,
    pub goal_met_count: usize,
    /// `max(0, 1 - σ/μ)` of durations; 1.0 = identical nights
    pub consistency: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BestSession {
    pub id: SessionId,
    pub quality: f64,
}

impl HistorySummary {
    /// Summarize closed sessions. Active sessions are ignored.
    pub fn from_sessions(sessions: &[SleepSession]) -> Self {
        let completed: Vec<&SleepSession> =
            sessions.iter().filter(|s| !s.is_active && s.end_time.is_some()).collect();

        let durations: Vec<f64> = completed.iter().filter_map(|s| s.duration_hours()).collect();
        let average_duration_hours = mean(&durations).unwrap_or(0.0);

        let qualities: Vec<f64> = completed.iter().filter_map(|s| s.sleep_quality_score).collect();
        let average_quality = mean(&qualities);

        let cumulative_debt_hours = completed.iter().filter_map(|s| s.sleep_debt_hours).sum();

        let best_session = completed
            .iter()
            .filter_map(|s| s.sleep_quality_score.map(|quality| BestSession { id: s.id, quality }))
            .fold(None, |best: Option<BestSession>, candidate| match best {
                Some(b) if b.quality >= candidate.quality => Some(b),
                _ => Some(candidate),
            });

        let goal_met_count = completed.iter().filter(|s| s.met_sleep_goal()).count();

        Self {
            session_count: completed.len(),
            average_duration_hours,
            average_quality,
            cumulative_debt_hours,
            best_session,
            goal_met_count,
            consistency: consistency(&durations),
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// One minus the coefficient of variation, floored at zero
fn consistency(durations: &[f64]) -> f64 {
    if durations.len() < 2 {
        return 0.0;
    }
    let Some(mu) = mean(durations) else {
        return 0.0;
    };
    if mu <= 0.0 {
        return 0.0;
    }
    let variance = durations.iter().map(|d| (d - mu).powi(2)).sum::<f64>() / durations.len() as f64;
    (1.0 - variance.sqrt() / mu).max(0.0)
}
