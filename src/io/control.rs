//! Line-oriented control surface
//!
//! One command per line:
//! - `in [goal_hours] [HH:MM]` punch in; a wake time enables the smart alarm
//! - `out` punch out
//! - `status`
//! - `quit`
//!
//! Every command gets one JSON line back.

use crate::services::controller::{PunchInRequest, SessionHandle};
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

#[derive(Debug, Error, PartialEq)]
pub enum ControlParseError {
    #[error("unknown command `{0}` (expected in, out, status or quit)")]
    UnknownCommand(String),
    #[error("invalid sleep goal `{0}`")]
    InvalidGoal(String),
    #[error("invalid wake time `{0}` (expected HH:MM)")]
    InvalidWakeTime(String),
    #[error("unexpected argument `{0}`")]
    UnexpectedArgument(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlLine {
    In { goal_hours: Option<f64>, wake_at: Option<NaiveTime> },
    Out,
    Status,
    Quit,
}

/// Parse one control line. Blank lines and `#` comments yield `None`.
pub fn parse_control_line(line: &str) -> Result<Option<ControlLine>, ControlParseError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut tokens = line.split_whitespace();
    let command = tokens.next().unwrap_or_default().to_ascii_lowercase();
    let parsed = match command.as_str() {
        "in" => {
            let mut goal_hours = None;
            let mut wake_at = None;
            for token in tokens.by_ref() {
                if token.contains(':') && wake_at.is_none() {
                    let time = NaiveTime::parse_from_str(token, "%H:%M")
                        .map_err(|_| ControlParseError::InvalidWakeTime(token.to_string()))?;
                    wake_at = Some(time);
                } else if goal_hours.is_none() && wake_at.is_none() {
                    let goal = token
                        .parse::<f64>()
                        .ok()
                        .filter(|g| g.is_finite() && *g > 0.0)
                        .ok_or_else(|| ControlParseError::InvalidGoal(token.to_string()))?;
                    goal_hours = Some(goal);
                } else {
                    return Err(ControlParseError::UnexpectedArgument(token.to_string()));
                }
            }
            ControlLine::In { goal_hours, wake_at }
        }
        "out" => ControlLine::Out,
        "status" => ControlLine::Status,
        "quit" | "exit" => ControlLine::Quit,
        other => return Err(ControlParseError::UnknownCommand(other.to_string())),
    };

    if let Some(extra) = tokens.next() {
        return Err(ControlParseError::UnexpectedArgument(extra.to_string()));
    }
    Ok(Some(parsed))
}

/// Next occurrence of a wall-clock time strictly after `now`, in `now`'s zone
pub fn next_occurrence<Tz: TimeZone>(time: NaiveTime, now: &DateTime<Tz>) -> Option<DateTime<Utc>> {
    let tz = now.timezone();
    let today = now.date_naive().and_time(time);
    let candidate = tz.from_local_datetime(&today).earliest()?;
    let next = if candidate <= *now {
        tz.from_local_datetime(&(today + Duration::days(1))).earliest()?
    } else {
        candidate
    };
    Some(next.with_timezone(&Utc))
}

/// Build the punch-in request for an `in` line, resolving the wake time in `now`'s zone
pub fn punch_in_request<Tz: TimeZone>(
    goal_hours: Option<f64>,
    wake_at: Option<NaiveTime>,
    now: &DateTime<Tz>,
) -> Result<PunchInRequest, ControlParseError> {
    let request = PunchInRequest::new(goal_hours);
    match wake_at {
        Some(time) => {
            let target = next_occurrence(time, now)
                .ok_or_else(|| ControlParseError::InvalidWakeTime(time.format("%H:%M").to_string()))?;
            Ok(request.with_alarm(target))
        }
        None => Ok(request),
    }
}

fn reply<T: Serialize>(key: &str, value: &T) -> anyhow::Result<String> {
    let mut map = serde_json::Map::new();
    map.insert(key.to_string(), serde_json::to_value(value)?);
    Ok(serde_json::Value::Object(map).to_string())
}

fn error_reply(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}

/// Serve control lines from `reader` until `quit` or end of input
pub async fn run_control_loop<R, W>(reader: R, mut writer: W, handle: SessionHandle) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        let command = match parse_control_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                debug!(line = %line, error = %e, "control_line_rejected");
                write_line(&mut writer, &error_reply(&e.to_string())).await?;
                continue;
            }
        };

        let out = match command {
            ControlLine::In { goal_hours, wake_at } => {
                match punch_in_request(goal_hours, wake_at, &chrono::Local::now()) {
                    Ok(request) => match handle.punch_in(request).await {
                        Ok(report) => reply("punch_in", &report)?,
                        Err(e) => error_reply(&e.to_string()),
                    },
                    Err(e) => error_reply(&e.to_string()),
                }
            }
            ControlLine::Out => match handle.punch_out().await {
                Ok(report) => reply("punch_out", &report)?,
                Err(e) => error_reply(&e.to_string()),
            },
            ControlLine::Status => match handle.status().await {
                Ok(status) => reply("status", &status)?,
                Err(e) => error_reply(&e.to_string()),
            },
            ControlLine::Quit => {
                info!("control_quit");
                break;
            }
        };
        write_line(&mut writer, &out).await?;
    }

    Ok(())
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_control_line("out"), Ok(Some(ControlLine::Out)));
        assert_eq!(parse_control_line("  STATUS "), Ok(Some(ControlLine::Status)));
        assert_eq!(parse_control_line("quit"), Ok(Some(ControlLine::Quit)));
        assert_eq!(parse_control_line(""), Ok(None));
        assert_eq!(parse_control_line("# comment"), Ok(None));
    }

    #[test]
    fn test_parse_in_variants() {
        assert_eq!(
            parse_control_line("in"),
            Ok(Some(ControlLine::In { goal_hours: None, wake_at: None }))
        );
        assert_eq!(
            parse_control_line("in 7.5"),
            Ok(Some(ControlLine::In { goal_hours: Some(7.5), wake_at: None }))
        );
        assert_eq!(
            parse_control_line("in 7.5 06:30"),
            Ok(Some(ControlLine::In { goal_hours: Some(7.5), wake_at: Some(hm(6, 30)) }))
        );
        assert_eq!(
            parse_control_line("in 06:30"),
            Ok(Some(ControlLine::In { goal_hours: None, wake_at: Some(hm(6, 30)) }))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_control_line("sleep"), Err(ControlParseError::UnknownCommand(_))));
        assert!(matches!(parse_control_line("in lots"), Err(ControlParseError::InvalidGoal(_))));
        assert!(matches!(parse_control_line("in -1"), Err(ControlParseError::InvalidGoal(_))));
        assert!(matches!(parse_control_line("in 25:00"), Err(ControlParseError::InvalidWakeTime(_))));
        assert!(matches!(
            parse_control_line("in 06:30 8"),
            Err(ControlParseError::UnexpectedArgument(_))
        ));
        assert!(matches!(parse_control_line("out now"), Err(ControlParseError::UnexpectedArgument(_))));
    }

    #[test]
    fn test_next_occurrence_later_today() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 5, 0, 0).unwrap();
        let next = next_occurrence(hm(6, 30), &now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 7, 1, 6, 30, 0).unwrap());
    }

    #[test]
    fn test_next_occurrence_rolls_to_tomorrow() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 23, 0, 0).unwrap();
        let next = next_occurrence(hm(6, 30), &now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 7, 2, 6, 30, 0).unwrap());

        // Exactly now counts as passed
        let next = next_occurrence(hm(23, 0), &now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 7, 2, 23, 0, 0).unwrap());
    }

    #[test]
    fn test_next_occurrence_uses_local_offset() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2026, 7, 1, 23, 0, 0).unwrap();
        let next = next_occurrence(hm(7, 0), &now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 7, 2, 5, 0, 0).unwrap());
    }

    #[test]
    fn test_punch_in_request_enables_alarm_only_with_time() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 23, 0, 0).unwrap();

        let plain = punch_in_request(Some(8.0), None, &now).unwrap();
        assert!(!plain.smart_alarm_enabled);
        assert_eq!(plain.target_wake_time, None);

        let alarm = punch_in_request(None, Some(hm(7, 0)), &now).unwrap();
        assert!(alarm.smart_alarm_enabled);
        assert_eq!(alarm.target_wake_time, Some(Utc.with_ymd_and_hms(2026, 7, 2, 7, 0, 0).unwrap()));
    }
}
