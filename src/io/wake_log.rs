//! Wake event log - alarm delivery to a JSONL file
//!
//! Every delivery call becomes one JSON object per line in the configured
//! file, for a notifier process (or a human) to pick up.

use crate::domain::types::SessionId;
use crate::io::delivery::{AlarmDelivery, WakePayload};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

#[derive(Debug, Serialize)]
struct WakeRecord<'a> {
    t: &'static str,
    sid: SessionId,
    ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fire_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<&'a WakePayload>,
}

/// Append-only JSONL alarm delivery
pub struct WakeEventLog {
    file_path: String,
}

impl WakeEventLog {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "wake_log_initialized");
        Self { file_path: file_path.to_string() }
    }

    fn write_record(&self, record: &WakeRecord<'_>) -> bool {
        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                error!(sid = %record.sid, error = %e, "wake_record_encode_failed");
                return false;
            }
        };

        match self.append_line(&json) {
            Ok(()) => {
                info!(sid = %record.sid, t = %record.t, "wake_event_written");
                true
            }
            Err(e) => {
                error!(sid = %record.sid, t = %record.t, error = %e, "wake_event_write_failed");
                false
            }
        }
    }

    /// Append a line to the log file
    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "wake_log_written");

        Ok(())
    }
}

impl AlarmDelivery for WakeEventLog {
    fn schedule_wake(&self, session_id: SessionId, fire_at: DateTime<Utc>, payload: &WakePayload) {
        self.write_record(&WakeRecord {
            t: "schedule",
            sid: session_id,
            ts: Utc::now(),
            fire_at: Some(fire_at),
            payload: Some(payload),
        });
    }

    fn cancel_wake(&self, session_id: SessionId) {
        self.write_record(&WakeRecord {
            t: "cancel",
            sid: session_id,
            ts: Utc::now(),
            fire_at: None,
            payload: None,
        });
    }

    fn fire_immediately(&self, session_id: SessionId, payload: &WakePayload) {
        self.write_record(&WakeRecord {
            t: "fire",
            sid: session_id,
            ts: Utc::now(),
            fire_at: None,
            payload: Some(payload),
        });
    }
}
