//! Session persistence
//!
//! `SessionStore` is the boundary the core writes through. Two engines:
//! - `FileSessionStore` - one JSON document per session, written atomically
//! - `MemorySessionStore` - in-process map, used by tests and embedders
//!
//! Both refuse to hold two active sessions at once: crash recovery adopts
//! "the" active session, so the uniqueness is enforced here rather than assumed.

use crate::domain::session::SleepSession;
use crate::domain::types::SessionId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("session record could not be encoded or decoded: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("session {existing} is already active; refusing to store {rejected} as active")]
    ActiveSessionConflict { existing: SessionId, rejected: SessionId },
    #[error("simulated storage failure")]
    Unavailable,
}

/// Durable store of session records
pub trait SessionStore: Send + Sync {
    /// Insert or replace a session record
    fn save(&self, session: &SleepSession) -> Result<(), StoreError>;

    /// Remove a session record. Removing an unknown id is not an error.
    fn delete(&self, id: SessionId) -> Result<(), StoreError>;

    /// The single session still marked active, if any
    fn fetch_active(&self) -> Result<Option<SleepSession>, StoreError>;

    /// Sessions that started at or after `since`, oldest first
    fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<SleepSession>, StoreError>;
}

/// Decide whether storing `session` keeps the one-active-session rule
fn check_active_slot(
    current_active: Option<SessionId>,
    session: &SleepSession,
) -> Result<(), StoreError> {
    match current_active {
        Some(existing) if session.is_active && existing != session.id => {
            Err(StoreError::ActiveSessionConflict { existing, rejected: session.id })
        }
        _ => Ok(()),
    }
}

/// Next value of the active marker after `session` was stored
fn next_active_slot(current_active: Option<SessionId>, session: &SleepSession) -> Option<SessionId> {
    if session.is_active {
        Some(session.id)
    } else if current_active == Some(session.id) {
        None
    } else {
        current_active
    }
}

/// File-backed store: `<dir>/<session id>.json`
pub struct FileSessionStore {
    dir: PathBuf,
    /// Id of the stored active session. Serializes writers as well.
    active: Mutex<Option<SessionId>>,
}

impl FileSessionStore {
    /// Open (creating if needed) a store directory and index its active session
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let store = Self { dir, active: Mutex::new(None) };

        let mut active: Vec<SleepSession> =
            store.load_all()?.into_iter().filter(|s| s.is_active).collect();
        active.sort_by_key(|s| s.start_time);
        if active.len() > 1 {
            warn!(
                count = active.len(),
                dir = %store.dir.display(),
                "store_multiple_active_sessions_using_latest"
            );
        }
        *store.active.lock() = active.last().map(|s| s.id);

        info!(dir = %store.dir.display(), active = ?*store.active.lock(), "session_store_opened");
        Ok(store)
    }

    fn path_for(&self, id: SessionId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn load(&self, path: &Path) -> Result<SleepSession, StoreError> {
        let content = fs::read_to_string(path)?;
        Ok(SleepSession::from_json(&content)?)
    }

    /// Read every record, skipping files that do not parse
    fn load_all(&self) -> Result<Vec<SleepSession>, StoreError> {
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.load(&path) {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "store_record_skipped");
                }
            }
        }
        Ok(sessions)
    }

    /// Write to a temp file and rename so readers never see a torn record
    fn write_atomic(&self, session: &SleepSession) -> Result<(), StoreError> {
        let json = session.to_json()?;
        let path = self.path_for(session.id);
        let tmp = path.with_extension("json.tmp");

        let mut file = fs::File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;

        debug!(file = %path.display(), bytes = json.len(), "session_written");
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn save(&self, session: &SleepSession) -> Result<(), StoreError> {
        let mut active = self.active.lock();
        check_active_slot(*active, session)?;
        self.write_atomic(session)?;
        *active = next_active_slot(*active, session);
        Ok(())
    }

    fn delete(&self, id: SessionId) -> Result<(), StoreError> {
        let mut active = self.active.lock();
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if *active == Some(id) {
            *active = None;
        }
        Ok(())
    }

    fn fetch_active(&self) -> Result<Option<SleepSession>, StoreError> {
        let active = self.active.lock();
        match *active {
            Some(id) => Ok(Some(self.load(&self.path_for(id))?)),
            None => Ok(None),
        }
    }

    fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<SleepSession>, StoreError> {
        let _guard = self.active.lock();
        let mut sessions: Vec<SleepSession> =
            self.load_all()?.into_iter().filter(|s| s.start_time >= since).collect();
        sessions.sort_by_key(|s| s.start_time);
        Ok(sessions)
    }
}

#[derive(Default)]
struct MemoryInner {
    sessions: BTreeMap<SessionId, SleepSession>,
    active: Option<SessionId>,
    fail_saves: bool,
    fail_deletes: bool,
}

/// In-memory store with the same contract as the file store
#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<MemoryInner>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save` fail (exercises degraded persistence)
    pub fn set_fail_saves(&self, fail: bool) {
        self.inner.lock().fail_saves = fail;
    }

    /// Make every subsequent `delete` fail
    pub fn set_fail_deletes(&self, fail: bool) {
        self.inner.lock().fail_deletes = fail;
    }

    pub fn get(&self, id: SessionId) -> Option<SleepSession> {
        self.inner.lock().sessions.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().sessions.is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, session: &SleepSession) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.fail_saves {
            return Err(StoreError::Unavailable);
        }
        check_active_slot(inner.active, session)?;
        inner.active = next_active_slot(inner.active, session);
        inner.sessions.insert(session.id, session.clone());
        Ok(())
    }

    fn delete(&self, id: SessionId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.fail_deletes {
            return Err(StoreError::Unavailable);
        }
        inner.sessions.remove(&id);
        if inner.active == Some(id) {
            inner.active = None;
        }
        Ok(())
    }

    fn fetch_active(&self) -> Result<Option<SleepSession>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.active.and_then(|id| inner.sessions.get(&id).cloned()))
    }

    fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<SleepSession>, StoreError> {
        let inner = self.inner.lock();
        let mut sessions: Vec<SleepSession> =
            inner.sessions.values().filter(|s| s.start_time >= since).cloned().collect();
        sessions.sort_by_key(|s| s.start_time);
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    fn at(day: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, day, h, 0, 0).unwrap()
    }

    fn finished(day: u32) -> SleepSession {
        let mut session = SleepSession::new(at(day, 0), 8.0, false, None);
        session.end(at(day, 7));
        session
    }

    fn stores() -> (tempfile::TempDir, Vec<Box<dyn SessionStore>>) {
        let dir = tempdir().unwrap();
        let file = FileSessionStore::open(dir.path().join("sessions")).unwrap();
        (dir, vec![Box::new(file), Box::new(MemorySessionStore::new())])
    }

    #[test]
    fn test_save_and_fetch_active() {
        let (_dir, stores) = stores();
        for store in stores {
            let session = SleepSession::new(at(1, 23), 8.0, false, None);
            store.save(&session).unwrap();

            let active = store.fetch_active().unwrap().unwrap();
            assert_eq!(active, session);
        }
    }

    #[test]
    fn test_second_active_session_is_rejected() {
        let (_dir, stores) = stores();
        for store in stores {
            let first = SleepSession::new(at(1, 22), 8.0, false, None);
            let second = SleepSession::new(at(1, 23), 8.0, false, None);
            store.save(&first).unwrap();

            let err = store.save(&second).unwrap_err();
            assert!(matches!(err, StoreError::ActiveSessionConflict { .. }));

            // Re-saving the same active session is an update, not a conflict
            store.save(&first).unwrap();
        }
    }

    #[test]
    fn test_ending_frees_the_active_slot() {
        let (_dir, stores) = stores();
        for store in stores {
            let mut first = SleepSession::new(at(1, 22), 8.0, false, None);
            store.save(&first).unwrap();
            first.end(at(2, 6));
            store.save(&first).unwrap();
            assert!(store.fetch_active().unwrap().is_none());

            let second = SleepSession::new(at(2, 22), 8.0, false, None);
            store.save(&second).unwrap();
            assert_eq!(store.fetch_active().unwrap().map(|s| s.id), Some(second.id));
        }
    }

    #[test]
    fn test_delete_removes_record_and_active_marker() {
        let (_dir, stores) = stores();
        for store in stores {
            let session = SleepSession::new(at(3, 23), 8.0, false, None);
            store.save(&session).unwrap();
            store.delete(session.id).unwrap();

            assert!(store.fetch_active().unwrap().is_none());
            assert!(store.fetch_since(at(1, 0)).unwrap().is_empty());
            // Unknown ids are ignored
            store.delete(session.id).unwrap();
        }
    }

    #[test]
    fn test_fetch_since_filters_and_orders() {
        let (_dir, stores) = stores();
        for store in stores {
            let s3 = finished(3);
            let s1 = finished(1);
            let s2 = finished(2);
            for s in [&s3, &s1, &s2] {
                store.save(s).unwrap();
            }

            let found = store.fetch_since(at(2, 0)).unwrap();
            let ids: Vec<_> = found.iter().map(|s| s.id).collect();
            assert_eq!(ids, vec![s2.id, s3.id]);

            let all = store.fetch_since(at(1, 0) - Duration::days(1)).unwrap();
            assert_eq!(all.len(), 3);
        }
    }

    #[test]
    fn test_file_store_reindexes_active_on_open() {
        let dir = tempdir().unwrap();
        let session = SleepSession::new(at(4, 23), 7.0, false, None);
        {
            let store = FileSessionStore::open(dir.path()).unwrap();
            store.save(&session).unwrap();
            store.save(&finished(3)).unwrap();
        }

        let reopened = FileSessionStore::open(dir.path()).unwrap();
        assert_eq!(reopened.fetch_active().unwrap(), Some(session));
    }

    #[test]
    fn test_file_store_skips_corrupt_records() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("garbage.json"), "{not json").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = FileSessionStore::open(dir.path()).unwrap();
        store.save(&finished(5)).unwrap();

        assert_eq!(store.fetch_since(at(1, 0)).unwrap().len(), 1);
    }

    #[test]
    fn test_memory_store_failure_toggle() {
        let store = MemorySessionStore::new();
        store.set_fail_saves(true);
        assert!(matches!(store.save(&finished(1)), Err(StoreError::Unavailable)));
        assert!(store.is_empty());

        store.set_fail_saves(false);
        store.save(&finished(1)).unwrap();
        assert_eq!(store.len(), 1);

        let id = store.fetch_since(at(1, 0)).unwrap()[0].id;
        store.set_fail_deletes(true);
        assert!(matches!(store.delete(id), Err(StoreError::Unavailable)));
        assert_eq!(store.len(), 1);
    }
}
