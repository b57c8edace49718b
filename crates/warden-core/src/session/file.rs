use super::{Mutator, ReadResult, SessionState, SessionStore};
use crate::error::{Result, WardenError};
use crate::io::{atomic_write, FileLock};
use crate::paths::validate_session_id;
use std::path::{Path, PathBuf};
use std::time::Duration;

const LOCK_TIMEOUT: Duration = Duration::from_secs(2);
const STALE_LOCK: Duration = Duration::from_secs(30);

/// Attempts made by `update` before giving up with `WriteConflict`.
const UPDATE_ATTEMPTS: usize = 2;

/// One YAML file per session under `.warden/sessions/`.
///
/// Writes go through [`atomic_write`] while holding a per-session lock file,
/// so readers never see a partial record. [`SessionStore::update`] is
/// optimistic: it applies the mutator to an unlocked read, then takes the
/// lock and commits only if the stored revision has not moved.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.yaml"))
    }

    fn lock_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.lock"))
    }

    fn lock(&self, session_id: &str) -> Result<FileLock> {
        FileLock::acquire(&self.lock_path(session_id), LOCK_TIMEOUT, STALE_LOCK)
    }

    fn read_path(&self, session_id: &str, path: &Path) -> ReadResult {
        match std::fs::read_to_string(path) {
            Ok(data) => SessionState::decode_yaml(session_id, &data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ReadResult::NotFound,
            Err(e) => ReadResult::Corrupt(e.to_string()),
        }
    }

    fn persist(&self, state: &SessionState) -> Result<()> {
        let data = serde_yaml::to_string(state)?;
        atomic_write(&self.record_path(&state.session_id), data.as_bytes())
    }

    /// Current stored revision, `None` when the record is absent.
    fn stored_revision(&self, session_id: &str) -> Result<Option<u64>> {
        match self.read(session_id) {
            ReadResult::Ok(s) => Ok(Some(s.revision)),
            ReadResult::NotFound => Ok(None),
            ReadResult::Corrupt(reason) => Err(WardenError::CorruptSession {
                session: session_id.to_string(),
                reason,
            }),
        }
    }
}

impl SessionStore for FileSessionStore {
    fn read(&self, session_id: &str) -> ReadResult {
        if validate_session_id(session_id).is_err() {
            return ReadResult::NotFound;
        }
        self.read_path(session_id, &self.record_path(session_id))
    }

    fn write(&self, session_id: &str, state: &SessionState) -> Result<()> {
        validate_session_id(session_id)?;
        let _guard = self.lock(session_id)?;
        // A corrupt record is overwritten.
        let prev = self.stored_revision(session_id).unwrap_or(None).unwrap_or(0);
        self.persist(&state.stamped(session_id, prev))
    }

    fn update(&self, session_id: &str, f: Mutator<'_>) -> Result<SessionState> {
        validate_session_id(session_id)
            .map_err(|_| WardenError::SessionNotFound(session_id.to_string()))?;

        for attempt in 1..=UPDATE_ATTEMPTS {
            let current = self.read(session_id).require(session_id)?;
            let mut next = current.clone();
            if !f(&mut next) {
                return Ok(current);
            }

            let _guard = self.lock(session_id)?;
            if self.stored_revision(session_id)? != Some(current.revision) {
                tracing::debug!(session = session_id, attempt, "revision moved; retrying");
                continue;
            }
            let stored = next.stamped(session_id, current.revision);
            self.persist(&stored)?;
            return Ok(stored);
        }

        tracing::warn!(session = session_id, "giving up after concurrent writes");
        Err(WardenError::WriteConflict(session_id.to_string()))
    }

    fn delete(&self, session_id: &str) -> Result<bool> {
        if validate_session_id(session_id).is_err() {
            return Ok(false);
        }
        let _guard = self.lock(session_id)?;
        match std::fs::remove_file(self.record_path(session_id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<SessionState>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut sessions = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.read_path(id, &path) {
                ReadResult::Ok(s) => sessions.push(s),
                ReadResult::NotFound => {}
                ReadResult::Corrupt(reason) => {
                    tracing::warn!(session = id, reason = %reason, "skipping corrupt session record");
                }
            }
        }
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        Ok(sessions)
    }
}
