use super::{Mutator, ReadResult, SessionState, SessionStore};
use crate::error::{Result, WardenError};
use crate::paths::validate_session_id;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// In-process store. All mutation happens under one mutex.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionState>> {
        // A panic in another holder cannot leave a half-written record: every
        // insert is a whole value.
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SessionStore for MemorySessionStore {
    fn read(&self, session_id: &str) -> ReadResult {
        if validate_session_id(session_id).is_err() {
            return ReadResult::NotFound;
        }
        match self.lock().get(session_id) {
            Some(s) => ReadResult::Ok(s.clone()),
            None => ReadResult::NotFound,
        }
    }

    fn write(&self, session_id: &str, state: &SessionState) -> Result<()> {
        validate_session_id(session_id)?;
        let mut map = self.lock();
        let prev = map.get(session_id).map_or(0, |s| s.revision);
        map.insert(session_id.to_string(), state.stamped(session_id, prev));
        Ok(())
    }

    fn update(&self, session_id: &str, f: Mutator<'_>) -> Result<SessionState> {
        validate_session_id(session_id)
            .map_err(|_| WardenError::SessionNotFound(session_id.to_string()))?;
        let mut map = self.lock();
        let current = map
            .get(session_id)
            .cloned()
            .ok_or_else(|| WardenError::SessionNotFound(session_id.to_string()))?;
        let mut next = current.clone();
        if !f(&mut next) {
            return Ok(current);
        }
        let stored = next.stamped(session_id, current.revision);
        map.insert(session_id.to_string(), stored.clone());
        Ok(stored)
    }

    fn delete(&self, session_id: &str) -> Result<bool> {
        Ok(self.lock().remove(session_id).is_some())
    }

    fn list(&self) -> Result<Vec<SessionState>> {
        let mut all: Vec<_> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        Ok(all)
    }
}
