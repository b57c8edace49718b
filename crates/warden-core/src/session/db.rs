//! Session storage in a single redb database.
//!
//! One `SESSIONS` table keyed by session id; values are JSON-encoded
//! [`SessionState`]. redb serializes write transactions, so a
//! read-modify-write inside one transaction is atomic without extra locking.

use std::path::Path;
use std::time::{Duration, Instant};

use redb::{Database, DatabaseError, ReadableTable, TableDefinition};

use super::{Mutator, ReadResult, SessionState, SessionStore};
use crate::error::{Result, WardenError};
use crate::io::ensure_dir;
use crate::paths::validate_session_id;

// ---------------------------------------------------------------------------
// Table definition
// ---------------------------------------------------------------------------

/// Key: session id. Value: JSON-encoded SessionState.
const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// How long `open` waits for another process to release the database file.
const OPEN_TIMEOUT: Duration = Duration::from_secs(2);

fn db_err(e: impl std::fmt::Display) -> WardenError {
    WardenError::Store(e.to_string())
}

// ---------------------------------------------------------------------------
// RedbSessionStore
// ---------------------------------------------------------------------------

pub struct RedbSessionStore {
    db: Database,
}

impl RedbSessionStore {
    /// Open or create the database at `path` and ensure the table exists.
    ///
    /// redb holds an exclusive file lock while open; a concurrent hook process
    /// is waited on for up to two seconds.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        let deadline = Instant::now() + OPEN_TIMEOUT;
        let db = loop {
            match Database::create(path) {
                Ok(db) => break db,
                Err(DatabaseError::DatabaseAlreadyOpen) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(e) => return Err(db_err(e)),
            }
        };

        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(SESSIONS).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    fn try_read(&self, session_id: &str) -> Result<ReadResult> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(SESSIONS).map_err(db_err)?;
        Ok(match table.get(session_id).map_err(db_err)? {
            Some(v) => SessionState::decode_json(session_id, v.value()),
            None => ReadResult::NotFound,
        })
    }
}

impl SessionStore for RedbSessionStore {
    fn read(&self, session_id: &str) -> ReadResult {
        if validate_session_id(session_id).is_err() {
            return ReadResult::NotFound;
        }
        self.try_read(session_id).unwrap_or_else(|e| {
            tracing::warn!(session = session_id, error = %e, "session read failed");
            ReadResult::Corrupt(e.to_string())
        })
    }

    fn write(&self, session_id: &str, state: &SessionState) -> Result<()> {
        validate_session_id(session_id)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(SESSIONS).map_err(db_err)?;
            let prev = table
                .get(session_id)
                .map_err(db_err)?
                .and_then(|v| SessionState::decode_json(session_id, v.value()).ok())
                .map_or(0, |s| s.revision);
            let value = serde_json::to_vec(&state.stamped(session_id, prev))?;
            table
                .insert(session_id, value.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    fn update(&self, session_id: &str, f: Mutator<'_>) -> Result<SessionState> {
        validate_session_id(session_id)
            .map_err(|_| WardenError::SessionNotFound(session_id.to_string()))?;
        let wt = self.db.begin_write().map_err(db_err)?;
        let stored = {
            let mut table = wt.open_table(SESSIONS).map_err(db_err)?;
            let bytes = table
                .get(session_id)
                .map_err(db_err)?
                .map(|v| v.value().to_vec());
            let current = match bytes {
                Some(b) => SessionState::decode_json(session_id, &b),
                None => ReadResult::NotFound,
            }
            .require(session_id)?;

            let mut next = current.clone();
            if !f(&mut next) {
                return Ok(current);
            }
            let stored = next.stamped(session_id, current.revision);
            let value = serde_json::to_vec(&stored)?;
            table
                .insert(session_id, value.as_slice())
                .map_err(db_err)?;
            stored
        };
        wt.commit().map_err(db_err)?;
        Ok(stored)
    }

    fn delete(&self, session_id: &str) -> Result<bool> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let existed = {
            let mut table = wt.open_table(SESSIONS).map_err(db_err)?;
            let removed = table.remove(session_id).map_err(db_err)?;
            removed.is_some()
        };
        wt.commit().map_err(db_err)?;
        Ok(existed)
    }

    fn list(&self) -> Result<Vec<SessionState>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(SESSIONS).map_err(db_err)?;

        let mut result = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (k, v) = entry.map_err(db_err)?;
            let id = k.value();
            match SessionState::decode_json(id, v.value()) {
                ReadResult::Ok(s) => result.push(s),
                ReadResult::NotFound => {}
                ReadResult::Corrupt(reason) => {
                    tracing::warn!(session = id, reason = %reason, "skipping corrupt session record");
                }
            }
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::super::contract;
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn open(dir: &TempDir, name: &str) -> RedbSessionStore {
        RedbSessionStore::open(&dir.path().join(name)).unwrap()
    }

    #[test]
    fn contract() {
        let dir = TempDir::new().unwrap();
        contract::write_then_read(&open(&dir, "a.redb"));
        contract::missing_is_not_found(&open(&dir, "b.redb"));
        contract::update_increments(&open(&dir, "c.redb"));
        contract::unchanged_update_does_not_write(&open(&dir, "d.redb"));
        contract::update_missing_errors(&open(&dir, "e.redb"));
        contract::delete_and_list(&open(&dir, "f.redb"));
        contract::gc_removes_only_stale_done(&open(&dir, "g.redb"));
    }

    #[test]
    fn concurrent_updates() {
        let dir = TempDir::new().unwrap();
        contract::concurrent_updates_serialize(Arc::new(open(&dir, "race.redb")));
    }

    #[test]
    fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir, "s.redb");
            store.write("keep", &contract::sample("keep")).unwrap();
        }
        let store = open(&dir, "s.redb");
        assert_eq!(store.read("keep").ok().unwrap().phase, "building");
    }

    #[test]
    fn creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/.warden/sessions.redb");
        RedbSessionStore::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn corrupt_value_reads_as_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, "c.redb");
        let wt = store.db.begin_write().unwrap();
        {
            let mut t = wt.open_table(SESSIONS).unwrap();
            t.insert("junk", b"not json".as_slice()).unwrap();
        }
        wt.commit().unwrap();

        assert!(matches!(store.read("junk"), ReadResult::Corrupt(_)));
        assert!(store.list().unwrap().is_empty());
    }
}
