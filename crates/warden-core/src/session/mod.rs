//! Durable per-session state and the stores that hold it.
//!
//! A session record is tiny (workflow, phase, counters) but it is the only
//! shared mutable resource in the decision pipeline: hook processes for the
//! same session may race on it. Every store serializes mutation per session
//! id and exposes [`SessionStore::update`] as the atomic read-modify-write
//! primitive.
//!
//! ```text
//!   MemorySessionStore   Mutex<HashMap>            tests, embedding
//!   FileSessionStore     .warden/sessions/<id>.yaml lock file + revision CAS
//!   RedbSessionStore     .warden/sessions.redb      one write transaction
//! ```

mod db;
mod file;
mod memory;

pub use db::RedbSessionStore;
pub use file::FileSessionStore;
pub use memory::MemorySessionStore;

use crate::error::{Result, WardenError};
use crate::paths;
use crate::workflow::DONE;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub workflow_id: String,
    pub phase: String,
    pub continuation_count: i64,
    pub max_continuations: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
    /// Bumped on every write; used as the compare-and-swap token.
    #[serde(default)]
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(
        session_id: impl Into<String>,
        workflow_id: impl Into<String>,
        phase: impl Into<String>,
        max_continuations: i64,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            workflow_id: workflow_id.into(),
            phase: phase.into(),
            continuation_count: 0,
            max_continuations,
            issue_id: None,
            revision: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn with_issue(mut self, issue_id: Option<String>) -> Self {
        self.issue_id = issue_id;
        self
    }

    pub fn is_done(&self) -> bool {
        self.phase == DONE
    }

    /// Field-level checks applied to every record read from disk.
    ///
    /// A non-positive `max_continuations` passes: such a record never
    /// continues.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.workflow_id.trim().is_empty() {
            return Err("empty workflow_id".to_string());
        }
        if self.phase.trim().is_empty() {
            return Err("empty phase".to_string());
        }
        if self.continuation_count < 0 {
            return Err(format!(
                "negative continuation_count {}",
                self.continuation_count
            ));
        }
        Ok(())
    }

    /// Parse and validate a stored record for `session_id`.
    pub(crate) fn decode_yaml(session_id: &str, data: &str) -> ReadResult {
        match serde_yaml::from_str::<SessionState>(data) {
            Ok(state) => check_decoded(session_id, state),
            Err(e) => ReadResult::Corrupt(e.to_string()),
        }
    }

    pub(crate) fn decode_json(session_id: &str, data: &[u8]) -> ReadResult {
        match serde_json::from_slice::<SessionState>(data) {
            Ok(state) => check_decoded(session_id, state),
            Err(e) => ReadResult::Corrupt(e.to_string()),
        }
    }

    /// Stamp a state for persistence under `session_id` after `prev_revision`.
    pub(crate) fn stamped(&self, session_id: &str, prev_revision: u64) -> SessionState {
        let mut next = self.clone();
        next.session_id = session_id.to_string();
        next.revision = prev_revision + 1;
        next.updated_at = Utc::now();
        next
    }
}

fn check_decoded(session_id: &str, state: SessionState) -> ReadResult {
    if state.session_id != session_id {
        return ReadResult::Corrupt(format!(
            "record belongs to session '{}'",
            state.session_id
        ));
    }
    match state.validate() {
        Ok(()) => ReadResult::Ok(state),
        Err(reason) => ReadResult::Corrupt(reason),
    }
}

// ---------------------------------------------------------------------------
// ReadResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResult {
    Ok(SessionState),
    NotFound,
    Corrupt(String),
}

impl ReadResult {
    pub fn ok(self) -> Option<SessionState> {
        match self {
            ReadResult::Ok(s) => Some(s),
            _ => None,
        }
    }

    /// Convert into a `Result`, treating absence and corruption as errors.
    pub fn require(self, session_id: &str) -> Result<SessionState> {
        match self {
            ReadResult::Ok(s) => Ok(s),
            ReadResult::NotFound => Err(WardenError::SessionNotFound(session_id.to_string())),
            ReadResult::Corrupt(reason) => Err(WardenError::CorruptSession {
                session: session_id.to_string(),
                reason,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionStore trait
// ---------------------------------------------------------------------------

/// Closure applied inside [`SessionStore::update`]. Returns `true` when it
/// changed the state and the result should be persisted.
pub type Mutator<'a> = &'a mut dyn FnMut(&mut SessionState) -> bool;

pub trait SessionStore: Send + Sync {
    /// Read a session. Invalid ids read as `NotFound`; unreadable or
    /// malformed records as `Corrupt`.
    fn read(&self, session_id: &str) -> ReadResult;

    /// Unconditionally store `state` under `session_id`.
    fn write(&self, session_id: &str, state: &SessionState) -> Result<()>;

    /// Atomic read-modify-write. The mutator may run more than once if a
    /// concurrent writer forces a retry. Returns the state as stored.
    fn update(&self, session_id: &str, f: Mutator<'_>) -> Result<SessionState>;

    /// Remove a session. Returns whether it existed.
    fn delete(&self, session_id: &str) -> Result<bool>;

    /// All readable sessions. Corrupt records are skipped with a warning.
    fn list(&self) -> Result<Vec<SessionState>>;

    /// Delete finished sessions not touched within `retention`.
    fn gc(&self, retention: Duration) -> Result<Vec<String>> {
        let retention = chrono::Duration::from_std(retention)
            .map_err(|e| WardenError::InvalidConfig(e.to_string()))?;
        let cutoff = Utc::now() - retention;
        let mut removed = Vec::new();
        for state in self.list()? {
            if state.is_done() && state.updated_at < cutoff && self.delete(&state.session_id)? {
                removed.push(state.session_id);
            }
        }
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Backend selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    File,
    Redb,
}

impl StoreBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreBackend::File => "file",
            StoreBackend::Redb => "redb",
        }
    }
}

/// Open the configured store for the project at `root`.
pub fn open_store(root: &Path, backend: StoreBackend) -> Result<Arc<dyn SessionStore>> {
    Ok(match backend {
        StoreBackend::File => Arc::new(FileSessionStore::new(paths::sessions_dir(root))),
        StoreBackend::Redb => Arc::new(RedbSessionStore::open(&paths::sessions_db_path(root))?),
    })
}

// ---------------------------------------------------------------------------
// Shared store contract tests
// ---------------------------------------------------------------------------

/// Behaviour every store must share; each backend's tests call these.
#[cfg(test)]
pub(crate) mod contract {
    use super::*;

    pub fn sample(id: &str) -> SessionState {
        SessionState::new(id, "impl", "building", 10)
    }

    pub fn write_then_read(store: &dyn SessionStore) {
        let s = sample("s1");
        store.write("s1", &s).unwrap();
        let got = store.read("s1").ok().unwrap();
        assert_eq!(got.workflow_id, "impl");
        assert_eq!(got.phase, "building");
        assert_eq!(got.revision, 1);
    }

    pub fn missing_is_not_found(store: &dyn SessionStore) {
        assert_eq!(store.read("nobody"), ReadResult::NotFound);
        assert_eq!(store.read("../../etc/passwd"), ReadResult::NotFound);
    }

    pub fn update_increments(store: &dyn SessionStore) {
        store.write("s2", &sample("s2")).unwrap();
        let after = store
            .update("s2", &mut |s| {
                s.continuation_count += 1;
                true
            })
            .unwrap();
        assert_eq!(after.continuation_count, 1);
        assert_eq!(after.revision, 2);
        assert_eq!(store.read("s2").ok().unwrap().continuation_count, 1);
    }

    pub fn unchanged_update_does_not_write(store: &dyn SessionStore) {
        store.write("s3", &sample("s3")).unwrap();
        let after = store.update("s3", &mut |_| false).unwrap();
        assert_eq!(after.revision, 1);
    }

    pub fn update_missing_errors(store: &dyn SessionStore) {
        let err = store.update("ghost", &mut |_| true).unwrap_err();
        assert!(matches!(err, WardenError::SessionNotFound(_)));
    }

    pub fn delete_and_list(store: &dyn SessionStore) {
        store.write("a", &sample("a")).unwrap();
        store.write("b", &sample("b")).unwrap();
        let mut ids: Vec<_> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        ids.sort();
        assert!(ids.contains(&"a".to_string()) && ids.contains(&"b".to_string()));

        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert_eq!(store.read("a"), ReadResult::NotFound);
    }

    pub fn gc_removes_only_stale_done(store: &dyn SessionStore) {
        let mut done = sample("old-done");
        done.phase = DONE.to_string();
        store.write("old-done", &done).unwrap();
        store.write("old-active", &sample("old-active")).unwrap();

        // Nothing is older than an hour yet.
        assert!(store.gc(Duration::from_secs(3600)).unwrap().is_empty());

        std::thread::sleep(Duration::from_millis(20));
        let removed = store.gc(Duration::from_millis(1)).unwrap();
        assert_eq!(removed, vec!["old-done".to_string()]);
        assert!(store.read("old-active").ok().is_some());
    }

    pub fn concurrent_updates_serialize(store: Arc<dyn SessionStore>) {
        store.write("race", &sample("race")).unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let mut done = 0;
                    while done < 5 {
                        let r = store.update("race", &mut |s| {
                            s.continuation_count += 1;
                            true
                        });
                        match r {
                            Ok(_) => done += 1,
                            Err(WardenError::WriteConflict(_)) => continue,
                            Err(e) => panic!("unexpected error: {e}"),
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.read("race").ok().unwrap().continuation_count, 20);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_mismatched_id() {
        let s = SessionState::new("abc", "impl", "building", 3);
        let yaml = serde_yaml::to_string(&s).unwrap();
        assert!(matches!(
            SessionState::decode_yaml("xyz", &yaml),
            ReadResult::Corrupt(_)
        ));
        assert_eq!(SessionState::decode_yaml("abc", &yaml), ReadResult::Ok(s));
    }

    #[test]
    fn decode_rejects_garbage_and_bad_fields() {
        assert!(matches!(
            SessionState::decode_yaml("a", "impl:building:9:10"),
            ReadResult::Corrupt(_)
        ));
        let mut s = SessionState::new("a", "impl", "building", 3);
        s.continuation_count = -1;
        let yaml = serde_yaml::to_string(&s).unwrap();
        assert!(matches!(
            SessionState::decode_yaml("a", &yaml),
            ReadResult::Corrupt(r) if r.contains("negative")
        ));
    }

    #[test]
    fn non_positive_cap_is_still_valid() {
        let s = SessionState::new("a", "impl", "building", 0);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn require_maps_variants_to_errors() {
        assert!(matches!(
            ReadResult::NotFound.require("x"),
            Err(WardenError::SessionNotFound(_))
        ));
        assert!(matches!(
            ReadResult::Corrupt("bad".into()).require("x"),
            Err(WardenError::CorruptSession { .. })
        ));
    }

    #[test]
    fn backend_parses_from_yaml() {
        let b: StoreBackend = serde_yaml::from_str("redb").unwrap();
        assert_eq!(b, StoreBackend::Redb);
        assert_eq!(StoreBackend::default().as_str(), "file");
    }
}
