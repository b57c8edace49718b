//! Issue/session index: which session is working on which external ticket.
//!
//! Layout:
//!   .warden/issues.yaml   list of `{issue_id, session_id, created_at}`
//!
//! A notification collaborator looks sessions up by ticket and calls
//! [`take_linked`] once it has sent the terminal notice, so each ticket is
//! notified at most once and an unsent notice keeps its entry.

use crate::error::Result;
use crate::io::{self, FileLock};
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const LOCK_TIMEOUT: Duration = Duration::from_secs(2);
const STALE_LOCK: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueEntry {
    pub issue_id: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Internal file I/O
// ---------------------------------------------------------------------------

fn load_all(root: &Path) -> Result<Vec<IssueEntry>> {
    let path = paths::issues_path(root);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path)?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_yaml::from_str(&content)?)
}

fn save_all(root: &Path, entries: &[IssueEntry]) -> Result<()> {
    let content = serde_yaml::to_string(entries)?;
    io::atomic_write(&paths::issues_path(root), content.as_bytes())
}

/// Run `f` over the index with the index lock held, saving if it reports a
/// change.
fn modify<T>(root: &Path, f: impl FnOnce(&mut Vec<IssueEntry>) -> (bool, T)) -> Result<T> {
    let lock_path = paths::issues_path(root).with_extension("lock");
    let _guard = FileLock::acquire(&lock_path, LOCK_TIMEOUT, STALE_LOCK)?;
    let mut entries = load_all(root)?;
    let (changed, out) = f(&mut entries);
    if changed {
        save_all(root, &entries)?;
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Map `issue_id` to `session_id`, replacing any previous mapping.
/// Returns the session previously linked, if any.
pub fn link(root: &Path, issue_id: &str, session_id: &str) -> Result<Option<String>> {
    let previous = modify(root, |entries| {
        let previous = entries
            .iter()
            .position(|e| e.issue_id == issue_id)
            .map(|i| entries.remove(i).session_id);
        entries.push(IssueEntry {
            issue_id: issue_id.to_string(),
            session_id: session_id.to_string(),
            created_at: Utc::now(),
        });
        (true, previous)
    })?;
    tracing::debug!(issue = issue_id, session = session_id, "linked issue");
    Ok(previous)
}

pub fn lookup(root: &Path, issue_id: &str) -> Result<Option<String>> {
    Ok(load_all(root)?
        .into_iter()
        .find(|e| e.issue_id == issue_id)
        .map(|e| e.session_id))
}

/// Remove the mapping for `issue_id`. Returns whether one existed.
pub fn remove(root: &Path, issue_id: &str) -> Result<bool> {
    Ok(take(root, issue_id)?.is_some())
}

/// Look up and remove in one locked write.
pub fn take(root: &Path, issue_id: &str) -> Result<Option<String>> {
    modify(root, |entries| {
        match entries.iter().position(|e| e.issue_id == issue_id) {
            Some(i) => (true, Some(entries.remove(i).session_id)),
            None => (false, None),
        }
    })
}

/// Remove the mapping for `issue_id` only while it still points at
/// `session_id`. Returns whether it was removed.
pub fn take_linked(root: &Path, issue_id: &str, session_id: &str) -> Result<bool> {
    modify(root, |entries| {
        match entries
            .iter()
            .position(|e| e.issue_id == issue_id && e.session_id == session_id)
        {
            Some(i) => {
                entries.remove(i);
                (true, true)
            }
            None => (false, false),
        }
    })
}

pub fn list(root: &Path) -> Result<Vec<IssueEntry>> {
    load_all(root)
}

/// Issue linked to `session_id`, if any.
pub fn issue_for_session(root: &Path, session_id: &str) -> Result<Option<String>> {
    Ok(load_all(root)?
        .into_iter()
        .find(|e| e.session_id == session_id)
        .map(|e| e.issue_id))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
