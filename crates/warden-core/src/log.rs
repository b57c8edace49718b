//! Optional JSONL trail of decisions, for diagnosing why something was
//! allowed or blocked.

use crate::io::append_line;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    /// `pre_tool_use`, `stop`, `post_tool_use`, `prompt`.
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub detail: Value,
}

impl LogEntry {
    pub fn new(event: impl Into<String>, session_id: Option<&str>, detail: impl Serialize) -> Self {
        Self {
            at: Utc::now(),
            event: event.into(),
            session_id: session_id.map(str::to_string),
            detail: serde_json::to_value(detail).unwrap_or(Value::Null),
        }
    }
}

/// Appends entries to `.warden/debug.log` when enabled; a no-op otherwise.
#[derive(Debug, Clone)]
pub struct DecisionLog {
    path: Option<PathBuf>,
}

impl DecisionLog {
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    /// Never fails: a log that cannot be written only produces a warning.
    pub fn record(&self, entry: &LogEntry) {
        let Some(path) = &self.path else {
            return;
        };
        let line = match serde_json::to_string(entry) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode debug log entry");
                return;
            }
        };
        if let Err(e) = append_line(path, &line) {
            tracing::warn!(path = %path.display(), error = %e, "failed to write debug log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Decision;
    use tempfile::TempDir;

    #[test]
    fn appends_one_json_line_per_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".warden/debug.log");
        let log = DecisionLog::to_file(&path);

        let d = Decision::fail_safe("no rule matched");
        log.record(&LogEntry::new("pre_tool_use", Some("s1"), &d));
        log.record(&LogEntry::new("stop", None, serde_json::json!({"verdict": "ask"})));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "pre_tool_use");
        assert_eq!(first["session_id"], "s1");
        assert_eq!(first["detail"]["source"], "fail_safe");
    }

    #[test]
    fn disabled_writes_nothing() {
        let log = DecisionLog::disabled();
        assert!(!log.is_enabled());
        log.record(&LogEntry::new("stop", None, Value::Null));
    }

    #[test]
    fn unwritable_path_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be.
        let path = dir.path().join("log");
        std::fs::create_dir_all(&path).unwrap();
        DecisionLog::to_file(&path).record(&LogEntry::new("stop", None, Value::Null));
    }
}
