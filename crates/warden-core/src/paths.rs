use crate::error::{Result, WardenError};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const WARDEN_DIR: &str = ".warden";
pub const SESSIONS_DIR: &str = ".warden/sessions";

pub const CONFIG_FILE: &str = ".warden/config.yaml";
pub const LOCAL_CONFIG_FILE: &str = ".warden/config.local.yaml";
pub const SESSIONS_DB: &str = ".warden/sessions.redb";
pub const ISSUES_FILE: &str = ".warden/issues.yaml";
pub const DEBUG_LOG: &str = ".warden/debug.log";

/// User-level config, relative to the home directory.
pub const USER_CONFIG_FILE: &str = ".config/warden/config.yaml";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn warden_dir(root: &Path) -> PathBuf {
    root.join(WARDEN_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn local_config_path(root: &Path) -> PathBuf {
    root.join(LOCAL_CONFIG_FILE)
}

pub fn sessions_dir(root: &Path) -> PathBuf {
    root.join(SESSIONS_DIR)
}

pub fn sessions_db_path(root: &Path) -> PathBuf {
    root.join(SESSIONS_DB)
}

pub fn issues_path(root: &Path) -> PathBuf {
    root.join(ISSUES_FILE)
}

pub fn debug_log_path(root: &Path) -> PathBuf {
    root.join(DEBUG_LOG)
}

/// Resolve the user config file.
///
/// `WARDEN_HOME` (passed in as `warden_home`) points at a directory holding
/// `config.yaml` directly; otherwise `~/.config/warden/config.yaml` is used.
pub fn user_config_path(warden_home: Option<&Path>) -> Result<PathBuf> {
    if let Some(h) = warden_home {
        return Ok(h.join("config.yaml"));
    }
    let home = home::home_dir().ok_or(WardenError::HomeNotFound)?;
    Ok(home.join(USER_CONFIG_FILE))
}

// ---------------------------------------------------------------------------
// Session id validation
// ---------------------------------------------------------------------------

static SESSION_ID_RE: OnceLock<Regex> = OnceLock::new();

fn session_id_re() -> &'static Regex {
    SESSION_ID_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-]+$").unwrap())
}

/// Session ids become file names, so only a conservative character set is
/// accepted.
pub fn validate_session_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 128 || !session_id_re().is_match(id) {
        return Err(WardenError::InvalidSessionId(id.to_string()));
    }
    Ok(())
}
