use thiserror::Error;

#[derive(Debug, Error)]
pub enum WardenError {
    #[error("invalid session id '{0}': must be letters, digits, '-' or '_'")]
    InvalidSessionId(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("corrupt session record '{session}': {reason}")]
    CorruptSession { session: String, reason: String },

    #[error("concurrent write conflict on session '{0}'")]
    WriteConflict(String),

    #[error("timed out waiting for lock: {0}")]
    LockTimeout(String),

    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("invalid phase '{phase}' for workflow '{workflow}'")]
    InvalidPhase { workflow: String, phase: String },

    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid verdict '{0}': must be allow, deny, or ask")]
    InvalidVerdict(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("session store error: {0}")]
    Store(String),

    #[error("messaging channel error: {0}")]
    Channel(String),

    #[error("judge error: {0}")]
    Judge(String),

    #[error("home directory not found: set HOME or WARDEN_HOME")]
    HomeNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WardenError>;
