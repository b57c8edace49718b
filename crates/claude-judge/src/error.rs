use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClaudeJudgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse claude output: {source}\n  output: {output}")]
    Parse {
        output: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Process error: {0}")]
    Process(String),

    #[error("Non-conforming answer: {0:?}")]
    NonConforming(String),
}

impl From<ClaudeJudgeError> for warden_core::WardenError {
    fn from(e: ClaudeJudgeError) -> Self {
        warden_core::WardenError::Judge(e.to_string())
    }
}
