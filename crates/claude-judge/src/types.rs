use serde::Deserialize;

/// How to invoke the Claude CLI for a judgment.
#[derive(Debug, Clone)]
pub struct JudgeOptions {
    /// Defaults to `claude` on `PATH`.
    pub executable: String,
    pub model: Option<String>,
    /// Appended after the built-in flags.
    pub extra_args: Vec<String>,
}

impl Default for JudgeOptions {
    fn default() -> Self {
        Self {
            executable: "claude".to_string(),
            model: None,
            extra_args: Vec::new(),
        }
    }
}

impl JudgeOptions {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }
}

/// The single JSON object printed by `claude --print --output-format json`.
#[derive(Debug, Clone, Deserialize)]
pub struct CliResult {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub result: Option<String>,
}
