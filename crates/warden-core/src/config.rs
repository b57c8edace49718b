//! Layered configuration.
//!
//! Layers, later wins:
//!   1. built-in defaults
//!   2. user       `~/.config/warden/config.yaml` (or `$WARDEN_HOME/config.yaml`)
//!   3. project    `.warden/config.yaml`
//!   4. local      `.warden/config.local.yaml`
//!   5. environment (`WARDEN_*`)
//!
//! File layers are merged as YAML trees before deserializing: mappings merge
//! key by key, scalars and sequences replace. Overriding `rules.deny` thus
//! keeps the default `ask` and `allow` lists, and a project can add a
//! workflow without restating the built-in ones.

use crate::arbiter::ApprovalSettings;
use crate::error::{Result, WardenError};
use crate::paths;
use crate::rules::{default_rules, RuleSet, RuleTable};
use crate::session::StoreBackend;
use crate::workflow::{default_workflows, WorkflowDef, WorkflowRegistry};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

pub const ENV_HOME: &str = "WARDEN_HOME";
pub const ENV_MAX_CONTINUATIONS: &str = "WARDEN_MAX_CONTINUATIONS";
pub const ENV_ML_JUDGE: &str = "WARDEN_ML_JUDGE";
pub const ENV_REMOTE_APPROVAL: &str = "WARDEN_REMOTE_APPROVAL";
pub const ENV_TELEGRAM_TOKEN: &str = "WARDEN_TELEGRAM_TOKEN";
pub const ENV_TELEGRAM_CHAT_ID: &str = "WARDEN_TELEGRAM_CHAT_ID";
pub const ENV_DEBUG_LOG: &str = "WARDEN_DEBUG_LOG";

const REDACTED: &str = "***";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Escalation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationConfig {
    #[serde(default = "default_true")]
    pub workflow_auto_allow: bool,
    #[serde(default)]
    pub ml_judge: MlJudgeConfig,
    #[serde(default)]
    pub remote_approval: RemoteApprovalConfig,
}

fn default_true() -> bool {
    true
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            workflow_auto_allow: true,
            ml_judge: MlJudgeConfig::default(),
            remote_approval: RemoteApprovalConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlJudgeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_judge_command")]
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "default_judge_timeout")]
    pub timeout_seconds: u64,
}

fn default_judge_command() -> String {
    "claude".to_string()
}

fn default_judge_timeout() -> u64 {
    30
}

impl Default for MlJudgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: default_judge_command(),
            model: None,
            timeout_seconds: default_judge_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteApprovalConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_approval_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Empty means anyone in the chat may answer.
    #[serde(default)]
    pub allowed_approver_ids: Vec<String>,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

fn default_approval_timeout() -> u64 {
    300
}

fn default_poll_interval() -> u64 {
    5
}

impl Default for RemoteApprovalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_seconds: default_approval_timeout(),
            poll_interval_seconds: default_poll_interval(),
            allowed_approver_ids: Vec::new(),
            telegram: TelegramConfig::default(),
        }
    }
}

impl RemoteApprovalConfig {
    /// `(bot_token, chat_id)` when remote approval is enabled and both are set.
    pub fn telegram_credentials(&self) -> Option<(&str, &str)> {
        if !self.enabled {
            return None;
        }
        let token = self.telegram.bot_token.as_deref().filter(|s| !s.is_empty())?;
        let chat = self.telegram.chat_id.as_deref().filter(|s| !s.is_empty())?;
        Some((token, chat))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String {
    crate::approval::DEFAULT_API_BASE.to_string()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            api_base: default_api_base(),
        }
    }
}

// ---------------------------------------------------------------------------
// Continuation / workers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuationConfig {
    #[serde(default = "default_max_continuations")]
    pub max_continuations: i64,
    /// Finished sessions older than this are removed by `session gc`.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
}

fn default_max_continuations() -> i64 {
    10
}

fn default_retention_hours() -> u64 {
    24
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            max_continuations: default_max_continuations(),
            retention_hours: default_retention_hours(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_max_active")]
    pub max_active: usize,
    /// Program and leading arguments; the rendered prompt is appended.
    /// `{session}` and `{issue}` are replaced in every argument.
    #[serde(default = "default_worker_command")]
    pub command: Vec<String>,
    #[serde(default = "default_worker_prompt")]
    pub prompt: String,
}

fn default_max_active() -> usize {
    2
}

fn default_worker_command() -> Vec<String> {
    ["claude", "--session-id", "{session}", "-p"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_worker_prompt() -> String {
    "/impl {issue}".to_string()
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            max_active: default_max_active(),
            command: default_worker_command(),
            prompt: default_worker_prompt(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub continuation: ContinuationConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub session_store: StoreBackend,
    #[serde(default = "default_rules")]
    pub rules: RuleTable,
    #[serde(default = "default_workflows")]
    pub workflows: BTreeMap<String, WorkflowDef>,
    #[serde(default)]
    pub debug_log: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            escalation: EscalationConfig::default(),
            continuation: ContinuationConfig::default(),
            workers: WorkersConfig::default(),
            session_store: StoreBackend::default(),
            rules: default_rules(),
            workflows: default_workflows(),
            debug_log: false,
        }
    }
}

/// Snapshot of the process environment, so loading stays testable.
pub fn process_env() -> HashMap<String, String> {
    std::env::vars().filter(|(k, _)| k.starts_with("WARDEN_")).collect()
}

impl Config {
    /// Load all layers for the project at `root` using the process
    /// environment.
    pub fn load(root: &Path) -> Result<Self> {
        Self::load_with(root, &process_env())
    }

    pub fn load_with(root: &Path, env: &HashMap<String, String>) -> Result<Self> {
        let mut merged = serde_yaml::to_value(Config::default())?;
        for path in Self::layer_paths(root, env) {
            if let Some(overlay) = read_layer(&path)? {
                tracing::debug!(path = %path.display(), "applying config layer");
                deep_merge(&mut merged, &overlay);
            }
        }
        let mut cfg: Config = serde_yaml::from_value(merged)
            .map_err(|e| WardenError::InvalidConfig(e.to_string()))?;
        cfg.apply_env(env);
        Ok(cfg)
    }

    /// File layers in precedence order (lowest first), whether or not they
    /// exist.
    pub fn layer_paths(root: &Path, env: &HashMap<String, String>) -> Vec<PathBuf> {
        let mut layers = Vec::new();
        let home = env.get(ENV_HOME).map(PathBuf::from);
        match paths::user_config_path(home.as_deref()) {
            Ok(p) => layers.push(p),
            Err(e) => tracing::debug!(error = %e, "skipping user config layer"),
        }
        layers.push(paths::config_path(root));
        layers.push(paths::local_config_path(root));
        layers
    }

    fn apply_env(&mut self, env: &HashMap<String, String>) {
        if let Some(raw) = env.get(ENV_MAX_CONTINUATIONS) {
            self.continuation.max_continuations = raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "{ENV_MAX_CONTINUATIONS} is not a number; continuation disabled");
                0
            });
        }
        if let Some(b) = env_bool(env, ENV_ML_JUDGE) {
            self.escalation.ml_judge.enabled = b;
        }
        if let Some(b) = env_bool(env, ENV_REMOTE_APPROVAL) {
            self.escalation.remote_approval.enabled = b;
        }
        if let Some(b) = env_bool(env, ENV_DEBUG_LOG) {
            self.debug_log = b;
        }
        if let Some(token) = env.get(ENV_TELEGRAM_TOKEN) {
            self.escalation.remote_approval.telegram.bot_token = Some(token.clone());
        }
        if let Some(chat) = env.get(ENV_TELEGRAM_CHAT_ID) {
            self.escalation.remote_approval.telegram.chat_id = Some(chat.clone());
        }
    }

    /// Cap for a new session of `workflow_id`: the workflow's own override,
    /// else the global setting.
    pub fn max_continuations_for(&self, workflow_id: &str) -> i64 {
        self.workflows
            .get(workflow_id)
            .and_then(|w| w.max_continuations)
            .unwrap_or(self.continuation.max_continuations)
    }

    pub fn rule_set(&self) -> RuleSet {
        RuleSet::compile(&self.rules)
    }

    pub fn registry(&self) -> WorkflowRegistry {
        WorkflowRegistry::compile(&self.workflows)
    }

    pub fn approval_settings(&self) -> ApprovalSettings {
        let remote = &self.escalation.remote_approval;
        ApprovalSettings {
            timeout_secs: remote.timeout_seconds,
            poll_interval_secs: remote.poll_interval_seconds,
            allowed_approver_ids: remote.allowed_approver_ids.iter().cloned().collect(),
        }
    }

    /// Copy with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mut cfg = self.clone();
        if cfg.escalation.remote_approval.telegram.bot_token.is_some() {
            cfg.escalation.remote_approval.telegram.bot_token = Some(REDACTED.to_string());
        }
        cfg
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        for (bucket, pattern, error) in self.rules.invalid_patterns() {
            warnings.push(ConfigWarning::error(format!(
                "{bucket} rule /{pattern}/ does not compile and will never match: {error}"
            )));
        }

        for (id, def) in &self.workflows {
            for problem in def.validate() {
                warnings.push(ConfigWarning::warning(format!("workflow '{id}': {problem}")));
            }
            if let Some(max) = def.max_continuations {
                if max <= 0 {
                    warnings.push(ConfigWarning::warning(format!(
                        "workflow '{id}' has max_continuations={max}; it will never continue unattended"
                    )));
                }
            }
        }

        if self.continuation.max_continuations <= 0 {
            warnings.push(ConfigWarning::warning(format!(
                "continuation.max_continuations={}; sessions will never continue unattended",
                self.continuation.max_continuations
            )));
        }

        let judge = &self.escalation.ml_judge;
        if judge.enabled && judge.command.trim().is_empty() {
            warnings.push(ConfigWarning::error("ml_judge is enabled but command is empty"));
        }
        if judge.enabled && judge.timeout_seconds == 0 {
            warnings.push(ConfigWarning::warning(
                "ml_judge.timeout_seconds=0; every judgment will time out",
            ));
        }

        let remote = &self.escalation.remote_approval;
        if remote.enabled {
            if remote.telegram_credentials().is_none() {
                warnings.push(ConfigWarning::error(
                    "remote_approval is enabled but telegram.bot_token or telegram.chat_id is missing",
                ));
            }
            if remote.poll_interval_seconds == 0 {
                warnings.push(ConfigWarning::warning(
                    "remote_approval.poll_interval_seconds=0; using 1",
                ));
            }
            if remote.timeout_seconds == 0 {
                warnings.push(ConfigWarning::warning(
                    "remote_approval.timeout_seconds=0; requests time out immediately",
                ));
            }
            if remote.allowed_approver_ids.is_empty() {
                warnings.push(ConfigWarning::warning(
                    "remote_approval.allowed_approver_ids is empty; anyone in the chat can approve",
                ));
            }
        }

        if self.workers.max_active == 0 {
            warnings.push(ConfigWarning::warning(
                "workers.max_active=0; dispatch will never start a worker",
            ));
        }
        if self.workers.command.is_empty() {
            warnings.push(ConfigWarning::error("workers.command is empty"));
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Layer merging
// ---------------------------------------------------------------------------

fn read_layer(path: &Path) -> Result<Option<Value>> {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let value: Value = serde_yaml::from_str(&data).map_err(|e| {
        WardenError::InvalidConfig(format!("{}: {e}", path.display()))
    })?;
    Ok(match value {
        Value::Null => None,
        v => Some(v),
    })
}

/// Recursively merge `overlay` into `base`. Mappings merge per key; any
/// other overlay value replaces the base value.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_val) => deep_merge(base_val, overlay_val),
                    None => {
                        base_map.insert(key.clone(), overlay_val.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

fn env_bool(env: &HashMap<String, String>, key: &str) -> Option<bool> {
    let raw = env.get(key)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => {
            tracing::warn!(var = key, value = %raw, "ignoring unrecognized boolean");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::atomic_write;
    use tempfile::TempDir;

    struct Fixture {
        home: TempDir,
        root: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                home: TempDir::new().unwrap(),
                root: TempDir::new().unwrap(),
            }
        }

        fn env(&self) -> HashMap<String, String> {
            HashMap::from([(
                ENV_HOME.to_string(),
                self.home.path().display().to_string(),
            )])
        }

        fn user(&self, yaml: &str) {
            atomic_write(&self.home.path().join("config.yaml"), yaml.as_bytes()).unwrap();
        }

        fn project(&self, yaml: &str) {
            atomic_write(&paths::config_path(self.root.path()), yaml.as_bytes()).unwrap();
        }

        fn local(&self, yaml: &str) {
            atomic_write(&paths::local_config_path(self.root.path()), yaml.as_bytes()).unwrap();
        }

        fn load(&self, extra: &[(&str, &str)]) -> Config {
            let mut env = self.env();
            for (k, v) in extra {
                env.insert(k.to_string(), v.to_string());
            }
            Config::load_with(self.root.path(), &env).unwrap()
        }
    }

    #[test]
    fn defaults_without_files() {
        let fx = Fixture::new();
        let cfg = fx.load(&[]);
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.continuation.max_continuations, 10);
        assert!(!cfg.escalation.ml_judge.enabled);
        assert!(cfg.workflows.contains_key("impl"));
    }

    #[test]
    fn later_layers_win() {
        let fx = Fixture::new();
        fx.user("continuation:\n  max_continuations: 3\n  retention_hours: 1\n");
        fx.project("continuation:\n  max_continuations: 5\n");
        fx.local("escalation:\n  ml_judge:\n    enabled: true\n");
        let cfg = fx.load(&[]);
        assert_eq!(cfg.continuation.max_continuations, 5);
        // Untouched sibling from the user layer survives.
        assert_eq!(cfg.continuation.retention_hours, 1);
        assert!(cfg.escalation.ml_judge.enabled);
        assert_eq!(cfg.escalation.ml_judge.command, "claude");
    }

    #[test]
    fn env_overrides_files() {
        let fx = Fixture::new();
        fx.project("continuation:\n  max_continuations: 5\n");
        let cfg = fx.load(&[
            (ENV_MAX_CONTINUATIONS, "7"),
            (ENV_REMOTE_APPROVAL, "yes"),
            (ENV_TELEGRAM_TOKEN, "123:abc"),
            (ENV_TELEGRAM_CHAT_ID, "-100"),
        ]);
        assert_eq!(cfg.continuation.max_continuations, 7);
        assert_eq!(
            cfg.escalation.remote_approval.telegram_credentials(),
            Some(("123:abc", "-100"))
        );
    }

    #[test]
    fn non_numeric_cap_disables_continuation() {
        let fx = Fixture::new();
        let cfg = fx.load(&[(ENV_MAX_CONTINUATIONS, "lots")]);
        assert_eq!(cfg.continuation.max_continuations, 0);
    }

    #[test]
    fn rule_lists_replace_per_bucket() {
        let fx = Fixture::new();
        fx.project("rules:\n  deny:\n    - { tool: Bash, pattern: 'shutdown' }\n");
        let cfg = fx.load(&[]);
        assert_eq!(cfg.rules.deny.len(), 1);
        assert_eq!(cfg.rules.ask, default_rules().ask);
    }

    #[test]
    fn project_workflow_is_added_alongside_defaults() {
        let fx = Fixture::new();
        fx.project(
            "workflows:\n  docs:\n    phases: [writing, done]\n    max_continuations: 2\n",
        );
        let cfg = fx.load(&[]);
        assert!(cfg.workflows.contains_key("docs"));
        assert!(cfg.workflows.contains_key("plan"));
        assert_eq!(cfg.max_continuations_for("docs"), 2);
        assert_eq!(cfg.max_continuations_for("impl"), 10);
    }

    #[test]
    fn empty_layer_file_is_ignored() {
        let fx = Fixture::new();
        fx.project("");
        assert_eq!(fx.load(&[]), Config::default());
    }

    #[test]
    fn malformed_layer_is_invalid_config() {
        let fx = Fixture::new();
        fx.project("continuation: [unclosed");
        let err = Config::load_with(fx.root.path(), &fx.env()).unwrap_err();
        assert!(matches!(err, WardenError::InvalidConfig(_)));
    }

    #[test]
    fn validate_flags_problems() {
        let mut cfg = Config::default();
        assert!(cfg.validate().is_empty(), "{:?}", cfg.validate());

        cfg.rules.allow.push(crate::rules::RuleSpec::new("Bash", "(oops"));
        cfg.continuation.max_continuations = 0;
        cfg.escalation.remote_approval.enabled = true;
        cfg.escalation.remote_approval.poll_interval_seconds = 0;
        let warnings = cfg.validate();

        let errors: Vec<_> = warnings
            .iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message.as_str())
            .collect();
        assert!(errors.iter().any(|m| m.contains("(oops")));
        assert!(errors.iter().any(|m| m.contains("bot_token")));
        assert!(warnings.iter().any(|w| w.message.contains("poll_interval")));
        assert!(warnings.iter().any(|w| w.message.contains("max_continuations=0")));
    }

    #[test]
    fn approval_settings_follow_config() {
        let mut cfg = Config::default();
        cfg.escalation.remote_approval.timeout_seconds = 60;
        cfg.escalation.remote_approval.allowed_approver_ids = vec!["42".into(), "42".into()];
        let settings = cfg.approval_settings();
        assert_eq!(settings.timeout_secs, 60);
        assert_eq!(settings.poll_interval_secs, 5);
        assert_eq!(settings.allowed_approver_ids.len(), 1);
        assert!(!cfg.rule_set().is_empty());
        assert!(cfg.registry().contains("plan"));
    }

    #[test]
    fn redacted_hides_token() {
        let mut cfg = Config::default();
        cfg.escalation.remote_approval.telegram.bot_token = Some("secret".into());
        let yaml = serde_yaml::to_string(&cfg.redacted()).unwrap();
        assert!(!yaml.contains("secret"));
        assert!(yaml.contains(REDACTED));
    }

    #[test]
    fn deep_merge_semantics() {
        let mut base: Value = serde_yaml::from_str("a: {x: 1, y: [1, 2]}\nb: 1").unwrap();
        let overlay: Value = serde_yaml::from_str("a: {y: [3]}\nc: true").unwrap();
        deep_merge(&mut base, &overlay);
        let expected: Value = serde_yaml::from_str("a: {x: 1, y: [3]}\nb: 1\nc: true").unwrap();
        assert_eq!(base, expected);
    }
}
