use anyhow::Context as _;
use claude_judge::{ClaudeJudge, JudgeOptions};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use warden_core::approval::{ApprovalGateway, TelegramChannel};
use warden_core::arbiter::Arbiter;
use warden_core::config::{self, Config};
use warden_core::continuation::ContinuationArbiter;
use warden_core::log::DecisionLog;
use warden_core::paths;
use warden_core::session::{open_store, SessionStore};
use warden_core::workflow::WorkflowRegistry;

/// Everything a command needs for one project, loaded once per invocation.
pub struct Context {
    pub root: PathBuf,
    pub config: Config,
    pub store: Arc<dyn SessionStore>,
    pub registry: Arc<WorkflowRegistry>,
    pub log: DecisionLog,
}

impl Context {
    pub fn load(root: &Path) -> anyhow::Result<Self> {
        Self::load_with(root, &config::process_env())
    }

    /// Load with an explicit `WARDEN_*` environment.
    pub fn load_with(root: &Path, env: &HashMap<String, String>) -> anyhow::Result<Self> {
        let config = Config::load_with(root, env).context("failed to load config")?;
        let store = open_store(root, config.session_store)
            .with_context(|| format!("failed to open {} session store", config.session_store.as_str()))?;
        let registry = Arc::new(config.registry());
        let log = if config.debug_log {
            DecisionLog::to_file(paths::debug_log_path(root))
        } else {
            DecisionLog::disabled()
        };
        Ok(Self {
            root: root.to_path_buf(),
            config,
            store,
            registry,
            log,
        })
    }

    /// Arbiter with every escalation tier the config enables.
    pub fn arbiter(&self) -> anyhow::Result<Arbiter> {
        let esc = &self.config.escalation;
        let mut arbiter = Arbiter::new(self.config.rule_set(), Arc::clone(&self.registry))
            .workflow_auto_allow(esc.workflow_auto_allow);

        if esc.ml_judge.enabled {
            let opts = JudgeOptions::new(esc.ml_judge.command.clone())
                .with_model(esc.ml_judge.model.clone());
            arbiter = arbiter.with_judge(
                Arc::new(ClaudeJudge::new(opts)),
                Duration::from_secs(esc.ml_judge.timeout_seconds),
            );
        }

        if let Some(channel) = self.telegram()? {
            arbiter = arbiter.with_approver(Arc::new(channel), self.config.approval_settings());
        } else if esc.remote_approval.enabled {
            tracing::warn!("remote approval enabled but telegram credentials are missing; skipping");
        }
        Ok(arbiter)
    }

    /// Approval gateway over Telegram, when remote approval is enabled and
    /// credentials are present.
    pub fn telegram(&self) -> anyhow::Result<Option<ApprovalGateway<TelegramChannel>>> {
        let remote = &self.config.escalation.remote_approval;
        let Some((token, chat_id)) = remote.telegram_credentials() else {
            return Ok(None);
        };
        let channel = TelegramChannel::with_base_url(token, remote.telegram.api_base.clone())
            .context("failed to build telegram client")?
            .restrict_to_chat(chat_id);
        Ok(Some(ApprovalGateway::new(channel, chat_id)))
    }

    pub fn continuation(&self) -> ContinuationArbiter {
        ContinuationArbiter::new(Arc::clone(&self.store), Arc::clone(&self.registry))
    }
}
