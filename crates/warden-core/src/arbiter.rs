//! The escalation pipeline behind every permission decision.
//!
//! Tiers run cheapest first and stop at the first verdict that is not `Ask`:
//!
//! 1. static rules (deny/ask/allow)
//! 2. workflow auto-allow for the session's current phase
//! 3. ML judge, under a hard timeout
//! 4. remote human approval
//!
//! Whatever is left unresolved, including any tier failure, is `Ask` with
//! source `FailSafe`.

use crate::approval::{ApprovalRequest, Approver};
use crate::judge::{Judge, JudgeRequest};
use crate::rules::RuleSet;
use crate::session::{ReadResult, SessionStore};
use crate::types::{ActionDescriptor, Decision, DecisionSource, Verdict};
use crate::workflow::WorkflowRegistry;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// SessionContext
// ---------------------------------------------------------------------------

/// What the arbiter knows about the session an action belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: Option<String>,
    pub workflow_id: Option<String>,
    pub phase: Option<String>,
}

impl SessionContext {
    /// Context for `session_id`. Missing or corrupt state yields a context
    /// with no active workflow.
    pub fn from_store(store: &dyn SessionStore, session_id: &str) -> Self {
        let mut ctx = Self {
            session_id: Some(session_id.to_string()),
            ..Default::default()
        };
        match store.read(session_id) {
            ReadResult::Ok(state) => {
                ctx.workflow_id = Some(state.workflow_id);
                ctx.phase = Some(state.phase);
            }
            ReadResult::NotFound => {}
            ReadResult::Corrupt(reason) => {
                tracing::warn!(session = session_id, reason = %reason, "ignoring corrupt session state");
            }
        }
        ctx
    }

    pub fn active_workflow(&self) -> Option<(&str, &str)> {
        Some((self.workflow_id.as_deref()?, self.phase.as_deref()?))
    }
}

// ---------------------------------------------------------------------------
// Arbiter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalSettings {
    pub timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub allowed_approver_ids: BTreeSet<String>,
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            poll_interval_secs: 5,
            allowed_approver_ids: BTreeSet::new(),
        }
    }
}

pub struct Arbiter {
    rules: RuleSet,
    workflows: Arc<WorkflowRegistry>,
    workflow_auto_allow: bool,
    judge: Option<(Arc<dyn Judge>, Duration)>,
    approver: Option<(Arc<dyn Approver>, ApprovalSettings)>,
}

impl Arbiter {
    /// Rules and workflow auto-allow only; add tiers with the `with_*`
    /// builders.
    pub fn new(rules: RuleSet, workflows: Arc<WorkflowRegistry>) -> Self {
        Self {
            rules,
            workflows,
            workflow_auto_allow: true,
            judge: None,
            approver: None,
        }
    }

    pub fn workflow_auto_allow(mut self, enabled: bool) -> Self {
        self.workflow_auto_allow = enabled;
        self
    }

    pub fn with_judge(mut self, judge: Arc<dyn Judge>, timeout: Duration) -> Self {
        self.judge = Some((judge, timeout));
        self
    }

    pub fn with_approver(mut self, approver: Arc<dyn Approver>, settings: ApprovalSettings) -> Self {
        self.approver = Some((approver, settings));
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub async fn decide(&self, descriptor: &ActionDescriptor, ctx: &SessionContext) -> Decision {
        let decision = self.escalate(descriptor, ctx).await;
        tracing::info!(
            tool = %descriptor.tool,
            verdict = %decision.verdict,
            source = %decision.source,
            session = ctx.session_id.as_deref().unwrap_or("-"),
            "decision"
        );
        decision
    }

    async fn escalate(&self, descriptor: &ActionDescriptor, ctx: &SessionContext) -> Decision {
        // 1. Static rules.
        let outcome = self.rules.explain(descriptor);
        if !outcome.verdict.is_ask() {
            return Decision::new(outcome.verdict, DecisionSource::RuleMatch, outcome.reason());
        }
        let mut reason = outcome.reason();

        // 2. Workflow auto-allow.
        if self.workflow_auto_allow {
            if let Some((workflow, phase)) = ctx.active_workflow() {
                if self.workflows.is_auto_allowed(workflow, phase, descriptor) {
                    return Decision::new(
                        Verdict::Allow,
                        DecisionSource::WorkflowAutoAllow,
                        format!("expected during phase '{phase}' of workflow '{workflow}'"),
                    );
                }
            }
        }

        // 3. ML judge.
        if let Some((judge, timeout)) = &self.judge {
            let request = JudgeRequest {
                descriptor: descriptor.clone(),
                workflow_id: ctx.workflow_id.clone(),
                phase: ctx.phase.clone(),
            };
            match tokio::time::timeout(*timeout, judge.judge(&request)).await {
                Ok(Ok(Verdict::Ask)) => reason = "ml judge deferred to a human".to_string(),
                Ok(Ok(verdict)) => {
                    return Decision::new(verdict, DecisionSource::MlJudge, "ml judge verdict");
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "ml judge failed");
                    reason = format!("ml judge failed: {e}");
                }
                Err(_) => {
                    tracing::warn!(timeout_secs = timeout.as_secs(), "ml judge timed out");
                    reason = "ml judge timed out".to_string();
                }
            }
        }

        // 4. Remote approval.
        if let Some((approver, settings)) = &self.approver {
            let request = ApprovalRequest::new(descriptor, ctx.session_id.as_deref())
                .with_summary(reason)
                .with_timing(settings.timeout_secs, settings.poll_interval_secs)
                .with_approvers(settings.allowed_approver_ids.iter().cloned());
            let outcome = approver.request_approval(&request).await;
            return match outcome.verdict() {
                Verdict::Ask => Decision::fail_safe(outcome.describe()),
                verdict => Decision::new(verdict, DecisionSource::RemoteApproval, outcome.describe()),
            };
        }

        Decision::fail_safe(reason)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
