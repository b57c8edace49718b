//! Host hook entry points.
//!
//! Each hook reads one JSON payload on stdin and prints one JSON object on
//! stdout. Hooks never fail the host: a payload or configuration problem
//! still produces a reply, and for decision hooks that reply is `ask`.

use crate::context::Context;
use crate::output::print_compact;
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::Read;
use std::path::Path;
use warden_core::arbiter::SessionContext;
use warden_core::continuation::ContinuationDecision;
use warden_core::issue;
use warden_core::log::LogEntry;
use warden_core::session::{ReadResult, SessionState};
use warden_core::target::descriptor_from_payload;
use warden_core::types::Decision;
use warden_core::workflow::WorkflowEvent;

#[derive(Subcommand)]
pub enum HookSubcommand {
    /// Decide allow | deny | ask for a tool call
    PreToolUse,
    /// Advance the session's workflow phase after a tool call
    PostToolUse,
    /// Decide whether the agent may continue unattended
    Stop,
    /// Start a session when the prompt is a workflow command
    Prompt,
}

/// Fields the hooks read from the host payload. Unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct HookPayload {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default)]
    pub prompt: Option<String>,
}

pub fn read_payload(mut input: impl Read) -> Result<HookPayload, String> {
    let mut raw = String::new();
    input
        .read_to_string(&mut raw)
        .map_err(|e| format!("failed to read stdin: {e}"))?;
    serde_json::from_str(&raw).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcommand: HookSubcommand) -> anyhow::Result<()> {
    let payload = read_payload(std::io::stdin().lock());
    let ctx = Context::load(root).map_err(|e| format!("{e:#}"));
    let reply = match subcommand {
        HookSubcommand::PreToolUse => handle(ctx, payload, pre_tool_use, Decision::fail_safe),
        HookSubcommand::PostToolUse => handle(ctx, payload, post_tool_use, PhaseUpdate::skipped),
        HookSubcommand::Stop => handle(ctx, payload, stop, ContinuationDecision::halt),
        HookSubcommand::Prompt => handle(ctx, payload, prompt, PromptOutcome::skipped),
    };
    print_compact(&reply)
}

fn handle<T: Serialize>(
    ctx: Result<Context, String>,
    payload: Result<HookPayload, String>,
    hook: fn(&Context, &HookPayload) -> T,
    fallback: fn(String) -> T,
) -> Value {
    let reply = match (ctx, payload) {
        (_, Err(e)) => {
            tracing::warn!(error = %e, "unreadable hook payload");
            fallback(format!("unreadable hook payload: {e}"))
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "configuration error");
            fallback(format!("configuration error: {e}"))
        }
        (Ok(ctx), Ok(payload)) => hook(&ctx, &payload),
    };
    serde_json::to_value(reply).unwrap_or_else(|_| json!({ "verdict": "ask" }))
}

// ---------------------------------------------------------------------------
// pre-tool-use
// ---------------------------------------------------------------------------

pub fn pre_tool_use(ctx: &Context, payload: &HookPayload) -> Decision {
    let Some(tool) = payload.tool_name.as_deref() else {
        return Decision::fail_safe("hook payload has no tool_name");
    };
    let descriptor = descriptor_from_payload(tool, &payload.tool_input);
    let session = payload
        .session_id
        .as_deref()
        .map(|id| SessionContext::from_store(ctx.store.as_ref(), id))
        .unwrap_or_default();

    let decision = match decide(ctx, &descriptor, &session) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(error = %e, "arbiter unavailable");
            Decision::fail_safe(format!("arbiter unavailable: {e:#}"))
        }
    };

    ctx.log.record(&LogEntry::new(
        "pre_tool_use",
        payload.session_id.as_deref(),
        json!({ "descriptor": descriptor, "decision": decision }),
    ));
    decision
}

fn decide(
    ctx: &Context,
    descriptor: &warden_core::types::ActionDescriptor,
    session: &SessionContext,
) -> anyhow::Result<Decision> {
    let arbiter = ctx.arbiter()?;
    let rt = tokio::runtime::Runtime::new()?;
    Ok(rt.block_on(arbiter.decide(descriptor, session)))
}

// ---------------------------------------------------------------------------
// post-tool-use
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_phase: Option<String>,
    pub advanced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl PhaseUpdate {
    pub fn skipped(note: String) -> Self {
        Self {
            session_id: None,
            phase: None,
            previous_phase: None,
            advanced: false,
            note: Some(note),
        }
    }
}

pub fn post_tool_use(ctx: &Context, payload: &HookPayload) -> PhaseUpdate {
    let (Some(session_id), Some(tool)) = (payload.session_id.as_deref(), payload.tool_name.as_deref())
    else {
        return PhaseUpdate::skipped("hook payload needs session_id and tool_name".into());
    };
    match ctx.store.read(session_id) {
        ReadResult::Ok(_) => {}
        ReadResult::NotFound => return PhaseUpdate::skipped("no session state".into()),
        ReadResult::Corrupt(reason) => {
            tracing::warn!(session = session_id, reason = %reason, "corrupt session state");
            return PhaseUpdate::skipped(format!("corrupt session state: {reason}"));
        }
    }

    let event = WorkflowEvent::new(tool, payload.tool_input.clone());
    let mut previous = None;
    let result = ctx.store.update(session_id, &mut |state| {
        previous = None;
        let next = ctx.registry.advance(&state.workflow_id, &state.phase, &event);
        if next == state.phase {
            return false;
        }
        previous = Some(std::mem::replace(&mut state.phase, next));
        true
    });

    let state = match result {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(session = session_id, error = %e, "failed to advance phase");
            return PhaseUpdate::skipped(format!("failed to advance phase: {e}"));
        }
    };

    let update = PhaseUpdate {
        session_id: Some(session_id.to_string()),
        phase: Some(state.phase.clone()),
        advanced: previous.is_some(),
        previous_phase: previous,
        note: None,
    };
    if update.advanced {
        tracing::info!(
            session = session_id,
            workflow = %state.workflow_id,
            from = update.previous_phase.as_deref().unwrap_or("-"),
            to = %state.phase,
            "phase advanced"
        );
        ctx.log.record(&LogEntry::new("post_tool_use", Some(session_id), &update));
        if state.is_done() {
            finish(ctx, &state);
        }
    }
    update
}

/// Send the terminal notice for the issue a finished session was working on.
///
/// Only the hook whose update moved the session to `done` gets here, so the
/// notice goes out once. The index entry is dropped after a successful send
/// and kept when there is no notifier or the send fails.
fn finish(ctx: &Context, state: &SessionState) {
    let Some(issue_id) = state.issue_id.as_deref() else {
        return;
    };
    tracing::info!(issue = issue_id, session = %state.session_id, "workflow finished");

    let gateway = match ctx.telegram() {
        Ok(Some(gw)) => gw,
        Ok(None) => {
            tracing::debug!(issue = issue_id, "no notifier configured; issue stays linked");
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, "cannot notify");
            return;
        }
    };
    notify_then_release(&ctx.root, state, issue_id, |text| {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(gateway.notify(text))?;
        Ok(())
    });
}

fn notify_then_release(
    root: &Path,
    state: &SessionState,
    issue_id: &str,
    send: impl FnOnce(&str) -> anyhow::Result<()>,
) -> bool {
    match issue::lookup(root, issue_id) {
        Ok(Some(linked)) if linked == state.session_id => {}
        Ok(_) => return false,
        Err(e) => {
            tracing::warn!(issue = issue_id, error = %e, "failed to read issue index");
            return false;
        }
    }

    let text = format!(
        "✅ <b>{}</b> finished workflow <code>{}</code>",
        issue_id, state.workflow_id
    );
    if let Err(e) = send(&text) {
        tracing::warn!(issue = issue_id, error = %e, "failed to send completion notice; issue stays linked");
        return false;
    }

    match issue::take_linked(root, issue_id, &state.session_id) {
        Ok(released) => released,
        Err(e) => {
            tracing::warn!(issue = issue_id, error = %e, "failed to update issue index");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// stop
// ---------------------------------------------------------------------------

pub fn stop(ctx: &Context, payload: &HookPayload) -> ContinuationDecision {
    let Some(session_id) = payload.session_id.as_deref() else {
        return ContinuationDecision::halt("hook payload has no session_id");
    };
    let decision = ctx.continuation().should_continue(session_id);
    ctx.log.record(&LogEntry::new("stop", Some(session_id), &decision));
    decision
}

// ---------------------------------------------------------------------------
// prompt
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptOutcome {
    pub created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl PromptOutcome {
    pub fn skipped(note: String) -> Self {
        Self {
            created: false,
            session_id: None,
            workflow_id: None,
            phase: None,
            issue_id: None,
            note: Some(note),
        }
    }

    fn for_state(state: &SessionState, created: bool) -> Self {
        Self {
            created,
            session_id: Some(state.session_id.clone()),
            workflow_id: Some(state.workflow_id.clone()),
            phase: Some(state.phase.clone()),
            issue_id: state.issue_id.clone(),
            note: None,
        }
    }
}

pub fn prompt(ctx: &Context, payload: &HookPayload) -> PromptOutcome {
    let (Some(session_id), Some(text)) = (payload.session_id.as_deref(), payload.prompt.as_deref())
    else {
        return PromptOutcome::skipped("hook payload needs session_id and prompt".into());
    };
    let Some(recognized) = ctx.registry.recognize(text) else {
        return PromptOutcome::skipped("not a workflow command".into());
    };
    let workflow_id = recognized.workflow_id;

    // Re-issuing the command for a running session keeps its counters. Any
    // other workflow command re-initializes the record, which is the
    // external reset that restores the continuation budget.
    let existing = ctx.store.read(session_id).ok();
    if let Some(existing) = &existing {
        if existing.workflow_id == workflow_id
            && !existing.is_done()
            && existing.issue_id == recognized.issue_id
        {
            let mut outcome = PromptOutcome::for_state(existing, false);
            outcome.note = Some("session already active".into());
            return outcome;
        }
    }

    let Some(phase) = ctx.registry.initial_phase(&workflow_id) else {
        return PromptOutcome::skipped(format!("workflow '{workflow_id}' has no phases"));
    };
    let state = SessionState::new(
        session_id,
        &workflow_id,
        phase,
        ctx.config.max_continuations_for(&workflow_id),
    )
    .with_issue(recognized.issue_id.clone());

    if let Err(e) = ctx.store.write(session_id, &state) {
        tracing::warn!(session = session_id, error = %e, "failed to create session");
        return PromptOutcome::skipped(format!("failed to create session: {e}"));
    }
    let previous_issue = existing.and_then(|s| s.issue_id);
    if let Some(old) = previous_issue.filter(|old| recognized.issue_id.as_ref() != Some(old)) {
        match issue::take_linked(&ctx.root, &old, session_id) {
            Ok(true) => tracing::info!(issue = %old, session = session_id, "released previous issue"),
            Ok(false) => {}
            Err(e) => tracing::warn!(issue = %old, error = %e, "failed to release previous issue"),
        }
    }
    if let Some(issue_id) = &recognized.issue_id {
        match issue::link(&ctx.root, issue_id, session_id) {
            Ok(Some(old)) if old != session_id => {
                tracing::info!(issue = %issue_id, previous = %old, "issue relinked to new session");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(issue = %issue_id, error = %e, "failed to link issue"),
        }
    }

    tracing::info!(session = session_id, workflow = %workflow_id, phase = %state.phase, "session started");
    let outcome = PromptOutcome::for_state(&state, true);
    ctx.log.record(&LogEntry::new("prompt", Some(session_id), &outcome));
    outcome
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;
    use warden_core::types::{DecisionSource, Verdict};

    fn context(dir: &TempDir) -> Context {
        let env = HashMap::from([(
            "WARDEN_HOME".to_string(),
            dir.path().join("home").display().to_string(),
        )]);
        Context::load_with(dir.path(), &env).unwrap()
    }

    fn payload(value: Value) -> HookPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn read_payload_reports_garbage() {
        assert!(read_payload("not json".as_bytes()).is_err());
        let p = read_payload(r#"{"session_id":"s1","extra":1}"#.as_bytes()).unwrap();
        assert_eq!(p.session_id.as_deref(), Some("s1"));
        assert!(p.tool_input.is_null());
    }

    #[test]
    fn fallback_is_used_for_bad_payload() {
        let dir = TempDir::new().unwrap();
        let reply = handle(
            Ok(context(&dir)),
            Err("eof".into()),
            pre_tool_use,
            Decision::fail_safe,
        );
        assert_eq!(reply["verdict"], "ask");
        assert_eq!(reply["source"], "fail_safe");
    }

    #[test]
    fn pre_tool_use_denies_prefixed_rm() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let d = pre_tool_use(
            &ctx,
            &payload(json!({"tool_name": "Bash", "tool_input": {"command": "ENV=1 rm -rf /tmp"}})),
        );
        assert_eq!(d.verdict, Verdict::Deny);
        assert_eq!(d.source, DecisionSource::RuleMatch);
    }

    #[test]
    fn pre_tool_use_without_tool_asks() {
        let dir = TempDir::new().unwrap();
        let d = pre_tool_use(&context(&dir), &HookPayload::default());
        assert_eq!(d.verdict, Verdict::Ask);
    }

    #[test]
    fn prompt_then_events_then_stop() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);

        let started = prompt(
            &ctx,
            &payload(json!({"session_id": "s1", "prompt": "/impl ISSUE-7"})),
        );
        assert!(started.created);
        assert_eq!(started.workflow_id.as_deref(), Some("impl"));
        assert_eq!(started.issue_id.as_deref(), Some("ISSUE-7"));
        assert_eq!(issue::lookup(dir.path(), "ISSUE-7").unwrap().as_deref(), Some("s1"));

        // Same command again keeps the running session.
        let again = prompt(
            &ctx,
            &payload(json!({"session_id": "s1", "prompt": "/impl ISSUE-7"})),
        );
        assert!(!again.created);

        let stopped = stop(&ctx, &payload(json!({"session_id": "s1"})));
        assert_eq!(stopped.verdict, Verdict::Allow);
        assert_eq!(stopped.continuation_count, Some(1));

        let unchanged = post_tool_use(
            &ctx,
            &payload(json!({"session_id": "s1", "tool_name": "Bash", "tool_input": {"command": "ls"}})),
        );
        assert!(!unchanged.advanced);
    }

    #[test]
    fn reaching_done_without_notifier_keeps_the_issue() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        prompt(&ctx, &payload(json!({"session_id": "s2", "prompt": "/impl 42"})));

        let mut state = ctx.store.read("s2").ok().unwrap();
        state.phase = "review".into();
        ctx.store.write("s2", &state).unwrap();

        let update = post_tool_use(
            &ctx,
            &payload(json!({
                "session_id": "s2",
                "tool_name": "Bash",
                "tool_input": {"command": "gh pr create --fill"}
            })),
        );
        assert!(update.advanced);
        assert_eq!(update.phase.as_deref(), Some("done"));
        assert_eq!(update.previous_phase.as_deref(), Some("review"));
        // No notifier is configured, so nothing was sent and the entry stays.
        assert_eq!(issue::lookup(dir.path(), "42").unwrap().as_deref(), Some("s2"));

        let halted = stop(&ctx, &payload(json!({"session_id": "s2"})));
        assert_eq!(halted.verdict, Verdict::Ask);
    }

    fn finished(session: &str, issue: &str) -> SessionState {
        let mut state = SessionState::new(session, "impl", "done", 10);
        state.issue_id = Some(issue.to_string());
        state
    }

    #[test]
    fn failed_notice_keeps_the_issue() {
        let dir = TempDir::new().unwrap();
        issue::link(dir.path(), "ENG-5", "s5").unwrap();
        let state = finished("s5", "ENG-5");

        let released = notify_then_release(dir.path(), &state, "ENG-5", |_| {
            Err(anyhow::anyhow!("telegram unreachable"))
        });
        assert!(!released);
        assert_eq!(issue::lookup(dir.path(), "ENG-5").unwrap().as_deref(), Some("s5"));

        let mut sent = Vec::new();
        let released = notify_then_release(dir.path(), &state, "ENG-5", |text| {
            sent.push(text.to_string());
            Ok(())
        });
        assert!(released);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("ENG-5"));
        assert_eq!(issue::lookup(dir.path(), "ENG-5").unwrap(), None);
    }

    #[test]
    fn notice_is_sent_at_most_once() {
        let dir = TempDir::new().unwrap();
        issue::link(dir.path(), "ENG-6", "s6").unwrap();
        let state = finished("s6", "ENG-6");
        let mut sends = 0;
        for _ in 0..3 {
            notify_then_release(dir.path(), &state, "ENG-6", |_| {
                sends += 1;
                Ok(())
            });
        }
        assert_eq!(sends, 1);
    }

    #[test]
    fn relinked_issue_is_not_notified_by_old_session() {
        let dir = TempDir::new().unwrap();
        issue::link(dir.path(), "ENG-8", "newer").unwrap();
        let released = notify_then_release(dir.path(), &finished("older", "ENG-8"), "ENG-8", |_| {
            panic!("must not send for a relinked issue")
        });
        assert!(!released);
        assert_eq!(issue::lookup(dir.path(), "ENG-8").unwrap().as_deref(), Some("newer"));
    }

    #[test]
    fn new_issue_releases_the_old_link() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        prompt(&ctx, &payload(json!({"session_id": "s1", "prompt": "/impl ENG-1"})));
        stop(&ctx, &payload(json!({"session_id": "s1"})));

        let switched = prompt(&ctx, &payload(json!({"session_id": "s1", "prompt": "/impl ENG-2"})));
        assert!(switched.created);
        assert_eq!(issue::lookup(dir.path(), "ENG-1").unwrap(), None);
        assert_eq!(issue::lookup(dir.path(), "ENG-2").unwrap().as_deref(), Some("s1"));
        let state = ctx.store.read("s1").ok().unwrap();
        assert_eq!(state.continuation_count, 0);
        assert_eq!(state.issue_id.as_deref(), Some("ENG-2"));
    }

    #[test]
    fn unknown_session_is_skipped() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let update = post_tool_use(
            &ctx,
            &payload(json!({"session_id": "nope", "tool_name": "Bash", "tool_input": {}})),
        );
        assert!(!update.advanced);
        assert_eq!(update.note.as_deref(), Some("no session state"));
        assert_eq!(stop(&ctx, &payload(json!({"session_id": "nope"}))).verdict, Verdict::Ask);
    }

    #[test]
    fn plain_prompt_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let outcome = prompt(&ctx, &payload(json!({"session_id": "s3", "prompt": "fix the tests"})));
        assert!(!outcome.created);
        assert!(matches!(ctx.store.read("s3"), ReadResult::NotFound));
    }
}
