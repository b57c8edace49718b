//! Remote human approval over a chat channel.
//!
//! ```text
//!   ApprovalGateway::request_approval
//!        │ send_message (text + Allow/Deny buttons)
//!        ▼
//!   ┌── sleep(poll_interval) ── poll_replies(since) ──┐
//!   │   button `warden:<id>:allow|deny`               │ until a valid reply
//!   │   text   `/allow <id>` | `/deny <id>`           │ or timeout
//!   └─────────────────────────────────────────────────┘
//!        │ edit_message (outcome)
//!        ▼
//!   Approved | Denied | TimedOut | Failed   →  Allow | Deny | Ask
//! ```
//!
//! Transport errors never escape: they become [`ApprovalOutcome::Failed`],
//! which maps to `Ask`.

mod channel;
mod telegram;

pub use channel::{Button, MessageId, MessagingChannel, Reply, ReplyKind};
pub use telegram::{TelegramChannel, DEFAULT_API_BASE};

use crate::error::Result;
use crate::types::{ActionDescriptor, Verdict};
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::Instant;

const CALLBACK_PREFIX: &str = "warden";
const TARGET_PREVIEW_CHARS: usize = 300;
const SESSION_PREVIEW_CHARS: usize = 8;
/// Shortest request-id prefix accepted in a text command.
const MIN_ID_PREFIX: usize = 4;

// ---------------------------------------------------------------------------
// ApprovalRequest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest {
    pub request_id: String,
    pub summary: String,
    pub tool: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timeout_secs: u64,
    pub poll_interval_secs: u64,
    /// Empty means any member of the chat may answer.
    pub allowed_approver_ids: BTreeSet<String>,
}

impl ApprovalRequest {
    pub fn new(descriptor: &ActionDescriptor, session_id: Option<&str>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().simple().to_string(),
            summary: String::new(),
            tool: descriptor.tool.clone(),
            target: descriptor.target.clone(),
            session_id: session_id.map(str::to_string),
            timeout_secs: 300,
            poll_interval_secs: 5,
            allowed_approver_ids: BTreeSet::new(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_timing(mut self, timeout_secs: u64, poll_interval_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self.poll_interval_secs = poll_interval_secs;
        self
    }

    pub fn with_approvers<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_approver_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    fn is_authorized(&self, approver_id: &str) -> bool {
        self.allowed_approver_ids.is_empty() || self.allowed_approver_ids.contains(approver_id)
    }

    fn callback_data(&self, choice: &str) -> String {
        format!("{CALLBACK_PREFIX}:{}:{choice}", self.request_id)
    }
}

// ---------------------------------------------------------------------------
// ApprovalOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApprovalOutcome {
    Approved { approver: String },
    Denied { approver: String },
    TimedOut,
    Failed { error: String },
}

impl ApprovalOutcome {
    pub fn verdict(&self) -> Verdict {
        match self {
            ApprovalOutcome::Approved { .. } => Verdict::Allow,
            ApprovalOutcome::Denied { .. } => Verdict::Deny,
            ApprovalOutcome::TimedOut | ApprovalOutcome::Failed { .. } => Verdict::Ask,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ApprovalOutcome::Approved { approver } => format!("approved by {approver}"),
            ApprovalOutcome::Denied { approver } => format!("denied by {approver}"),
            ApprovalOutcome::TimedOut => "approval timed out".to_string(),
            ApprovalOutcome::Failed { error } => format!("approval unavailable: {error}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

/// Map a reply to allow (`true`) / deny (`false`) for `request_id`, or `None`
/// when it is not an answer to this request.
fn parse_reply(kind: &ReplyKind, request_id: &str) -> Option<bool> {
    match kind {
        ReplyKind::Button { data, .. } => {
            let mut parts = data.splitn(3, ':');
            if parts.next()? != CALLBACK_PREFIX || parts.next()? != request_id {
                return None;
            }
            choice(parts.next()?)
        }
        ReplyKind::Text(text) => {
            let mut words = text.split_whitespace();
            let command = words.next()?.strip_prefix('/')?;
            // `/allow@my_bot` in group chats.
            let command = command.split('@').next()?;
            let allow = choice(&command.to_ascii_lowercase())?;
            match words.next() {
                None => Some(allow),
                Some(id) if id.len() >= MIN_ID_PREFIX && request_id.starts_with(id) => Some(allow),
                Some(_) => None,
            }
        }
    }
}

fn choice(word: &str) -> Option<bool> {
    match word {
        "allow" | "approve" => Some(true),
        "deny" | "reject" => Some(false),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Message formatting
// ---------------------------------------------------------------------------

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn preview(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

fn format_request(req: &ApprovalRequest) -> String {
    let mut text = String::from("🔐 <b>Approval needed</b>\n\n");
    text.push_str(&format!("<b>Tool:</b> <code>{}</code>\n", escape_html(&req.tool)));
    text.push_str(&format!(
        "<b>Target:</b> <code>{}</code>\n",
        escape_html(&preview(&req.target, TARGET_PREVIEW_CHARS))
    ));
    if let Some(session) = &req.session_id {
        let short: String = session.chars().take(SESSION_PREVIEW_CHARS).collect();
        text.push_str(&format!("<b>Session:</b> <code>{}</code>\n", escape_html(&short)));
    }
    if !req.summary.is_empty() {
        text.push_str(&format!("\n{}\n", escape_html(&req.summary)));
    }
    text.push_str(&format!(
        "\nReply /allow {id} or /deny {id} within {}s.",
        req.timeout_secs,
        id = req.request_id
    ));
    text
}

fn format_outcome(req: &ApprovalRequest, outcome: &ApprovalOutcome) -> String {
    let status = match outcome {
        ApprovalOutcome::Approved { approver } => {
            format!("✅ <b>Allowed</b> by {}", escape_html(approver))
        }
        ApprovalOutcome::Denied { approver } => {
            format!("❌ <b>Denied</b> by {}", escape_html(approver))
        }
        ApprovalOutcome::TimedOut => format!(
            "⌛ <b>Timed out</b> after {}s; the agent will ask locally",
            req.timeout_secs
        ),
        ApprovalOutcome::Failed { error } => {
            format!("⚠️ <b>Approval failed</b>: {}", escape_html(error))
        }
    };
    format!(
        "{status}\n\n<b>Tool:</b> <code>{}</code>\n<b>Target:</b> <code>{}</code>",
        escape_html(&req.tool),
        escape_html(&preview(&req.target, TARGET_PREVIEW_CHARS))
    )
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Something that can put a request in front of a human.
pub trait Approver: Send + Sync {
    fn request_approval<'a>(&'a self, request: &'a ApprovalRequest)
        -> BoxFuture<'a, ApprovalOutcome>;
}

pub struct ApprovalGateway<C> {
    channel: C,
    chat_id: String,
}

impl<C: MessagingChannel> ApprovalGateway<C> {
    pub fn new(channel: C, chat_id: impl Into<String>) -> Self {
        Self {
            channel,
            chat_id: chat_id.into(),
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Post an informational message with no buttons.
    pub async fn notify(&self, text: &str) -> Result<MessageId> {
        self.channel.send_message(&self.chat_id, text, &[]).await
    }

    /// Send `req`, then poll until a valid reply or the timeout.
    pub async fn request_approval(&self, req: &ApprovalRequest) -> ApprovalOutcome {
        let buttons = [
            Button::new("✅ Allow", req.callback_data("allow")),
            Button::new("❌ Deny", req.callback_data("deny")),
        ];
        let sent_at = chrono::Utc::now().timestamp();
        let message_id = match self
            .channel
            .send_message(&self.chat_id, &format_request(req), &buttons)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(request = %req.request_id, error = %e, "failed to send approval request");
                return ApprovalOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };
        tracing::info!(request = %req.request_id, message_id, tool = %req.tool, "approval requested");

        let outcome = self.wait_for_reply(req, sent_at).await;
        self.finish(req, message_id, &outcome).await;
        outcome
    }

    async fn wait_for_reply(&self, req: &ApprovalRequest, sent_at: i64) -> ApprovalOutcome {
        let interval = Duration::from_secs(req.poll_interval_secs.max(1));
        let deadline = Instant::now() + Duration::from_secs(req.timeout_secs);
        let mut since = 0i64;
        let mut polls = 0u32;

        loop {
            let now = Instant::now();
            if now >= deadline {
                tracing::info!(request = %req.request_id, polls, "approval timed out");
                return ApprovalOutcome::TimedOut;
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
            polls += 1;

            let replies = match self.channel.poll_replies(since).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(request = %req.request_id, error = %e, "approval poll failed");
                    return ApprovalOutcome::Failed {
                        error: e.to_string(),
                    };
                }
            };

            for reply in replies {
                since = since.max(reply.update_id + 1);
                if let Some(outcome) = self.accept(req, &reply, sent_at).await {
                    return outcome;
                }
            }
        }
    }

    /// The outcome carried by `reply`, if it is a valid answer to `req`.
    async fn accept(&self, req: &ApprovalRequest, reply: &Reply, sent_at: i64) -> Option<ApprovalOutcome> {
        if reply.date.is_some_and(|d| d < sent_at) {
            return None;
        }
        let allow = parse_reply(&reply.kind, &req.request_id)?;
        if !req.is_authorized(&reply.approver_id) {
            tracing::warn!(
                request = %req.request_id,
                approver = %reply.approver_id,
                "ignoring reply from unlisted approver"
            );
            return None;
        }
        if matches!(reply.kind, ReplyKind::Button { .. }) {
            if let Err(e) = self.channel.acknowledge(reply).await {
                tracing::debug!(error = %e, "failed to acknowledge button press");
            }
        }
        let approver = reply.approver_id.clone();
        Some(if allow {
            ApprovalOutcome::Approved { approver }
        } else {
            ApprovalOutcome::Denied { approver }
        })
    }

    async fn finish(&self, req: &ApprovalRequest, message_id: MessageId, outcome: &ApprovalOutcome) {
        let text = format_outcome(req, outcome);
        if let Err(e) = self
            .channel
            .edit_message(&self.chat_id, message_id, &text)
            .await
        {
            tracing::warn!(request = %req.request_id, error = %e, "failed to update approval message");
        }
        tracing::info!(request = %req.request_id, outcome = %outcome.describe(), "approval finished");
    }
}

impl<C: MessagingChannel> Approver for ApprovalGateway<C> {
    fn request_approval<'a>(
        &'a self,
        request: &'a ApprovalRequest,
    ) -> BoxFuture<'a, ApprovalOutcome> {
        Box::pin(ApprovalGateway::request_approval(self, request))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
