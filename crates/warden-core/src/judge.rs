use crate::error::Result;
use crate::types::{ActionDescriptor, Verdict};
use futures::future::BoxFuture;
use serde::Serialize;

/// What the ML judge is asked about.
#[derive(Debug, Clone, Serialize)]
pub struct JudgeRequest {
    pub descriptor: ActionDescriptor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// A model-backed classifier consulted after the static rules.
///
/// Implementations return the verdict they parsed; callers enforce the
/// timeout and map errors to `Ask`.
pub trait Judge: Send + Sync {
    fn judge<'a>(&'a self, request: &'a JudgeRequest) -> BoxFuture<'a, Result<Verdict>>;
}

/// Extract a verdict from free-form model output.
///
/// Accepts a bare word (`allow`, `deny`, `ask`, any case, optional trailing
/// punctuation) or a JSON object with a `verdict` field. Anything else is
/// non-conforming and yields `None`.
pub fn parse_verdict(text: &str) -> Option<Verdict> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(s) = value.as_str() {
            return s.parse().ok();
        }
        return value
            .get("verdict")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok());
    }
    trimmed
        .trim_end_matches(['.', '!'])
        .trim_matches(['`', '"', '\''])
        .parse()
        .ok()
}
