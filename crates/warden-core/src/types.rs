use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    Deny,
    Ask,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Allow => "allow",
            Verdict::Deny => "deny",
            Verdict::Ask => "ask",
        }
    }

    pub fn is_ask(self) -> bool {
        self == Verdict::Ask
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Verdict {
    type Err = crate::error::WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(Verdict::Allow),
            "deny" => Ok(Verdict::Deny),
            "ask" => Ok(Verdict::Ask),
            _ => Err(crate::error::WardenError::InvalidVerdict(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Bucket
// ---------------------------------------------------------------------------

/// Rule category. Declaration order is evaluation priority: every deny rule
/// is checked before any ask rule, every ask rule before any allow rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Deny,
    Ask,
    Allow,
}

impl Bucket {
    pub fn all() -> &'static [Bucket] {
        &[Bucket::Deny, Bucket::Ask, Bucket::Allow]
    }

    pub fn verdict(self) -> Verdict {
        match self {
            Bucket::Deny => Verdict::Deny,
            Bucket::Ask => Verdict::Ask,
            Bucket::Allow => Verdict::Allow,
        }
    }

    pub fn as_str(self) -> &'static str {
        self.verdict().as_str()
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// DecisionSource
// ---------------------------------------------------------------------------

/// The escalation tier that produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    RuleMatch,
    WorkflowAutoAllow,
    MlJudge,
    RemoteApproval,
    FailSafe,
}

impl DecisionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionSource::RuleMatch => "rule_match",
            DecisionSource::WorkflowAutoAllow => "workflow_auto_allow",
            DecisionSource::MlJudge => "ml_judge",
            DecisionSource::RemoteApproval => "remote_approval",
            DecisionSource::FailSafe => "fail_safe",
        }
    }
}

impl fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ActionDescriptor
// ---------------------------------------------------------------------------

/// A single requested operation submitted for authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub tool: String,
    pub target: String,
}

impl ActionDescriptor {
    pub fn new(tool: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            target: target.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub verdict: Verdict,
    pub source: DecisionSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Decision {
    pub fn new(verdict: Verdict, source: DecisionSource, reason: impl Into<String>) -> Self {
        Self {
            verdict,
            source,
            reason: Some(reason.into()),
        }
    }

    /// The conservative fallback: ask a human.
    pub fn fail_safe(reason: impl Into<String>) -> Self {
        Self::new(Verdict::Ask, DecisionSource::FailSafe, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_parses_case_insensitively() {
        assert_eq!("ALLOW".parse::<Verdict>().unwrap(), Verdict::Allow);
        assert_eq!(" deny ".parse::<Verdict>().unwrap(), Verdict::Deny);
        assert!("maybe".parse::<Verdict>().is_err());
    }

    #[test]
    fn bucket_priority_order() {
        let mut buckets = vec![Bucket::Allow, Bucket::Deny, Bucket::Ask];
        buckets.sort();
        assert_eq!(buckets, Bucket::all());
    }

    #[test]
    fn decision_json_shape() {
        let d = Decision::fail_safe("no rule matched");
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["verdict"], "ask");
        assert_eq!(json["source"], "fail_safe");
        assert_eq!(json["reason"], "no rule matched");
    }
}
