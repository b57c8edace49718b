use crate::normalize::{is_compound, normalize};
use crate::target::SHELL_TOOL;
use crate::types::{ActionDescriptor, Bucket, Verdict};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Tool name that matches every tool.
pub const ANY_TOOL: &str = "*";

// ---------------------------------------------------------------------------
// RuleSpec / RuleTable (configuration form)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub tool: String,
    pub pattern: String,
}

impl RuleSpec {
    pub fn new(tool: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            pattern: pattern.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTable {
    #[serde(default)]
    pub deny: Vec<RuleSpec>,
    #[serde(default)]
    pub ask: Vec<RuleSpec>,
    #[serde(default)]
    pub allow: Vec<RuleSpec>,
}

impl RuleTable {
    pub fn bucket(&self, bucket: Bucket) -> &[RuleSpec] {
        match bucket {
            Bucket::Deny => &self.deny,
            Bucket::Ask => &self.ask,
            Bucket::Allow => &self.allow,
        }
    }

    pub fn push(&mut self, bucket: Bucket, rule: RuleSpec) {
        match bucket {
            Bucket::Deny => self.deny.push(rule),
            Bucket::Ask => self.ask.push(rule),
            Bucket::Allow => self.allow.push(rule),
        }
    }

    /// Every pattern that fails to compile, with its bucket and error.
    pub fn invalid_patterns(&self) -> Vec<(Bucket, String, String)> {
        Bucket::all()
            .iter()
            .flat_map(|&b| {
                self.bucket(b).iter().filter_map(move |r| {
                    compile_pattern(&r.pattern)
                        .err()
                        .map(|e| (b, r.pattern.clone(), e.to_string()))
                })
            })
            .collect()
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .size_limit(1 << 20)
        .build()
}

// ---------------------------------------------------------------------------
// Compiled rule set
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct CompiledRule {
    bucket: Bucket,
    /// Position within its bucket, in declaration order.
    index: usize,
    tool: String,
    pattern: String,
    /// `None` when the pattern failed to compile; such a rule never matches.
    regex: Option<Regex>,
}

impl CompiledRule {
    fn applies_to(&self, tool: &str) -> bool {
        self.tool == ANY_TOOL || self.tool == tool
    }

    fn describe(&self) -> MatchedRule {
        MatchedRule {
            bucket: self.bucket,
            index: self.index,
            tool: self.tool.clone(),
            pattern: self.pattern.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedRule {
    pub bucket: Bucket,
    pub index: usize,
    pub tool: String,
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleOutcome {
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<MatchedRule>,
    /// True when a broken rule for this tool was skipped during the scan.
    pub tainted: bool,
    /// True when allow rules were not consulted because the shell command
    /// is compound.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub compound: bool,
}

impl RuleOutcome {
    pub fn reason(&self) -> String {
        match &self.matched {
            Some(m) => format!(
                "matched {} rule #{} ({} /{}/)",
                m.bucket,
                m.index + 1,
                m.tool,
                m.pattern
            ),
            None if self.tainted => {
                "no rule matched (an invalid rule was skipped); defaulting to ask".to_string()
            }
            None if self.compound => {
                "compound shell command; allow rules do not apply, defaulting to ask".to_string()
            }
            None => "no rule matched; defaulting to ask".to_string(),
        }
    }
}

/// Ordered arena of compiled rules.
///
/// Rules are stored sorted by bucket priority (deny, ask, allow), each bucket
/// keeping declaration order, so a single front-to-back scan implements
/// "first match wins, deny before ask before allow". The built-in
/// [`protected_rules`] follow the configured deny rules.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Compile a rule table. Never fails: a pattern that does not compile is
    /// kept as a broken entry and reported through `tracing`.
    pub fn compile(table: &RuleTable) -> Self {
        let protected = protected_rules();
        let mut rules = Vec::new();
        for &bucket in Bucket::all() {
            let specs = table.bucket(bucket).iter();
            let specs: Vec<&RuleSpec> = match bucket {
                Bucket::Deny => specs.chain(protected.iter()).collect(),
                _ => specs.collect(),
            };
            for (index, spec) in specs.into_iter().enumerate() {
                let regex = match compile_pattern(&spec.pattern) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        tracing::warn!(
                            bucket = %bucket,
                            pattern = %spec.pattern,
                            error = %e,
                            "skipping rule with invalid pattern"
                        );
                        None
                    }
                };
                rules.push(CompiledRule {
                    bucket,
                    index,
                    tool: spec.tool.clone(),
                    pattern: spec.pattern.clone(),
                    regex,
                });
            }
        }
        // Stable: declaration order survives within each bucket.
        rules.sort_by_key(|r| r.bucket);
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Every rule in evaluation order.
    pub fn entries(&self) -> impl Iterator<Item = MatchedRule> + '_ {
        self.rules.iter().map(CompiledRule::describe)
    }

    /// Evaluate `descriptor` and return the verdict of the first matching rule.
    ///
    /// The target is normalized before matching. Deny rules are additionally
    /// tried against the raw target, so a decoration that confuses the
    /// normalizer cannot hide a denied command. Allow rules never match a
    /// compound shell command.
    pub fn explain(&self, descriptor: &ActionDescriptor) -> RuleOutcome {
        let normalized = normalize(&descriptor.target);
        let compound = descriptor.tool == SHELL_TOOL && is_compound(&descriptor.target);
        let mut tainted = false;

        for rule in &self.rules {
            if !rule.applies_to(&descriptor.tool) {
                continue;
            }
            if compound && rule.bucket == Bucket::Allow {
                continue;
            }
            let Some(re) = &rule.regex else {
                tainted = true;
                continue;
            };
            let hit = re.is_match(&normalized)
                || (rule.bucket == Bucket::Deny && re.is_match(&descriptor.target));
            if hit {
                return RuleOutcome {
                    verdict: rule.bucket.verdict(),
                    matched: Some(rule.describe()),
                    tainted,
                    compound,
                };
            }
        }

        RuleOutcome {
            verdict: Verdict::Ask,
            matched: None,
            tainted,
            compound,
        }
    }

    pub fn match_rules(&self, descriptor: &ActionDescriptor) -> Verdict {
        self.explain(descriptor).verdict
    }
}

// ---------------------------------------------------------------------------
// Default and protected rules
// ---------------------------------------------------------------------------

/// Warden's own state: the project `.warden/` directory and the user config.
const STATE_PATH: &str = r"(\.warden|\.config/warden)(/|\s|$)";

/// Deny rules compiled into every rule set, whatever the configuration says.
///
/// They keep the agent away from the session records, the issue index and
/// the config layers, which hold its own continuation budget and rules.
pub fn protected_rules() -> Vec<RuleSpec> {
    let path = format!(r"(^|/){STATE_PATH}");
    let mut rules: Vec<RuleSpec> = ["Write", "Edit", "MultiEdit", "NotebookEdit"]
        .into_iter()
        .map(|tool| RuleSpec::new(tool, path.clone()))
        .collect();
    rules.push(RuleSpec::new(
        SHELL_TOOL,
        format!(
            r"(>|\btee\b|\b(cp|mv|rm|ln|install|truncate|rsync|chmod|sed\s+(-\w+\s+)*-i)\b).*{STATE_PATH}"
        ),
    ));
    rules
}

pub fn default_rules() -> RuleTable {
    RuleTable {
        deny: vec![
            RuleSpec::new("Bash", r"\brm\s+-[a-z]*(r[a-z]*f|f[a-z]*r)\b"),
            RuleSpec::new("Bash", r"\bgit\s+push\b.*(--force\b|\s-f\b)"),
            RuleSpec::new("Bash", r"\bmkfs(\.\w+)?\b"),
            RuleSpec::new("Bash", r"\bdd\s+if="),
            RuleSpec::new("Bash", r":\(\)\s*\{\s*:\|:&\s*\};:"),
            RuleSpec::new("Write", r"(^|/)\.git/"),
            RuleSpec::new("Edit", r"(^|/)\.git/"),
        ],
        ask: vec![
            RuleSpec::new("Bash", r"\bgit\s+push\b"),
            RuleSpec::new("Bash", r"\bgit\s+reset\s+--hard\b"),
            RuleSpec::new("Bash", r"\b(cargo|npm|pnpm|yarn)\s+publish\b"),
            RuleSpec::new("Bash", r"\b(curl|wget)\b.*\|\s*(ba|z)?sh\b"),
            RuleSpec::new("Bash", r"\bsudo\b"),
            RuleSpec::new("Read", r"(^|/)\.env(\.|$)"),
        ],
        allow: vec![
            RuleSpec::new(
                "Bash",
                r"^(ls|pwd|cat|head|tail|wc|which|echo|grep|rg|find|tree)\b",
            ),
            RuleSpec::new("Bash", r"^git\s+(status|diff|log|show|branch|remote)\b"),
            RuleSpec::new("Bash", r"^cargo\s+(build|check|test|fmt|clippy)\b"),
            RuleSpec::new("Read", r".*"),
            RuleSpec::new("Glob", r".*"),
            RuleSpec::new("Grep", r".*"),
        ],
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
