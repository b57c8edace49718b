use crate::output::{print_json, print_table, truncate};
use anyhow::Context as _;
use clap::Subcommand;
use std::path::Path;
use warden_core::config::Config;
use warden_core::normalize::normalize;
use warden_core::types::ActionDescriptor;

const PATTERN_COLUMN: usize = 72;

#[derive(Subcommand)]
pub enum RulesSubcommand {
    /// Show which rule decides an action
    Test {
        /// Tool name, e.g. Bash
        tool: String,
        /// Command, path or URL the tool acts on
        target: String,
        /// Also check auto-allow for this workflow phase (`<workflow>:<phase>`)
        #[arg(long)]
        phase: Option<String>,
    },

    /// List rules in evaluation order, built-in protections included
    List,
}

pub fn run(root: &Path, subcommand: RulesSubcommand, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    match subcommand {
        RulesSubcommand::Test {
            tool,
            target,
            phase,
        } => test(&config, &tool, &target, phase.as_deref(), json),
        RulesSubcommand::List => list(&config, json),
    }
}

fn test(
    config: &Config,
    tool: &str,
    target: &str,
    phase: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let descriptor = ActionDescriptor::new(tool, target);
    let outcome = config.rule_set().explain(&descriptor);

    let auto_allowed = match phase {
        Some(spec) => {
            let (workflow, phase) = spec
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("--phase expects <workflow>:<phase>"))?;
            Some(config.registry().is_auto_allowed(workflow, phase, &descriptor))
        }
        None => None,
    };

    if json {
        return print_json(&serde_json::json!({
            "descriptor": descriptor,
            "normalized_target": normalize(target),
            "outcome": outcome,
            "reason": outcome.reason(),
            "auto_allowed": auto_allowed,
        }));
    }

    println!("verdict:    {}", outcome.verdict);
    println!("reason:     {}", outcome.reason());
    let normalized = normalize(target);
    if normalized != target {
        println!("normalized: {normalized}");
    }
    if let Some(allowed) = auto_allowed {
        println!("auto-allow: {}", if allowed { "yes" } else { "no" });
    }
    Ok(())
}

fn list(config: &Config, json: bool) -> anyhow::Result<()> {
    let entries: Vec<_> = config.rule_set().entries().collect();
    if json {
        return print_json(&entries);
    }
    let rows = entries
        .iter()
        .map(|rule| {
            vec![
                rule.bucket.to_string(),
                (rule.index + 1).to_string(),
                rule.tool.clone(),
                truncate(&rule.pattern, PATTERN_COLUMN),
            ]
        })
        .collect();
    print_table(&["BUCKET", "#", "TOOL", "PATTERN"], rows);
    Ok(())
}
