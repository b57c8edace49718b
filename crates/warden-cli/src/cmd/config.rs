use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use std::path::Path;
use warden_core::config::{self, Config, WarnLevel};

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective configuration (secrets masked)
    Show {
        /// List the config files consulted, in precedence order
        #[arg(long)]
        layers: bool,
    },

    /// Validate the config for common mistakes
    Validate,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show { layers } => show(root, layers, json),
        ConfigSubcommand::Validate => validate(root, json),
    }
}

fn show(root: &Path, layers: bool, json: bool) -> anyhow::Result<()> {
    if layers {
        let env = config::process_env();
        let paths = Config::layer_paths(root, &env);
        if json {
            let items: Vec<_> = paths
                .iter()
                .map(|p| serde_json::json!({ "path": p, "exists": p.exists() }))
                .collect();
            return print_json(&items);
        }
        for p in &paths {
            let mark = if p.exists() { "*" } else { " " };
            println!("{mark} {}", p.display());
        }
        return Ok(());
    }

    let config = Config::load(root).context("failed to load config")?.redacted();
    if json {
        print_json(&config)
    } else {
        print!("{}", serde_yaml::to_string(&config)?);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let warnings = config.validate();

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
