use crate::output::{print_json, print_table};
use clap::Subcommand;
use std::path::Path;
use warden_core::issue;

#[derive(Subcommand)]
pub enum IssueSubcommand {
    /// Map an issue id to a session id (replaces any existing link)
    Link { issue_id: String, session_id: String },

    /// Print the session linked to an issue
    Lookup { issue_id: String },

    /// Drop an issue's link
    Remove { issue_id: String },

    /// Print and drop an issue's link in one step
    Take { issue_id: String },

    /// List all links
    List,
}

pub fn run(root: &Path, subcommand: IssueSubcommand, json: bool) -> anyhow::Result<()> {
    match subcommand {
        IssueSubcommand::Link {
            issue_id,
            session_id,
        } => {
            let previous = issue::link(root, &issue_id, &session_id)?;
            if json {
                print_json(&serde_json::json!({
                    "issue_id": issue_id,
                    "session_id": session_id,
                    "previous_session_id": previous,
                }))?;
            } else {
                println!("linked {issue_id} -> {session_id}");
                if let Some(prev) = previous.filter(|p| *p != session_id) {
                    println!("  (replaced {prev})");
                }
            }
            Ok(())
        }

        IssueSubcommand::Lookup { issue_id } => {
            let session = issue::lookup(root, &issue_id)?;
            print_session(&issue_id, session, json)
        }

        IssueSubcommand::Take { issue_id } => {
            let session = issue::take(root, &issue_id)?;
            print_session(&issue_id, session, json)
        }

        IssueSubcommand::Remove { issue_id } => {
            let removed = issue::remove(root, &issue_id)?;
            if json {
                print_json(&serde_json::json!({ "issue_id": issue_id, "removed": removed }))?;
            } else if removed {
                println!("removed {issue_id}");
            } else {
                println!("{issue_id} was not linked");
            }
            Ok(())
        }

        IssueSubcommand::List => {
            let entries = issue::list(root)?;
            if json {
                return print_json(&entries);
            }
            if entries.is_empty() {
                println!("no linked issues");
                return Ok(());
            }
            print_table(
                &["ISSUE", "SESSION", "LINKED"],
                entries
                    .iter()
                    .map(|e| {
                        vec![
                            e.issue_id.clone(),
                            e.session_id.clone(),
                            e.created_at.format("%Y-%m-%d %H:%M").to_string(),
                        ]
                    })
                    .collect(),
            );
            Ok(())
        }
    }
}

/// Missing links exit non-zero so scripts can branch on them.
fn print_session(issue_id: &str, session: Option<String>, json: bool) -> anyhow::Result<()> {
    if json {
        print_json(&serde_json::json!({ "issue_id": issue_id, "session_id": session }))?;
    } else if let Some(s) = &session {
        println!("{s}");
    }
    if session.is_none() {
        anyhow::bail!("issue '{issue_id}' is not linked");
    }
    Ok(())
}
