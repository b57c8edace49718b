use crate::context::Context;
use crate::output::{print_json, print_table};
use anyhow::Context as _;
use clap::Subcommand;
use std::path::Path;
use std::time::Duration;
use warden_core::issue;
use warden_core::session::{ReadResult, SessionState};

// ---------------------------------------------------------------------------
// Subcommand tree
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum SessionSubcommand {
    /// Create (or replace) a session's workflow state
    Init {
        session_id: String,

        /// Workflow id from the config catalog
        #[arg(long)]
        workflow: String,

        /// Linked issue id
        #[arg(long)]
        issue: Option<String>,

        /// Starting phase [default: the workflow's first phase]
        #[arg(long)]
        phase: Option<String>,

        /// Continuation cap [default: from config]
        #[arg(long, allow_hyphen_values = true)]
        max_continuations: Option<i64>,
    },

    /// Show one session
    Show { session_id: String },

    /// List all sessions
    List,

    /// Delete a session's state and its issue link
    Reset { session_id: String },

    /// Remove finished sessions older than the retention window
    Gc {
        /// Override `continuation.retention_hours`
        #[arg(long)]
        retention_hours: Option<u64>,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcommand: SessionSubcommand, json: bool) -> anyhow::Result<()> {
    let ctx = Context::load(root)?;
    match subcommand {
        SessionSubcommand::Init {
            session_id,
            workflow,
            issue,
            phase,
            max_continuations,
        } => init(&ctx, &session_id, &workflow, issue, phase, max_continuations, json),
        SessionSubcommand::Show { session_id } => show(&ctx, &session_id, json),
        SessionSubcommand::List => list(&ctx, json),
        SessionSubcommand::Reset { session_id } => reset(&ctx, &session_id, json),
        SessionSubcommand::Gc { retention_hours } => gc(&ctx, retention_hours, json),
    }
}

fn init(
    ctx: &Context,
    session_id: &str,
    workflow: &str,
    issue_id: Option<String>,
    phase: Option<String>,
    max_continuations: Option<i64>,
    json: bool,
) -> anyhow::Result<()> {
    let phases = ctx
        .registry
        .lookup(workflow)
        .ok_or_else(|| anyhow::anyhow!("unknown workflow '{workflow}'"))?;
    let phase = match phase {
        Some(p) if phases.contains(&p) => p,
        Some(p) => anyhow::bail!("workflow '{workflow}' has no phase '{p}' (phases: {})", phases.join(", ")),
        None => phases
            .first()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("workflow '{workflow}' has no phases"))?,
    };
    let max = max_continuations.unwrap_or_else(|| ctx.config.max_continuations_for(workflow));

    let state = SessionState::new(session_id, workflow, phase, max).with_issue(issue_id.clone());
    ctx.store
        .write(session_id, &state)
        .with_context(|| format!("failed to write session '{session_id}'"))?;
    if let Some(issue_id) = &issue_id {
        issue::link(&ctx.root, issue_id, session_id)?;
    }

    if json {
        let stored = ctx.store.read(session_id).require(session_id)?;
        print_json(&stored)?;
    } else {
        println!(
            "session {session_id}: workflow '{workflow}' in phase '{}' (max {max} continuations)",
            state.phase
        );
    }
    Ok(())
}

fn show(ctx: &Context, session_id: &str, json: bool) -> anyhow::Result<()> {
    let state = match ctx.store.read(session_id) {
        ReadResult::Ok(s) => s,
        ReadResult::NotFound => anyhow::bail!("session '{session_id}' not found"),
        ReadResult::Corrupt(reason) => anyhow::bail!("session '{session_id}' is corrupt: {reason}"),
    };
    if json {
        return print_json(&state);
    }
    println!("Session:        {}", state.session_id);
    println!("Workflow:       {}", state.workflow_id);
    println!("Phase:          {}", state.phase);
    println!(
        "Continuations:  {}/{}",
        state.continuation_count, state.max_continuations
    );
    println!("Issue:          {}", state.issue_id.as_deref().unwrap_or("-"));
    println!("Revision:       {}", state.revision);
    println!("Updated:        {}", state.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    Ok(())
}

fn list(ctx: &Context, json: bool) -> anyhow::Result<()> {
    let mut sessions = ctx.store.list()?;
    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    if json {
        return print_json(&sessions);
    }
    if sessions.is_empty() {
        println!("no sessions");
        return Ok(());
    }
    print_table(
        &["SESSION", "WORKFLOW", "PHASE", "CONT", "ISSUE", "UPDATED"],
        sessions
            .iter()
            .map(|s| {
                vec![
                    s.session_id.clone(),
                    s.workflow_id.clone(),
                    s.phase.clone(),
                    format!("{}/{}", s.continuation_count, s.max_continuations),
                    s.issue_id.clone().unwrap_or_else(|| "-".into()),
                    s.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                ]
            })
            .collect(),
    );
    Ok(())
}

fn reset(ctx: &Context, session_id: &str, json: bool) -> anyhow::Result<()> {
    let issue_id = match ctx.store.read(session_id) {
        ReadResult::Ok(s) => s.issue_id,
        _ => issue::issue_for_session(&ctx.root, session_id)?,
    };
    let deleted = ctx.store.delete(session_id)?;
    let unlinked = match &issue_id {
        // Only drop the link if it still points at this session.
        Some(id) if issue::lookup(&ctx.root, id)?.as_deref() == Some(session_id) => {
            issue::remove(&ctx.root, id)?
        }
        _ => false,
    };

    if json {
        print_json(&serde_json::json!({
            "session_id": session_id,
            "deleted": deleted,
            "unlinked_issue": if unlinked { issue_id } else { None },
        }))?;
    } else if deleted {
        println!("reset session {session_id}");
        if unlinked {
            println!("  unlinked issue {}", issue_id.as_deref().unwrap_or("-"));
        }
    } else {
        println!("no state for session {session_id}");
    }
    Ok(())
}

fn gc(ctx: &Context, retention_hours: Option<u64>, json: bool) -> anyhow::Result<()> {
    let hours = retention_hours.unwrap_or(ctx.config.continuation.retention_hours);
    let removed = ctx.store.gc(Duration::from_secs(hours * 3600))?;
    if json {
        return print_json(&serde_json::json!({ "removed": removed, "retention_hours": hours }));
    }
    if removed.is_empty() {
        println!("nothing to collect");
    } else {
        for id in &removed {
            println!("removed {id}");
        }
    }
    Ok(())
}
