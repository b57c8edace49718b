use crate::context::Context;
use crate::output::{print_json, print_table, truncate};
use anyhow::Context as _;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use warden_core::config::WorkersConfig;
use warden_core::io::ensure_dir;
use warden_core::issue;
use warden_core::paths;
use warden_core::pool::{SpawnOutcome, WorkerPool};
use warden_core::session::{ReadResult, SessionState};

const WORKER_LOG_DIR: &str = "workers";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    /// Started and not yet reaped.
    Spawned,
    Completed,
    Failed,
    /// Pool was full; nothing was started.
    Deferred,
    /// The issue already has an active session.
    Skipped,
}

impl DispatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DispatchStatus::Spawned => "spawned",
            DispatchStatus::Completed => "completed",
            DispatchStatus::Failed => "failed",
            DispatchStatus::Deferred => "deferred",
            DispatchStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchRow {
    pub issue_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub status: DispatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

type WorkerResults = Arc<Mutex<HashMap<String, Result<Option<i32>, String>>>>;

/// Start one worker per issue, at most `max_active` at a time, and wait for
/// them all.
pub fn run(
    root: &Path,
    issues: Vec<String>,
    workflow: &str,
    max_active: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let ctx = Context::load(root)?;
    if !ctx.registry.contains(workflow) {
        anyhow::bail!("unknown workflow '{workflow}'");
    }
    if ctx.config.workers.command.is_empty() {
        anyhow::bail!("workers.command is empty");
    }
    let cap = max_active.unwrap_or(ctx.config.workers.max_active);

    let rt = tokio::runtime::Runtime::new()?;
    let rows = rt.block_on(dispatch(&ctx, &issues, workflow, cap))?;

    if json {
        return print_json(&rows);
    }
    print_table(
        &["ISSUE", "SESSION", "STATUS", "NOTE"],
        rows.iter()
            .map(|r| {
                vec![
                    r.issue_id.clone(),
                    r.session_id.clone().unwrap_or_else(|| "-".into()),
                    r.status.as_str().to_string(),
                    truncate(r.note.as_deref().unwrap_or_default(), 60),
                ]
            })
            .collect(),
    );
    Ok(())
}

async fn dispatch(
    ctx: &Context,
    issues: &[String],
    workflow: &str,
    cap: usize,
) -> anyhow::Result<Vec<DispatchRow>> {
    let phase = ctx
        .registry
        .initial_phase(workflow)
        .ok_or_else(|| anyhow::anyhow!("workflow '{workflow}' has no phases"))?
        .to_string();
    let log_dir = paths::warden_dir(&ctx.root).join(WORKER_LOG_DIR);
    ensure_dir(&log_dir)?;

    let mut pool = WorkerPool::new(cap);
    let results: WorkerResults = Arc::new(Mutex::new(HashMap::new()));
    let mut rows = Vec::new();

    for issue_id in issues {
        if let Some(active) = active_session(ctx, issue_id)? {
            rows.push(DispatchRow {
                issue_id: issue_id.clone(),
                session_id: Some(active),
                status: DispatchStatus::Skipped,
                exit_code: None,
                note: Some("already running".into()),
            });
            continue;
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let state = SessionState::new(
            &session_id,
            workflow,
            &phase,
            ctx.config.max_continuations_for(workflow),
        )
        .with_issue(Some(issue_id.clone()));
        ctx.store
            .write(&session_id, &state)
            .with_context(|| format!("failed to create session for {issue_id}"))?;
        issue::link(&ctx.root, issue_id, &session_id)?;

        let cmd = worker_command(
            &ctx.config.workers,
            &ctx.root,
            issue_id,
            &session_id,
            log_dir.join(format!("{session_id}.log")),
        );
        let sink = Arc::clone(&results);
        let key = session_id.clone();
        let outcome = pool.try_spawn(issue_id.clone(), async move {
            let result = run_worker(cmd).await;
            sink.lock().unwrap_or_else(|e| e.into_inner()).insert(key, result);
        });

        match outcome {
            SpawnOutcome::Spawned => rows.push(DispatchRow {
                issue_id: issue_id.clone(),
                session_id: Some(session_id),
                status: DispatchStatus::Spawned,
                exit_code: None,
                note: None,
            }),
            SpawnOutcome::AtCapacity { active, cap } => {
                // Nothing started, so nothing should look like it did.
                ctx.store.delete(&session_id)?;
                issue::remove(&ctx.root, issue_id)?;
                rows.push(DispatchRow {
                    issue_id: issue_id.clone(),
                    session_id: None,
                    status: DispatchStatus::Deferred,
                    exit_code: None,
                    note: Some(format!("{active}/{cap} workers busy")),
                });
            }
        }
    }

    let panicked = pool.join_all().await;
    let results = results.lock().unwrap_or_else(|e| e.into_inner());
    for row in rows.iter_mut().filter(|r| r.status == DispatchStatus::Spawned) {
        let Some(session_id) = &row.session_id else {
            continue;
        };
        match results.get(session_id) {
            Some(Ok(Some(0))) => {
                row.status = DispatchStatus::Completed;
                row.exit_code = Some(0);
            }
            Some(Ok(code)) => {
                row.status = DispatchStatus::Failed;
                row.exit_code = *code;
                row.note = Some(match code {
                    Some(c) => format!("exited with code {c}"),
                    None => "terminated by signal".into(),
                });
            }
            Some(Err(e)) => {
                row.status = DispatchStatus::Failed;
                row.note = Some(e.clone());
            }
            None => {
                row.status = DispatchStatus::Failed;
                row.note = Some(if panicked.contains(&row.issue_id) {
                    "worker panicked".into()
                } else {
                    "no result".into()
                });
            }
        }
    }
    Ok(rows)
}

/// Session already working on `issue_id`, if it is still in progress.
fn active_session(ctx: &Context, issue_id: &str) -> anyhow::Result<Option<String>> {
    let Some(session_id) = issue::lookup(&ctx.root, issue_id)? else {
        return Ok(None);
    };
    Ok(match ctx.store.read(&session_id) {
        ReadResult::Ok(state) if !state.is_done() => Some(session_id),
        _ => None,
    })
}

fn render(arg: &str, issue_id: &str, session_id: &str) -> String {
    arg.replace("{issue}", issue_id)
        .replace("{session}", session_id)
}

fn worker_command(
    workers: &WorkersConfig,
    root: &Path,
    issue_id: &str,
    session_id: &str,
    log_path: PathBuf,
) -> (Command, PathBuf) {
    let mut args = workers
        .command
        .iter()
        .map(|a| render(a, issue_id, session_id));
    let program = args.next().unwrap_or_default();
    let mut cmd = Command::new(program);
    cmd.args(args)
        .arg(render(&workers.prompt, issue_id, session_id))
        .current_dir(root)
        .env("WARDEN_SESSION_ID", session_id)
        .env("WARDEN_ISSUE_ID", issue_id)
        .env_remove("CLAUDECODE")
        .stdin(Stdio::null());
    (cmd, log_path)
}

async fn run_worker((mut cmd, log_path): (Command, PathBuf)) -> Result<Option<i32>, String> {
    let log = std::fs::File::create(&log_path)
        .map_err(|e| format!("cannot create {}: {e}", log_path.display()))?;
    let err_log = log
        .try_clone()
        .map_err(|e| format!("cannot create {}: {e}", log_path.display()))?;
    cmd.stdout(Stdio::from(log)).stderr(Stdio::from(err_log));

    let status = cmd
        .status()
        .await
        .map_err(|e| format!("failed to start worker: {e}"))?;
    tracing::info!(log = %log_path.display(), status = %status, "worker exited");
    Ok(status.code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_render_in_every_argument() {
        let workers = WorkersConfig {
            max_active: 1,
            command: vec!["agent".into(), "--id={session}".into()],
            prompt: "/impl {issue}".into(),
        };
        let (cmd, _) = worker_command(&workers, Path::new("/tmp"), "ISSUE-1", "abc", PathBuf::from("x.log"));
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "agent");
        let args: Vec<_> = std_cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, ["--id=abc", "/impl ISSUE-1"]);
    }
}
