use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::ClaudeJudgeError;
use crate::types::{CliResult, JudgeOptions};

type Result<T> = std::result::Result<T, ClaudeJudgeError>;

/// Run one non-interactive `claude --print` turn and return its result text.
///
/// The prompt goes in on stdin. The child is killed if the returned future is
/// dropped, so an outer timeout also ends the process.
pub(crate) async fn run_print(prompt: &str, opts: &JudgeOptions) -> Result<String> {
    let mut cmd = build_command(opts);
    // Allow running from inside a Claude session, where warden hooks live.
    cmd.env_remove("CLAUDECODE");
    run_command(cmd, prompt).await
}

pub(crate) async fn run_command(mut cmd: Command, prompt: &str) -> Result<String> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(prompt.as_bytes()).await?;
        stdin.flush().await?;
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let msg = match output.status.code() {
            Some(code) if stderr.is_empty() => format!("claude exited with code {code}"),
            Some(code) => format!("claude exited with code {code}\nstderr: {stderr}"),
            None => "claude terminated by signal".to_string(),
        };
        return Err(ClaudeJudgeError::Process(msg));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let trimmed = stdout.trim();
    let parsed: CliResult =
        serde_json::from_str(trimmed).map_err(|source| ClaudeJudgeError::Parse {
            output: trimmed.to_owned(),
            source,
        })?;

    if parsed.is_error {
        return Err(ClaudeJudgeError::Process(format!(
            "claude reported an error ({})",
            parsed.subtype.as_deref().unwrap_or("unknown")
        )));
    }
    parsed
        .result
        .ok_or_else(|| ClaudeJudgeError::Process("claude returned no result text".into()))
}

fn build_command(opts: &JudgeOptions) -> Command {
    let mut cmd = Command::new(&opts.executable);
    cmd.arg("--print")
        .arg("--output-format")
        .arg("json")
        .arg("--max-turns")
        .arg("1");

    if let Some(model) = &opts.model {
        cmd.arg("--model").arg(model);
    }
    cmd.args(&opts.extra_args);
    cmd
}
