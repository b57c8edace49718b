//! `claude-judge`: a [`warden_core::judge::Judge`] backed by the Claude CLI.
//!
//! ```text
//! JudgeRequest ──build_prompt──▶ claude --print --output-format json
//!                                   │ stdin: prompt
//!                                   ▼
//!                 CliResult.result ──parse_verdict──▶ Verdict
//! ```
//!
//! Timeouts are the caller's job; dropping the future kills the child.

pub mod error;
pub mod judge;
pub mod types;

pub(crate) mod process;

pub use error::ClaudeJudgeError;
pub use judge::{build_prompt, ClaudeJudge};
pub use types::{CliResult, JudgeOptions};
