//! Permission and continuation control for autonomous coding agents.
//!
//! Tool calls are decided by [`arbiter::Arbiter`] (rules, then workflow
//! auto-allow, then an optional judge and remote approval). Stop requests are
//! decided by [`continuation::ContinuationArbiter`] against per-session state
//! in a [`session::SessionStore`].

pub mod approval;
pub mod arbiter;
pub mod config;
pub mod continuation;
pub mod error;
pub mod io;
pub mod issue;
pub mod judge;
pub mod log;
pub mod normalize;
pub mod paths;
pub mod pool;
pub mod rules;
pub mod session;
pub mod target;
pub mod types;
pub mod workflow;

pub use error::{Result, WardenError};
