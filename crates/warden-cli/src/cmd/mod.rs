pub mod config;
pub mod dispatch;
pub mod hook;
pub mod issue;
pub mod rules;
pub mod session;
