pub mod cmd;
pub mod context;
pub mod output;
pub mod root;
