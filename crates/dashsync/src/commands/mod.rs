//! Command handlers: bridge CLI args to the sync client and output.

pub mod config_cmd;
pub mod request;
pub mod watch;
