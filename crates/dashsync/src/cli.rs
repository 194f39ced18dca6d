//! Clap derive structures for the `dashsync` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// dashsync -- resilient requests and live collections from the terminal
#[derive(Debug, Parser)]
#[command(
    name = "dashsync",
    version,
    about = "Query a dashboard API and follow its live updates",
    long_about = "Issues requests with bounded retry, timeouts and response validation,\n\
        and follows live topics over an auto-reconnecting websocket.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// API base URL (overrides config and API_BASE_URL)
    #[arg(long, short = 'u', global = true)]
    pub base_url: Option<String>,

    /// Bearer token
    #[arg(long, env = "DASHSYNC_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Per-attempt request timeout in milliseconds
    #[arg(long, short = 't', global = true)]
    pub timeout: Option<u64>,

    /// Additional attempts after the first
    #[arg(long, short = 'r', global = true)]
    pub retries: Option<u32>,

    /// Config file (default: platform config dir)
    #[arg(long, env = "DASHSYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Accept invalid TLS certificates
    #[arg(long, short = 'k', global = true)]
    pub insecure: bool,

    /// Output format
    #[arg(long, short = 'o', default_value = "json", global = true)]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Issue one request and print the JSON response
    #[command(alias = "req")]
    Request(RequestArgs),

    /// Follow a live topic and print every applied change
    Watch(WatchArgs),

    /// Inspect configuration
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

#[derive(Debug, Args)]
pub struct RequestArgs {
    /// HTTP method
    #[arg(value_enum, ignore_case = true)]
    pub method: HttpMethod,

    /// Path relative to the base URL
    pub path: String,

    /// JSON request body
    #[arg(long, short = 'd')]
    pub body: Option<String>,

    /// Query parameter (repeatable)
    #[arg(long = "query", short = 'q', value_name = "KEY=VALUE")]
    pub query: Vec<String>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Topic to subscribe to
    pub topic: String,

    /// Print the final collection when the watch ends
    #[arg(long)]
    pub snapshot: bool,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective settings as TOML
    Show,

    /// Print the config file path
    Path,
}
