//! CLI error types with miette diagnostics.
//!
//! Maps exchange failures and `CoreError` variants into user-facing errors
//! with actionable help text and a distinct exit code per failure kind.

use miette::Diagnostic;
use thiserror::Error;

use dashsync_config::ConfigError;
use dashsync_core::{CoreError, Failure, FailureKind};

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const CLIENT: i32 = 2;
    pub const SERVER: i32 = 5;
    pub const NETWORK: i32 = 7;
    pub const TIMEOUT: i32 = 8;
    pub const VALIDATION: i32 = 9;
    pub const CONFIG: i32 = 10;
}

fn status_suffix(status: Option<&u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Exchange failures ────────────────────────────────────────────
    #[error("Request rejected{}: {detail}", status_suffix(.status.as_ref()))]
    #[diagnostic(
        code(dashsync::client_error),
        help("The server refused the request as sent. Check the path, body and token.")
    )]
    ClientError { status: Option<u16>, detail: String },

    #[error("Server error{} after {attempts} attempt(s): {detail}", status_suffix(.status.as_ref()))]
    #[diagnostic(
        code(dashsync::server_error),
        help("The server kept failing. Retry later or raise --retries.")
    )]
    ServerError {
        status: Option<u16>,
        detail: String,
        attempts: u32,
    },

    #[error("Network error after {attempts} attempt(s): {detail}")]
    #[diagnostic(
        code(dashsync::network_error),
        help("Check that the API is reachable at the configured base URL.")
    )]
    NetworkError { detail: String, attempts: u32 },

    #[error("Request timed out after {attempts} attempt(s)")]
    #[diagnostic(
        code(dashsync::timeout),
        help("Increase the per-attempt timeout with --timeout (milliseconds).")
    )]
    Timeout { attempts: u32 },

    #[error("Response did not match the expected shape: {detail}")]
    #[diagnostic(code(dashsync::validation))]
    Validation { detail: String },

    // ── Live updates ─────────────────────────────────────────────────
    #[error("Could not connect to {url}")]
    #[diagnostic(
        code(dashsync::connection_failed),
        help("Reason: {reason}\nCheck --base-url and the live path in your config.")
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Live updates for '{topic}' stopped after {attempts} reconnect attempts")]
    #[diagnostic(code(dashsync::live_exhausted), help("Last error: {last_error}"))]
    LiveExhausted {
        topic: String,
        attempts: u32,
        last_error: String,
    },

    // ── Input / configuration ────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(dashsync::invalid_input))]
    InvalidInput { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(
        code(dashsync::config),
        help("Run `dashsync config path` to locate the config file.")
    )]
    Config(#[from] ConfigError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to encode output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to encode config: {0}")]
    Toml(#[from] toml::ser::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ClientError { .. } | Self::InvalidInput { .. } => exit_code::CLIENT,
            Self::ServerError { .. } => exit_code::SERVER,
            Self::NetworkError { .. } | Self::ConnectionFailed { .. } | Self::LiveExhausted { .. } => {
                exit_code::NETWORK
            }
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } => exit_code::VALIDATION,
            Self::Config(_) => exit_code::CONFIG,
            Self::Io(_) | Self::Json(_) | Self::Toml(_) => exit_code::GENERAL,
        }
    }

    fn from_request(kind: FailureKind, detail: String, status: Option<u16>, attempts: u32) -> Self {
        match kind {
            FailureKind::ClientError => Self::ClientError { status, detail },
            FailureKind::ServerError => Self::ServerError {
                status,
                detail,
                attempts,
            },
            FailureKind::NetworkError => Self::NetworkError { detail, attempts },
            FailureKind::Timeout => Self::Timeout { attempts },
            FailureKind::ValidationError => Self::Validation { detail },
        }
    }
}

impl From<Failure> for CliError {
    fn from(failure: Failure) -> Self {
        Self::from_request(failure.kind, failure.detail, failure.status, failure.attempts)
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Request {
                kind,
                detail,
                status,
                attempts,
            } => Self::from_request(kind, detail, status, attempts),
            CoreError::Validation { message } => Self::Validation { detail: message },
            CoreError::ConnectionFailed { url, reason } => Self::ConnectionFailed { url, reason },
            CoreError::LiveChannelExhausted {
                topic,
                attempts,
                last_error,
            } => Self::LiveExhausted {
                topic,
                attempts,
                last_error,
            },
            CoreError::Config { message } => Self::InvalidInput {
                field: "config".into(),
                reason: message,
            },
        }
    }
}
