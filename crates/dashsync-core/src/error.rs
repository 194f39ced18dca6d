// ── Core error types ──
//
// User-facing errors from dashsync-core. Expected exchange failures reach
// callers as `ExchangeResult::Failure`; `CoreError` is what they become
// once a caller decides to propagate one, plus construction failures and
// live-channel exhaustion. The `From` impls translate transport-layer
// types into these variants.

use thiserror::Error;

use dashsync_api::{Failure, FailureKind, SchemaError};

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Exchange errors ──────────────────────────────────────────────
    #[error("Request failed ({kind}) after {attempts} attempt(s): {detail}")]
    Request {
        kind: FailureKind,
        detail: String,
        status: Option<u16>,
        attempts: u32,
    },

    #[error("Response rejected: {message}")]
    Validation { message: String },

    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Live channel for '{topic}' gave up after {attempts} reconnect attempts: {last_error}")]
    LiveChannelExhausted {
        topic: String,
        attempts: u32,
        last_error: String,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Returns `true` if retrying later might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request { kind, .. } => kind.is_retryable(),
            Self::ConnectionFailed { .. } | Self::LiveChannelExhausted { .. } => true,
            Self::Validation { .. } | Self::Config { .. } => false,
        }
    }

    /// Failure kind for exchange errors.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Request { kind, .. } => Some(*kind),
            Self::Validation { .. } => Some(FailureKind::ValidationError),
            _ => None,
        }
    }
}

// ── Conversion from transport-layer types ────────────────────────────

impl From<Failure> for CoreError {
    fn from(failure: Failure) -> Self {
        CoreError::Request {
            kind: failure.kind,
            detail: failure.detail,
            status: failure.status,
            attempts: failure.attempts,
        }
    }
}

impl From<SchemaError> for CoreError {
    fn from(err: SchemaError) -> Self {
        CoreError::Validation {
            message: err.to_string(),
        }
    }
}

impl From<dashsync_api::Error> for CoreError {
    fn from(err: dashsync_api::Error) -> Self {
        match err {
            dashsync_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            dashsync_api::Error::UnsupportedScheme(scheme) => CoreError::Config {
                message: format!("Unsupported URL scheme '{scheme}' (expected http or https)"),
            },
            dashsync_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            dashsync_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket connection failed: {reason}"),
            },
            dashsync_api::Error::Protocol(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket protocol error: {msg}"),
            },
        }
    }
}
