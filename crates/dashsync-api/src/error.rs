use thiserror::Error;

/// Top-level error type for the `dashsync-api` crate.
///
/// Covers plumbing failures only: building clients, resolving URLs, and the
/// live-update transport. Expected exchange failures (4xx, 5xx, timeouts,
/// dropped connections) are never raised as `Error` -- the request executor
/// returns them as [`crate::ExchangeResult::Failure`] instead.
#[derive(Debug, Error)]
pub enum Error {
    // ── Setup ───────────────────────────────────────────────────────
    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Base URL uses a scheme that cannot be upgraded to a websocket.
    #[error("Unsupported URL scheme '{0}' (expected http or https)")]
    UnsupportedScheme(String),

    /// TLS setup or HTTP client construction failed.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed (handshake, DNS, refused, reset).
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// The transport delivered something that violates the framing protocol.
    #[error("WebSocket protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::WebSocketConnect(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_failures_are_transient() {
        assert!(Error::WebSocketConnect("refused".into()).is_transient());
        assert!(!Error::Tls("bad cert".into()).is_transient());
        assert!(!Error::Protocol("binary frame".into()).is_transient());
        assert!(!Error::UnsupportedScheme("ftp".into()).is_transient());
    }
}
