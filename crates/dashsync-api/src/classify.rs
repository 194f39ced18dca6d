// ── Failure taxonomy ──
//
// Maps the outcome of one exchange attempt onto exactly one `FailureKind`.
// The kind is the only input to the executor's retry decision.

use serde::{Deserialize, Serialize};

/// Why an exchange failed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    /// The request itself was rejected (4xx other than 429, or unusable input).
    ClientError,
    /// The server failed or throttled us (5xx, 429).
    ServerError,
    /// No response: DNS failure, refused or reset connection.
    NetworkError,
    /// No response within the per-attempt timeout.
    Timeout,
    /// A 2xx response whose body could not be used.
    ValidationError,
}

impl FailureKind {
    /// Whether another attempt may help. `Timeout` is retried too, but only
    /// up to the same attempt cap as the other transient kinds.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::ServerError | Self::NetworkError | Self::Timeout)
    }
}

/// What one attempt produced, reduced to the facts classification needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// A response arrived. `parsed` is false when a 2xx body was not JSON.
    Response { status: u16, parsed: bool },
    /// The timeout guard fired before the exchange completed.
    TimedOut,
    /// The connection could not be established or broke mid-exchange.
    ConnectionFailed,
}

impl AttemptOutcome {
    /// Reduce a transport error. Reqwest's own timeouts count as timeouts;
    /// everything else that prevented a response is a network error.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::TimedOut
        } else {
            Self::ConnectionFailed
        }
    }
}

/// Classify an attempt. `None` means success.
///
/// Statuses outside 2xx that are neither 429 nor 5xx (unfollowed 3xx,
/// 1xx, or >= 600) are treated as client errors: nothing a retry fixes.
pub fn classify(outcome: AttemptOutcome) -> Option<FailureKind> {
    match outcome {
        AttemptOutcome::TimedOut => Some(FailureKind::Timeout),
        AttemptOutcome::ConnectionFailed => Some(FailureKind::NetworkError),
        AttemptOutcome::Response { status, parsed } => match status {
            200..=299 if parsed => None,
            200..=299 => Some(FailureKind::ValidationError),
            429 | 500..=599 => Some(FailureKind::ServerError),
            _ => Some(FailureKind::ClientError),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16) -> AttemptOutcome {
        AttemptOutcome::Response {
            status,
            parsed: true,
        }
    }

    #[test]
    fn success_statuses() {
        assert_eq!(classify(response(200)), None);
        assert_eq!(classify(response(204)), None);
    }

    #[test]
    fn client_errors_are_not_retryable() {
        for status in [400, 401, 403, 404, 422, 499] {
            let kind = classify(response(status));
            assert_eq!(kind, Some(FailureKind::ClientError), "status {status}");
            assert!(!FailureKind::ClientError.is_retryable());
        }
    }

    #[test]
    fn throttling_and_5xx_are_server_errors() {
        for status in [429, 500, 502, 503, 599] {
            assert_eq!(
                classify(response(status)),
                Some(FailureKind::ServerError),
                "status {status}"
            );
        }
        assert!(FailureKind::ServerError.is_retryable());
    }

    #[test]
    fn missing_response_kinds() {
        assert_eq!(classify(AttemptOutcome::TimedOut), Some(FailureKind::Timeout));
        assert_eq!(
            classify(AttemptOutcome::ConnectionFailed),
            Some(FailureKind::NetworkError)
        );
        assert!(FailureKind::Timeout.is_retryable());
        assert!(FailureKind::NetworkError.is_retryable());
    }

    #[test]
    fn unparseable_success_is_validation_error() {
        let outcome = AttemptOutcome::Response {
            status: 200,
            parsed: false,
        };
        assert_eq!(classify(outcome), Some(FailureKind::ValidationError));
        assert!(!FailureKind::ValidationError.is_retryable());
    }

    #[test]
    fn odd_statuses_fall_back_to_client_error() {
        assert_eq!(classify(response(304)), Some(FailureKind::ClientError));
        assert_eq!(classify(response(101)), Some(FailureKind::ClientError));
    }

    #[test]
    fn display_matches_serde_names() {
        let json = serde_json::to_string(&FailureKind::NetworkError).unwrap_or_default();
        assert_eq!(json, format!("\"{}\"", FailureKind::NetworkError));

        assert_eq!(FailureKind::ServerError.to_string(), "server_error");
        assert_eq!(FailureKind::ValidationError.as_ref(), "validation_error");
        assert_eq!(FailureKind::Timeout.to_string(), "timeout");
    }
}
