// Request executor
//
// Runs one logical call against the remote API: attaches the bearer
// credential, guards each attempt with a timeout, classifies failures, and
// retries transient ones with backoff. Expected failures come back as
// `ExchangeResult::Failure`; nothing here panics or returns `Err` for a bad
// response.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

use crate::auth::CredentialStore;
use crate::backoff::{BackoffPolicy, jitter_rng};
use crate::classify::{AttemptOutcome, FailureKind, classify};
use crate::endpoint::{Endpoint, RequestOptions};
use crate::error::Error;
use crate::schema::{Schema, Validation, validate};
use crate::transport::TransportConfig;

const DETAIL_MAX_CHARS: usize = 512;

// ── Results ─────────────────────────────────────────────────────────

/// Terminal failure of an exchange, after any retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} after {attempts} attempt(s): {detail}")]
pub struct Failure {
    pub kind: FailureKind,
    pub detail: String,
    /// HTTP status of the last response, if one arrived.
    pub status: Option<u16>,
    /// Attempts actually made (0 when the call was rejected before sending).
    pub attempts: u32,
}

/// Discriminated result the caller must branch on.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeResult<T> {
    Success(T),
    Failure(Failure),
}

impl<T> ExchangeResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Success(_) => None,
            Self::Failure(f) => Some(f),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ExchangeResult<U> {
        match self {
            Self::Success(v) => ExchangeResult::Success(f(v)),
            Self::Failure(e) => ExchangeResult::Failure(e),
        }
    }

    pub fn into_result(self) -> Result<T, Failure> {
        match self {
            Self::Success(v) => Ok(v),
            Self::Failure(e) => Err(e),
        }
    }
}

// ── Configuration ───────────────────────────────────────────────────

/// Executor-wide defaults. Every field can be overridden per call except
/// the base URL, backoff, and transport.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub base_url: Url,
    /// Per-attempt timeout. Default: 30s.
    pub timeout: Duration,
    /// Additional attempts after the first. Default: 2.
    pub retries: u32,
    pub backoff: BackoffPolicy,
    /// Seed for backoff jitter; `None` draws from OS entropy per call.
    pub jitter_seed: Option<u64>,
    pub transport: TransportConfig,
}

impl ExecutorConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: Duration::from_secs(30),
            retries: 2,
            backoff: BackoffPolicy::default(),
            jitter_seed: None,
            transport: TransportConfig::default(),
        }
    }
}

// ── Retry bookkeeping ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Retry { attempt: u32 },
    GiveUp,
}

/// Attempt counter for one call. `attempt` is zero-based.
#[derive(Debug, Clone, Copy)]
struct RetryBudget {
    attempt: u32,
    retries: u32,
}

impl RetryBudget {
    fn new(retries: u32) -> Self {
        Self {
            attempt: 0,
            retries,
        }
    }

    fn attempts_made(self) -> u32 {
        self.attempt + 1
    }

    /// Decide after a failed attempt. On `Retry`, `attempt` is the index of
    /// the attempt that just failed (the backoff input).
    fn on_failure(&mut self, kind: FailureKind) -> Decision {
        if !kind.is_retryable() || self.attempt >= self.retries {
            return Decision::GiveUp;
        }
        let failed = self.attempt;
        self.attempt += 1;
        Decision::Retry { attempt: failed }
    }
}

/// Outcome of a single attempt, before the retry decision.
enum Attempt {
    Success { status: u16, payload: Value },
    Failed {
        kind: FailureKind,
        detail: String,
        status: Option<u16>,
        retry_after: Option<Duration>,
    },
}

struct Delivered {
    status: u16,
    payload: Value,
    attempts: u32,
}

// ── Executor ────────────────────────────────────────────────────────

/// Issues unary request/response exchanges with bounded retry, timeout,
/// and response validation.
///
/// Calls are independent: the only shared state is read-only access to the
/// [`CredentialStore`].
pub struct RequestExecutor {
    http: reqwest::Client,
    config: ExecutorConfig,
    credentials: CredentialStore,
}

impl RequestExecutor {
    pub fn new(config: ExecutorConfig, credentials: CredentialStore) -> Result<Self, Error> {
        let http = config.transport.build_client()?;
        Ok(Self::with_client(http, config, credentials))
    }

    /// Create an executor around a pre-built `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        config: ExecutorConfig,
        credentials: CredentialStore,
    ) -> Self {
        Self {
            http,
            config,
            credentials,
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn base_url(&self) -> &Url {
        &self.config.base_url
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Perform one logical call and return the raw JSON payload.
    ///
    /// An empty 2xx body yields `Value::Null`.
    pub async fn execute(
        &self,
        endpoint: &Endpoint,
        options: &RequestOptions,
    ) -> ExchangeResult<Value> {
        match self.run(endpoint, options).await {
            Ok(delivered) => ExchangeResult::Success(delivered.payload),
            Err(failure) => ExchangeResult::Failure(failure),
        }
    }

    /// Perform one logical call and validate the payload against `S`.
    ///
    /// Schema drift yields `Success(Validation::Degraded { .. })`; only a
    /// payload with nothing recoverable becomes `Failure(ValidationError)`.
    pub async fn fetch<S: Schema>(
        &self,
        endpoint: &Endpoint,
        options: &RequestOptions,
    ) -> ExchangeResult<Validation<S>> {
        let delivered = match self.run(endpoint, options).await {
            Ok(delivered) => delivered,
            Err(failure) => return ExchangeResult::Failure(failure),
        };

        match validate::<S>(&delivered.payload) {
            Ok(validation) => ExchangeResult::Success(validation),
            Err(e) => {
                error!(
                    method = %endpoint.method(),
                    path = endpoint.path(),
                    kind = %FailureKind::ValidationError,
                    status = delivered.status,
                    attempts = delivered.attempts,
                    error = %e,
                    "response failed validation"
                );
                ExchangeResult::Failure(Failure {
                    kind: FailureKind::ValidationError,
                    detail: e.to_string(),
                    status: Some(delivered.status),
                    attempts: delivered.attempts,
                })
            }
        }
    }

    // ── Retry loop ───────────────────────────────────────────────────

    #[tracing::instrument(
        name = "exchange",
        skip_all,
        fields(method = %endpoint.method(), path = endpoint.path())
    )]
    async fn run(&self, endpoint: &Endpoint, options: &RequestOptions) -> Result<Delivered, Failure> {
        let url = endpoint_url(&self.config.base_url, endpoint).map_err(|e| {
            error!(error = %e, "endpoint cannot be resolved against base URL");
            Failure {
                kind: FailureKind::ClientError,
                detail: format!("invalid endpoint path '{}': {e}", endpoint.path()),
                status: None,
                attempts: 0,
            }
        })?;

        let timeout = options
            .timeout
            .filter(|t| !t.is_zero())
            .or_else(|| endpoint.timeout_override())
            .unwrap_or(self.config.timeout);
        let mut budget = RetryBudget::new(options.retries.unwrap_or(self.config.retries));
        let mut rng = jitter_rng(self.config.jitter_seed);

        loop {
            let attempt = self.attempt(&url, endpoint, options, timeout).await;

            let (kind, detail, status, retry_after) = match attempt {
                Attempt::Success { status, payload } => {
                    debug!(status, attempts = budget.attempts_made(), "exchange succeeded");
                    return Ok(Delivered {
                        status,
                        payload,
                        attempts: budget.attempts_made(),
                    });
                }
                Attempt::Failed {
                    kind,
                    detail,
                    status,
                    retry_after,
                } => (kind, detail, status, retry_after),
            };

            let attempts = budget.attempts_made();
            warn!(kind = %kind, attempt = attempts, status, detail = %detail, "exchange attempt failed");

            match budget.on_failure(kind) {
                Decision::GiveUp => {
                    error!(kind = %kind, attempts, status, "exchange failed");
                    return Err(Failure {
                        kind,
                        detail,
                        status,
                        attempts,
                    });
                }
                Decision::Retry { attempt } => {
                    let delay = self
                        .config
                        .backoff
                        .delay_with_hint(attempt, retry_after, &mut rng);
                    debug!(
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        next_attempt = attempt + 2,
                        "waiting before retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    // ── Single attempt ───────────────────────────────────────────────

    async fn attempt(
        &self,
        url: &Url,
        endpoint: &Endpoint,
        options: &RequestOptions,
        timeout: Duration,
    ) -> Attempt {
        let mut request = self.http.request(endpoint.method().clone(), url.clone());

        // Re-read per attempt so a token refreshed mid-retry is picked up.
        let bearer = options
            .credential
            .as_ref()
            .map(crate::auth::Credential::bearer_header)
            .or_else(|| self.credentials.get().map(|c| c.bearer_header()));
        if let Some(bearer) = bearer {
            request = request.header(AUTHORIZATION, bearer);
        }
        if let Some(body) = endpoint.json_body() {
            request = request.json(body);
        }

        let exchange = async {
            let response = request.send().await?;
            let status = response.status().as_u16();
            let retry_after = honors_retry_after(status)
                .then(|| retry_after(response.headers()))
                .flatten();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, retry_after, body))
        };

        let (status, retry_after, body) = match tokio::time::timeout(timeout, exchange).await {
            Err(_elapsed) => {
                return Attempt::Failed {
                    kind: FailureKind::Timeout,
                    detail: format!("no response within {}ms", timeout.as_millis()),
                    status: None,
                    retry_after: None,
                };
            }
            Ok(Err(e)) => {
                let kind = classify(AttemptOutcome::from_transport(&e))
                    .unwrap_or(FailureKind::NetworkError);
                return Attempt::Failed {
                    kind,
                    detail: e.to_string(),
                    status: None,
                    retry_after: None,
                };
            }
            Ok(Ok(parts)) => parts,
        };

        if !(200..300).contains(&status) {
            let kind = classify(AttemptOutcome::Response {
                status,
                parsed: true,
            })
            .unwrap_or(FailureKind::ClientError);
            return Attempt::Failed {
                kind,
                detail: error_detail(&body, status),
                status: Some(status),
                retry_after,
            };
        }

        if body.trim().is_empty() {
            return Attempt::Success {
                status,
                payload: Value::Null,
            };
        }

        match serde_json::from_str::<Value>(&body) {
            Ok(payload) => Attempt::Success { status, payload },
            Err(e) => Attempt::Failed {
                kind: classify(AttemptOutcome::Response {
                    status,
                    parsed: false,
                })
                .unwrap_or(FailureKind::ValidationError),
                detail: format!("response body is not JSON: {e}"),
                status: Some(status),
                retry_after: None,
            },
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// `{base}/{path}?{query}` with exactly one slash at the join.
fn endpoint_url(base: &Url, endpoint: &Endpoint) -> Result<Url, url::ParseError> {
    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        endpoint.path().trim_start_matches('/')
    );
    let mut url = Url::parse(&joined)?;
    if !endpoint.query_pairs().is_empty() {
        url.query_pairs_mut().extend_pairs(endpoint.query_pairs());
    }
    Ok(url)
}

/// Only 429 and 503 carry a `Retry-After` the retry loop waits on.
fn honors_retry_after(status: u16) -> bool {
    matches!(status, 429 | 503)
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Human-readable failure detail: a JSON error message when the body has
/// one, otherwise the truncated body, otherwise the status reason.
fn error_detail(body: &str, status: u16) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        let message = ["detail", "message", "error"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str));
        if let Some(message) = message {
            return message.to_owned();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .map_or_else(|| format!("HTTP {status}"), |r| format!("HTTP {status} {r}"));
    }
    trimmed.chars().take(DETAIL_MAX_CHARS).collect()
}
