// ── Runtime sync configuration ──
//
// Describes *how* to reach the remote service and how hard to try.
// Core never reads config files; the CLI (via dashsync-config) or an
// embedding application builds a `SyncConfig` and hands it in.

use std::time::Duration;

use url::Url;

use dashsync_api::{BackoffPolicy, ExecutorConfig, ReconnectConfig, TlsMode, TransportConfig};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RETRIES: u32 = 2;
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_LIVE_PATH: &str = "ws";
pub const DEFAULT_MAX_RECORDS: usize = 10_000;

/// Everything the sync layer needs at runtime.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base address for requests; the live channel upgrades it to ws/wss.
    pub base_url: Url,
    /// Per-attempt request timeout.
    pub timeout: Duration,
    /// Additional request attempts after the first.
    pub retries: u32,
    /// Shared by request retries and live reconnects.
    pub backoff: BackoffPolicy,
    /// Makes jitter reproducible.
    pub jitter_seed: Option<u64>,
    pub reconnect_max_attempts: u32,
    /// Path of the live endpoint, relative to `base_url`.
    pub live_path: String,
    /// Send `{"type":"subscribe","topic":..}` once connected.
    pub subscribe_on_connect: bool,
    /// Per-topic bound on records plus tombstones. `None` = unbounded.
    pub max_records: Option<usize>,
    pub tls: TlsMode,
    pub user_agent: String,
}

impl SyncConfig {
    pub fn new(base_url: Url) -> Self {
        let transport = TransportConfig::default();
        Self {
            base_url,
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            backoff: BackoffPolicy::default(),
            jitter_seed: None,
            reconnect_max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
            live_path: DEFAULT_LIVE_PATH.into(),
            subscribe_on_connect: true,
            max_records: Some(DEFAULT_MAX_RECORDS),
            tls: transport.tls,
            user_agent: transport.user_agent,
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            base_url: self.base_url.clone(),
            timeout: self.timeout,
            retries: self.retries,
            backoff: self.backoff,
            jitter_seed: self.jitter_seed,
            transport: TransportConfig {
                tls: self.tls.clone(),
                user_agent: self.user_agent.clone(),
            },
        }
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            backoff: self.backoff,
            max_attempts: self.reconnect_max_attempts,
            jitter_seed: self.jitter_seed,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SyncConfig::new(Url::parse(DEFAULT_BASE_URL).unwrap());
        assert_eq!(config.timeout, Duration::from_millis(30_000));
        assert_eq!(config.retries, 2);
        assert_eq!(config.reconnect_max_attempts, 5);
        assert_eq!(config.backoff.base, Duration::from_secs(1));
        assert_eq!(config.backoff.ceiling, Duration::from_secs(30));
        assert!(config.backoff.jitter);
        assert_eq!(config.max_records, Some(10_000));
        assert_eq!(config.tls, TlsMode::System);
    }

    #[test]
    fn derived_configs_carry_fields() {
        let mut config = SyncConfig::new(Url::parse("https://api.example.com").unwrap());
        config.retries = 7;
        config.jitter_seed = Some(3);
        config.reconnect_max_attempts = 9;

        let exec = config.executor_config();
        assert_eq!(exec.retries, 7);
        assert_eq!(exec.jitter_seed, Some(3));
        assert_eq!(exec.base_url.as_str(), "https://api.example.com/");

        let reconnect = config.reconnect_config();
        assert_eq!(reconnect.max_attempts, 9);
        assert_eq!(reconnect.jitter_seed, Some(3));
    }
}
