//! Configuration loading for dashsync.
//!
//! A TOML file layered with environment variables via `figment`, validated
//! and translated into `dashsync_core::SyncConfig`. Precedence, lowest
//! first:
//!
//! 1. built-in defaults
//! 2. `config.toml` (platform config dir, or an explicit path)
//! 3. `DASHSYNC_*` variables, nested with `__` (`DASHSYNC_BACKOFF__BASE_MS`)
//! 4. `API_BASE_URL`, for the base URL only
//!
//! Credentials never live here; the CLI takes the bearer token from a flag
//! or `DASHSYNC_TOKEN`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use dashsync_api::{BackoffPolicy, TlsMode};
use dashsync_core::SyncConfig;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level settings file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    /// Base address of the remote API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-attempt request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Additional attempts after the first.
    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default)]
    pub backoff: BackoffSettings,

    #[serde(default)]
    pub live: LiveSettings,

    #[serde(default)]
    pub tls: TlsSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            backoff: BackoffSettings::default(),
            live: LiveSettings::default(),
            tls: TlsSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackoffSettings {
    #[serde(default = "default_backoff_base_ms")]
    pub base_ms: u64,

    #[serde(default = "default_backoff_ceiling_ms")]
    pub ceiling_ms: u64,

    #[serde(default = "default_true")]
    pub jitter: bool,

    /// Fixed jitter seed, for reproducible runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base_ms(),
            ceiling_ms: default_backoff_ceiling_ms(),
            jitter: true,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LiveSettings {
    /// Path of the live endpoint relative to the base URL.
    #[serde(default = "default_live_path")]
    pub path: String,

    #[serde(default = "default_max_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_true")]
    pub subscribe_on_connect: bool,

    /// Per-topic record bound. 0 = unbounded.
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            path: default_live_path(),
            max_reconnect_attempts: default_max_attempts(),
            subscribe_on_connect: true,
            max_records: default_max_records(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TlsSettings {
    /// Accept any certificate.
    #[serde(default)]
    pub insecure: bool,

    /// Extra CA certificate (PEM).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,
}

fn default_base_url() -> String {
    dashsync_core::config::DEFAULT_BASE_URL.into()
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_retries() -> u32 {
    dashsync_core::config::DEFAULT_RETRIES
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_backoff_ceiling_ms() -> u64 {
    30_000
}
fn default_live_path() -> String {
    dashsync_core::config::DEFAULT_LIVE_PATH.into()
}
fn default_max_attempts() -> u32 {
    dashsync_core::config::DEFAULT_RECONNECT_MAX_ATTEMPTS
}
fn default_max_records() -> usize {
    dashsync_core::config::DEFAULT_MAX_RECORDS
}
fn default_true() -> bool {
    true
}

// ── Translation ─────────────────────────────────────────────────────

impl Settings {
    /// Check invariants without building anything.
    pub fn validate(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| invalid("base_url", format!("'{}': {e}", self.base_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(
                "base_url",
                format!("scheme must be http or https, got '{}'", url.scheme()),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(invalid("timeout_ms", "must be greater than zero"));
        }
        if self.backoff.base_ms > self.backoff.ceiling_ms {
            return Err(invalid(
                "backoff",
                format!(
                    "base_ms ({}) exceeds ceiling_ms ({})",
                    self.backoff.base_ms, self.backoff.ceiling_ms
                ),
            ));
        }
        if self.tls.insecure && self.tls.ca_cert.is_some() {
            return Err(invalid("tls", "insecure and ca_cert are mutually exclusive"));
        }
        Ok(url)
    }

    /// Build the runtime config.
    pub fn to_sync_config(&self) -> Result<SyncConfig, ConfigError> {
        let base_url = self.validate()?;

        let mut backoff = BackoffPolicy::new(
            Duration::from_millis(self.backoff.base_ms),
            Duration::from_millis(self.backoff.ceiling_ms),
        );
        if !self.backoff.jitter {
            backoff = backoff.without_jitter();
        }

        let tls = if self.tls.insecure {
            TlsMode::DangerAcceptInvalid
        } else if let Some(ref path) = self.tls.ca_cert {
            TlsMode::CustomCa(path.clone())
        } else {
            TlsMode::System
        };

        let mut config = SyncConfig::new(base_url);
        config.timeout = Duration::from_millis(self.timeout_ms);
        config.retries = self.retries;
        config.backoff = backoff;
        config.jitter_seed = self.backoff.seed;
        config.reconnect_max_attempts = self.live.max_reconnect_attempts;
        config.live_path.clone_from(&self.live.path);
        config.subscribe_on_connect = self.live.subscribe_on_connect;
        config.max_records = (self.live.max_records > 0).then_some(self.live.max_records);
        config.tls = tls;
        Ok(config)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "dashsync", "dashsync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("dashsync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// The layered provider stack, exposed for inspection.
pub fn figment(path: Option<&Path>) -> Figment {
    let path = path.map_or_else(config_path, Path::to_path_buf);

    Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("DASHSYNC_").split("__"))
        .merge(Env::raw().only(&["API_BASE_URL"]).map(|_| "base_url".into()))
}

/// Load settings from file + environment. A missing file is not an error.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let settings: Settings = figment(path).extract()?;
    settings.validate()?;
    Ok(settings)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize settings to TOML and write them to `path` (or the canonical
/// config path). Returns the path written.
pub fn save_settings(settings: &Settings, path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    settings.validate()?;
    let path = path.map_or_else(config_path, Path::to_path_buf);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(settings)?;
    std::fs::write(&path, toml_str)?;
    Ok(path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;

    fn load_in_jail(path: &str) -> Result<Settings, figment::Error> {
        load_settings(Some(Path::new(path))).map_err(|e| e.to_string().into())
    }

    #[test]
    fn defaults_without_file() {
        Jail::expect_with(|_jail| {
            let settings = load_in_jail("missing.toml")?;
            assert_eq!(settings, Settings::default());

            let config = settings.to_sync_config().unwrap();
            assert_eq!(config.base_url.as_str(), "http://localhost:8000/");
            assert_eq!(config.timeout, Duration::from_secs(30));
            assert_eq!(config.max_records, Some(10_000));
            Ok(())
        });
    }

    #[test]
    fn file_then_env_then_api_base_url() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                    base_url = "https://file.example.com"
                    retries = 4

                    [backoff]
                    base_ms = 200
                    seed = 42

                    [live]
                    max_records = 0
                "#,
            )?;

            let settings = load_in_jail("config.toml")?;
            assert_eq!(settings.base_url, "https://file.example.com");
            assert_eq!(settings.retries, 4);
            assert_eq!(settings.backoff.base_ms, 200);
            assert_eq!(settings.backoff.ceiling_ms, 30_000);

            jail.set_env("DASHSYNC_RETRIES", "1");
            jail.set_env("DASHSYNC_BACKOFF__CEILING_MS", "5000");
            let settings = load_in_jail("config.toml")?;
            assert_eq!(settings.retries, 1);
            assert_eq!(settings.backoff.ceiling_ms, 5000);

            jail.set_env("DASHSYNC_BASE_URL", "https://env.example.com");
            jail.set_env("API_BASE_URL", "http://api.example.com:9000");
            let settings = load_in_jail("config.toml")?;
            assert_eq!(settings.base_url, "http://api.example.com:9000");

            let config = settings.to_sync_config().unwrap();
            assert_eq!(config.jitter_seed, Some(42));
            assert_eq!(config.max_records, None);
            Ok(())
        });
    }

    #[test]
    fn rejects_bad_values() {
        let mut settings = Settings {
            base_url: "ftp://example.com".into(),
            ..Settings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Validation { ref field, .. }) if field == "base_url"
        ));

        settings.base_url = "http://ok.example.com".into();
        settings.timeout_ms = 0;
        assert!(settings.validate().is_err());

        settings.timeout_ms = 1;
        settings.backoff.base_ms = 60_000;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn invalid_file_value_fails_to_load() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", "timeout_ms = 0")?;
            assert!(load_settings(Some(Path::new("config.toml"))).is_err());
            Ok(())
        });
    }

    #[test]
    fn tls_settings_translate() {
        let settings = Settings {
            tls: TlsSettings {
                insecure: true,
                ca_cert: None,
            },
            ..Settings::default()
        };
        assert_eq!(
            settings.to_sync_config().unwrap().tls,
            TlsMode::DangerAcceptInvalid
        );

        let settings = Settings {
            tls: TlsSettings {
                insecure: false,
                ca_cert: Some(PathBuf::from("/etc/ssl/ca.pem")),
            },
            ..Settings::default()
        };
        assert_eq!(
            settings.to_sync_config().unwrap().tls,
            TlsMode::CustomCa(PathBuf::from("/etc/ssl/ca.pem"))
        );
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let settings = Settings {
            base_url: "https://saved.example.com".into(),
            retries: 5,
            ..Settings::default()
        };
        let written = save_settings(&settings, Some(&path)).unwrap();
        assert_eq!(written, path);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("base_url = \"https://saved.example.com\""));
        assert!(!text.contains("token"));
    }
}
