//! CLI configuration: `dashsync_config` settings plus `GlobalOpts` flag
//! overrides (--base-url, --timeout, --retries, --insecure, --token).

use std::path::PathBuf;

use dashsync_config::Settings;
use dashsync_core::{Credential, CredentialStore, SyncConfig};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Path of the config file in effect.
pub fn active_path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(dashsync_config::config_path)
}

/// File + environment settings with flags applied on top.
pub fn effective_settings(global: &GlobalOpts) -> Result<Settings, CliError> {
    let mut settings = dashsync_config::load_settings(global.config.as_deref())?;

    if let Some(ref url) = global.base_url {
        settings.base_url.clone_from(url);
    }
    if let Some(timeout) = global.timeout {
        settings.timeout_ms = timeout;
    }
    if let Some(retries) = global.retries {
        settings.retries = retries;
    }
    if global.insecure {
        settings.tls.insecure = true;
        settings.tls.ca_cert = None;
    }

    settings.validate()?;
    Ok(settings)
}

/// Runtime config for the sync client.
pub fn sync_config(global: &GlobalOpts) -> Result<SyncConfig, CliError> {
    Ok(effective_settings(global)?.to_sync_config()?)
}

/// Credential holder seeded from --token / `DASHSYNC_TOKEN`.
pub fn credentials(global: &GlobalOpts) -> CredentialStore {
    match global.token.as_deref().map(str::trim) {
        Some(token) if !token.is_empty() => CredentialStore::with_credential(Credential::new(token)),
        _ => {
            tracing::debug!("No bearer token configured");
            CredentialStore::new()
        }
    }
}
