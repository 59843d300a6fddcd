//! Sync settings shared by the CLI and embedding apps.
//!
//! Settings live in a small JSON file. Every field is optional on disk;
//! missing values fall back to defaults, and a handful of environment
//! variables override what the file says.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::DEFAULT_STORAGE_KEY;
use crate::util::{is_http_url, normalize_text_option};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

pub const ENV_SUBMIT_ENDPOINT: &str = "FIELDSYNC_SUBMIT_ENDPOINT";
pub const ENV_API_TOKEN: &str = "FIELDSYNC_API_TOKEN";
pub const ENV_CONNECTIVITY_URL: &str = "FIELDSYNC_CONNECTIVITY_URL";
pub const ENV_POLL_INTERVAL_SECS: &str = "FIELDSYNC_POLL_INTERVAL_SECS";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SyncSettings {
    /// Endpoint that accepts submitted reports.
    #[serde(default)]
    pub submit_endpoint: Option<String>,
    /// Bearer token for the submit endpoint. Never logged.
    #[serde(default)]
    pub api_token: Option<String>,
    /// URL probed to decide whether the device is online. Defaults to the
    /// submit endpoint.
    #[serde(default)]
    pub connectivity_url: Option<String>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            submit_endpoint: None,
            api_token: None,
            connectivity_url: None,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            storage_key: default_storage_key(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl SyncSettings {
    /// Load settings, degrading to defaults when the file is missing or
    /// unusable.
    pub fn load_from_path(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Self>(&content) {
                Ok(settings) => settings.normalized(),
                Err(error) => {
                    tracing::warn!(
                        "Failed to parse sync settings at {}: {}",
                        path.display(),
                        error
                    );
                    Self::default()
                }
            },
            Err(error) => {
                tracing::warn!(
                    "Failed to read sync settings at {}: {}",
                    path.display(),
                    error
                );
                Self::default()
            }
        }
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let payload = serde_json::to_string_pretty(&self.clone().normalized())?;
        std::fs::write(path, payload)?;
        Ok(())
    }

    /// Apply `FIELDSYNC_*` environment overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(endpoint) = normalize_text_option(lookup(ENV_SUBMIT_ENDPOINT)) {
            self.submit_endpoint = Some(endpoint);
        }
        if let Some(token) = normalize_text_option(lookup(ENV_API_TOKEN)) {
            self.api_token = Some(token);
        }
        if let Some(url) = normalize_text_option(lookup(ENV_CONNECTIVITY_URL)) {
            self.connectivity_url = Some(url);
        }
        if let Some(raw) = normalize_text_option(lookup(ENV_POLL_INTERVAL_SECS)) {
            match raw.parse::<u64>() {
                Ok(secs) => self.poll_interval_secs = secs,
                Err(error) => {
                    tracing::warn!("Ignoring invalid {ENV_POLL_INTERVAL_SECS}={raw:?}: {error}");
                }
            }
        }
        self
    }

    /// Trim text fields and drop empty ones.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.submit_endpoint = normalize_text_option(self.submit_endpoint);
        self.api_token = normalize_text_option(self.api_token);
        self.connectivity_url = normalize_text_option(self.connectivity_url);
        self.storage_key =
            normalize_text_option(Some(self.storage_key)).unwrap_or_else(default_storage_key);
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("submit_endpoint", &self.submit_endpoint),
            ("connectivity_url", &self.connectivity_url),
        ] {
            if let Some(url) = value {
                if !is_http_url(url) {
                    return Err(Error::Config(format!(
                        "{field} must include http:// or https://"
                    )));
                }
            }
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::Config(
                "poll_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.storage_key.trim().is_empty() {
            return Err(Error::Config("storage_key must not be empty".to_string()));
        }
        Ok(())
    }

    /// URL the connectivity probe should hit, if any is configured.
    pub fn probe_url(&self) -> Option<&str> {
        self.connectivity_url
            .as_deref()
            .or(self.submit_endpoint.as_deref())
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

const fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

const fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_storage_key() -> String {
    DEFAULT_STORAGE_KEY.to_string()
}
