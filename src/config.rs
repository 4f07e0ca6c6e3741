//! Runtime configuration parsing, validation, and environment overrides.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::{AppError, Result};

/// Environment variable that overrides [`RuntimeConfig::server_url`].
pub const SERVER_URL_ENV: &str = "SCRIPT_RUNTIME_SERVER_URL";

/// Default maximum inbound line length: 1 MiB.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1_048_576;

fn default_server_url() -> String {
    "http://localhost:1215".into()
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_max_line_bytes() -> usize {
    DEFAULT_MAX_LINE_BYTES
}

/// Runtime configuration parsed from an optional `runtime.toml`.
///
/// Every field has a default, so an empty file (or no file at all) is valid.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Base URL of the inventory service used until an execute request
    /// supplies its own `serverUrl`.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Execution time bound applied when a request carries no timeout;
    /// 0 means unbounded.
    #[serde(default = "default_timeout_seconds")]
    pub default_timeout_seconds: u64,
    /// Longest accepted request line in bytes.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Per-request HTTP timeout for remote calls; 0 means none.
    #[serde(default)]
    pub remote_timeout_seconds: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            default_timeout_seconds: default_timeout_seconds(),
            max_line_bytes: default_max_line_bytes(),
            remote_timeout_seconds: 0,
        }
    }
}

impl RuntimeConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace `server_url` with [`SERVER_URL_ENV`] when it is set and
    /// non-empty.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the overridden URL is invalid.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(url) = env::var(SERVER_URL_ENV) {
            if !url.trim().is_empty() {
                info!(env = SERVER_URL_ENV, "server url overridden from environment");
                self.server_url = url.trim().to_owned();
            }
        }
        self.validate()
    }

    /// Default execution bound, `None` when unbounded.
    #[must_use]
    pub fn default_timeout(&self) -> Option<Duration> {
        (self.default_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.default_timeout_seconds))
    }

    /// Per-request HTTP timeout, `None` when disabled.
    #[must_use]
    pub fn remote_timeout(&self) -> Option<Duration> {
        (self.remote_timeout_seconds > 0).then(|| Duration::from_secs(self.remote_timeout_seconds))
    }

    /// Check field invariants.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violated invariant.
    pub fn validate(&self) -> Result<()> {
        if !(self.server_url.starts_with("http://") || self.server_url.starts_with("https://")) {
            return Err(AppError::Config(format!(
                "server_url must be an http(s) URL, got '{}'",
                self.server_url
            )));
        }

        if self.max_line_bytes == 0 {
            return Err(AppError::Config(
                "max_line_bytes must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
