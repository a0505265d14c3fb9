//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::http::{DEFAULT_API_ROOT_URL, HttpSettings};
use crate::types::Zone;
use crate::waiter::WaitSettings;

/// Connection and polling settings derived from environment variables,
/// configuration files and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "CLOUDKIT",
    discovery(
        app_name = "cloudkit",
        env_var = "CLOUDKIT_CONFIG_PATH",
        config_file_name = "cloudkit.toml",
        dotfile_name = ".cloudkit.toml",
        project_file_name = "cloudkit.toml"
    )
)]
pub struct ClientConfig {
    /// API access token. Required unless `fake_mode` is set.
    #[ortho_config(default = String::new())]
    pub access_token: String,
    /// API access token secret. Required unless `fake_mode` is set.
    #[ortho_config(default = String::new())]
    pub access_token_secret: String,
    /// Zone targeted by commands. Defaults to `is1a`.
    #[ortho_config(default = "is1a".to_owned())]
    pub zone: String,
    /// API root without the zone segment.
    #[ortho_config(default = DEFAULT_API_ROOT_URL.to_owned())]
    pub api_root_url: String,
    /// Log every HTTP request and response. Set through `CLOUDKIT_TRACE` or
    /// the config file.
    #[serde(default)]
    #[ortho_config(default = false, skip_cli)]
    pub trace: bool,
    /// Run against the in-memory provider instead of the API. Set through
    /// `CLOUDKIT_FAKE_MODE` or the config file.
    #[serde(default)]
    #[ortho_config(default = false, skip_cli)]
    pub fake_mode: bool,
    /// Seconds between state polls.
    #[ortho_config(default = 5)]
    pub poll_interval_secs: u64,
    /// Upper bound on a single wait, in seconds.
    #[ortho_config(default = 1200)]
    pub wait_timeout_secs: u64,
    /// Consecutive not-found reads tolerated while a resource propagates.
    #[ortho_config(default = 3)]
    pub not_found_retry: u32,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl ClientConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to cloudkit.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("cloudkit")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Credentials are only checked when the
    /// real API is targeted.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::InvalidValue`] when a polling value is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.zone,
            &FieldMetadata::new("zone", "CLOUDKIT_ZONE", "zone"),
        )?;
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(String::from(
                "poll_interval_secs must be at least 1 (CLOUDKIT_POLL_INTERVAL_SECS)",
            )));
        }
        if self.wait_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(String::from(
                "wait_timeout_secs must be at least 1 (CLOUDKIT_WAIT_TIMEOUT_SECS)",
            )));
        }
        if self.fake_mode {
            return Ok(());
        }
        Self::require_field(
            &self.access_token,
            &FieldMetadata::new("API access token", "CLOUDKIT_ACCESS_TOKEN", "access_token"),
        )?;
        Self::require_field(
            &self.access_token_secret,
            &FieldMetadata::new(
                "API access token secret",
                "CLOUDKIT_ACCESS_TOKEN_SECRET",
                "access_token_secret",
            ),
        )?;
        Self::require_field(
            &self.api_root_url,
            &FieldMetadata::new("API root URL", "CLOUDKIT_API_ROOT_URL", "api_root_url"),
        )
    }

    /// Zone targeted by commands.
    #[must_use]
    pub fn zone(&self) -> Zone {
        Zone::new(self.zone.trim())
    }

    /// Polling settings for builder and CLI waits.
    #[must_use]
    pub const fn wait_settings(&self) -> WaitSettings {
        WaitSettings {
            timeout: Duration::from_secs(self.wait_timeout_secs),
            polling_interval: Duration::from_secs(self.poll_interval_secs),
            not_found_retry: self.not_found_retry,
        }
    }

    /// Transport settings for the HTTP client.
    #[must_use]
    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            root_url: self.api_root_url.clone(),
            access_token: self.access_token.clone(),
            access_token_secret: self.access_token_secret.clone(),
            trace: self.trace,
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// A field is present but out of range.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
