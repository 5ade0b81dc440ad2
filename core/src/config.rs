//! Publisher configuration and its validation.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "SALUS_API_KEY";
/// Environment variable holding the collection host.
pub const HOST_ENV: &str = "SALUS_HOST";
/// Environment variable holding the per-request timeout in milliseconds.
pub const REQUEST_TIMEOUT_ENV: &str = "SALUS_REQUEST_TIMEOUT_MS";

/// Path appended to the host for batch publishing.
pub const MULTI_PATH: &str = "/multi";

/// Result of validating (or applying) a [`PublisherConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfigurationState {
    /// The configuration could not be applied
    Invalid,
    /// The API key is blank
    InvalidApiKey,
    /// The host is not a bare http(s) origin
    InvalidHost,
    /// Configuration accepted
    Success,
}

impl ConfigurationState {
    /// Whether this is [`ConfigurationState::Success`].
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Errors reading configuration from the environment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is unset
    #[error("Missing environment variable {0}")]
    Missing(&'static str),

    /// A variable is set but unparsable
    #[error("Invalid value for {name}: {value}")]
    InvalidValue {
        /// Variable name
        name: &'static str,
        /// Offending value
        value: String,
    },
}

/// Connection settings for the collection endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// API key sent in the `api-key` header
    pub api_key: String,
    /// Origin of the collection endpoint, e.g. `https://ingest.example.com`
    pub host: String,
    /// Optional per-request timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
}

impl PublisherConfig {
    /// Create a configuration without a request timeout.
    pub fn new(api_key: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            host: host.into(),
            request_timeout_ms: None,
        }
    }

    /// Read configuration from `SALUS_API_KEY`, `SALUS_HOST` and `SALUS_REQUEST_TIMEOUT_MS`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required variable is missing or the timeout is not a number.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required variable is missing or the timeout is not a number.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup(API_KEY_ENV).ok_or(ConfigError::Missing(API_KEY_ENV))?;
        let host = lookup(HOST_ENV).ok_or(ConfigError::Missing(HOST_ENV))?;
        let request_timeout_ms = lookup(REQUEST_TIMEOUT_ENV)
            .map(|value| {
                value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                    name: REQUEST_TIMEOUT_ENV,
                    value,
                })
            })
            .transpose()?;

        Ok(Self {
            api_key,
            host,
            request_timeout_ms,
        })
    }

    /// Set the API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    /// Set the host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub const fn with_request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = Some(timeout_ms);
        self
    }

    /// Check the API key and host.
    ///
    /// The key must be non-blank. The host must be an absolute `http`/`https` URL with no path
    /// beyond `/`, no query and no fragment.
    #[must_use]
    pub fn validate(&self) -> ConfigurationState {
        if self.api_key.trim().is_empty() {
            return ConfigurationState::InvalidApiKey;
        }
        if !valid_host(&self.host) {
            return ConfigurationState::InvalidHost;
        }
        ConfigurationState::Success
    }

    /// Batch endpoint: the host without a trailing `/`, plus `/multi`.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}{MULTI_PATH}", self.host.trim_end_matches('/'))
    }
}

fn valid_host(host: &str) -> bool {
    let Ok(url) = Url::parse(host) else {
        return false;
    };
    matches!(url.scheme(), "http" | "https")
        && url.has_host()
        && url.path() == "/"
        && url.query().is_none()
        && url.fragment().is_none()
}
