//! Console configuration with environment overrides.

use std::time::Duration;

use crate::runtime::handle::RuntimeConfig;

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A numeric variable did not parse.
    #[error("invalid value for {name}: {message} (got '{value}')")]
    InvalidNumber {
        /// Variable name.
        name: String,
        /// Parser message.
        message: String,
        /// Raw value.
        value: String,
    },
    /// The API base URL is empty or lacks an http(s) scheme.
    #[error("invalid API base URL '{0}'")]
    InvalidBaseUrl(String),
    /// A duration that must be positive was zero.
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// Settings for one console session.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Root of the admin REST API.
    pub api_base_url: String,
    /// Per-request deadline enforced by the HTTP client.
    pub request_timeout_ms: u64,
    /// How long a transient notice stays visible.
    pub notice_ttl_ms: u64,
    /// Cache runtime tuning.
    pub runtime: RuntimeConfig,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            request_timeout_ms: 10_000,
            notice_ttl_ms: 6_000,
            runtime: RuntimeConfig::default(),
        }
    }
}

impl ConsoleConfig {
    /// Reads `{prefix}_API_BASE_URL`, `{prefix}_REQUEST_TIMEOUT_MS`,
    /// `{prefix}_NOTICE_TTL_MS` and `{prefix}_SNAPSHOT_EVERY_OPS`; unset
    /// variables keep their defaults.
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(prefix, |name| std::env::var(name).ok())
    }

    /// Like [`ConsoleConfig::from_env`] with a custom variable source.
    pub fn from_lookup(
        prefix: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |suffix: &str| {
            let name = format!("{prefix}_{suffix}");
            let value = lookup(&name);
            (name, value)
        };

        let api_base_url = var("API_BASE_URL").1.unwrap_or(defaults.api_base_url);
        let (name, value) = var("REQUEST_TIMEOUT_MS");
        let request_timeout_ms = parse_u64(&name, value, defaults.request_timeout_ms)?;
        let (name, value) = var("NOTICE_TTL_MS");
        let notice_ttl_ms = parse_u64(&name, value, defaults.notice_ttl_ms)?;
        let (name, value) = var("SNAPSHOT_EVERY_OPS");
        let snapshot_every_ops =
            parse_u64(&name, value, defaults.runtime.snapshot_every_ops as u64)? as usize;

        let config = Self {
            api_base_url,
            request_timeout_ms,
            notice_ttl_ms,
            runtime: RuntimeConfig {
                snapshot_every_ops,
                ..defaults.runtime
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects non-HTTP base URLs and zero durations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.api_base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl(self.api_base_url.clone()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration("request_timeout_ms"));
        }
        if self.notice_ttl_ms == 0 {
            return Err(ConfigError::ZeroDuration("notice_ttl_ms"));
        }
        Ok(())
    }

    /// Per-request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Notice time-to-live as a [`Duration`].
    pub fn notice_ttl(&self) -> Duration {
        Duration::from_millis(self.notice_ttl_ms)
    }
}

fn parse_u64(name: &str, value: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: std::num::ParseIntError| ConfigError::InvalidNumber {
                name: name.to_string(),
                message: e.to_string(),
                value,
            }),
    }
}
