//! Endpoint and tuning configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Default device address (the controller advertises itself as `slider`).
pub const DEFAULT_BASE_URL: &str = "http://slider.local/";
/// Default command endpoint path.
pub const DEFAULT_COMMAND_PATH: &str = "post";
/// Default event stream path.
pub const DEFAULT_EVENTS_PATH: &str = "events";
/// Default command timeout in milliseconds.
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 5000;
/// Default connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;
/// Default event log capacity (entries).
pub const DEFAULT_LOG_CAPACITY: usize = 10_000;

/// Default base reconnect delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
/// Default maximum reconnect delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default backoff multiplier.
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

const ENV_PREFIX: &str = "REMOTE_CONSOLE_";

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Reconnect backoff parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffConfig {
    /// Delay before the first retry in ms (default: 500).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any delay in ms (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor per attempt (default: 2.0).
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Jitter factor 0.0–1.0 (default: 0.0, no jitter).
    #[serde(default)]
    pub jitter_factor: f64,
    /// Give up after this many consecutive failures (default: never).
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_multiplier() -> f64 {
    DEFAULT_MULTIPLIER
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            multiplier: DEFAULT_MULTIPLIER,
            jitter_factor: 0.0,
            max_attempts: None,
        }
    }
}

/// Console configuration.
///
/// Only the endpoint addresses are environment-specific; everything else
/// has a working default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleConfig {
    /// Base address of the device.
    #[serde(default = "default_base_url")]
    pub base_url: Url,
    /// Command endpoint, relative to `base_url`.
    #[serde(default = "default_command_path")]
    pub command_path: String,
    /// Event stream endpoint, relative to `base_url`.
    #[serde(default = "default_events_path")]
    pub events_path: String,
    /// Default dispatch timeout in ms.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// TCP connect timeout in ms.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Event log capacity in entries.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    /// Reconnect backoff.
    #[serde(default)]
    pub reconnect: BackoffConfig,
}

fn default_base_url() -> Url {
    Url::parse(DEFAULT_BASE_URL).unwrap_or_else(|_| unreachable!("default base URL is valid"))
}
fn default_command_path() -> String {
    DEFAULT_COMMAND_PATH.to_string()
}
fn default_events_path() -> String {
    DEFAULT_EVENTS_PATH.to_string()
}
fn default_command_timeout_ms() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_MS
}
fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}
fn default_log_capacity() -> usize {
    DEFAULT_LOG_CAPACITY
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            command_path: default_command_path(),
            events_path: default_events_path(),
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            log_capacity: DEFAULT_LOG_CAPACITY,
            reconnect: BackoffConfig::default(),
        }
    }
}

impl ConsoleConfig {
    /// Create a config for a device base address.
    ///
    /// # Errors
    /// Returns error if the address is not a valid URL.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: parse_base(base_url)?,
            ..Self::default()
        })
    }

    /// Load from `REMOTE_CONSOLE_*` environment variables over defaults.
    ///
    /// # Errors
    /// Returns error if a variable holds an unparsable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup over defaults.
    ///
    /// # Errors
    /// Returns error if a value is unparsable or the result is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key).map(|value| (key, value))
        };

        let mut config = Self::default();
        if let Some((_, value)) = get("BASE_URL") {
            config.base_url = parse_base(&value)?;
        }
        if let Some((_, value)) = get("COMMAND_PATH") {
            config.command_path = value;
        }
        if let Some((_, value)) = get("EVENTS_PATH") {
            config.events_path = value;
        }
        if let Some((key, value)) = get("COMMAND_TIMEOUT_MS") {
            config.command_timeout_ms = parse_number(&key, &value)?;
        }
        if let Some((key, value)) = get("LOG_CAPACITY") {
            config.log_capacity = parse_number(&key, &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    /// Returns the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, value: String| {
            Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            })
        };

        if self.log_capacity == 0 {
            return invalid("logCapacity", "0".into());
        }
        if self.command_timeout_ms == 0 {
            return invalid("commandTimeoutMs", "0".into());
        }
        if self.reconnect.multiplier < 1.0 || !self.reconnect.multiplier.is_finite() {
            return invalid("reconnect.multiplier", self.reconnect.multiplier.to_string());
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter_factor) {
            return invalid(
                "reconnect.jitterFactor",
                self.reconnect.jitter_factor.to_string(),
            );
        }
        Ok(())
    }

    /// Absolute command endpoint.
    ///
    /// # Errors
    /// Returns error if the path cannot be joined onto the base.
    pub fn command_url(&self) -> Result<Url, ConfigError> {
        join(&self.base_url, &self.command_path)
    }

    /// Absolute event stream endpoint.
    ///
    /// # Errors
    /// Returns error if the path cannot be joined onto the base.
    pub fn events_url(&self) -> Result<Url, ConfigError> {
        join(&self.base_url, &self.events_path)
    }

    /// Default dispatch timeout.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// TCP connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn parse_base(raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

// Paths are resolved under the base path, so the base is treated as a
// directory even without a trailing slash.
fn join(base: &Url, path: &str) -> Result<Url, ConfigError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let dir = format!("{}/", base.path());
        base.set_path(&dir);
    }
    base.join(path.trim_start_matches('/'))
        .map_err(|e| ConfigError::InvalidUrl {
            url: format!("{base}{path}"),
            reason: e.to_string(),
        })
}
