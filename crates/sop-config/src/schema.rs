//! Configuration schema definitions using serde.

use serde::{Deserialize, Serialize};
use sop_common::{Locale, LoggingConfig, SopError};
use std::time::Duration;

/// Main configuration structure for the translation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Translation API configuration.
    pub api: ApiConfig,
    /// Bundle cache configuration.
    pub cache: CacheSettings,
    /// Usage tracking configuration.
    pub usage: UsageSettings,
    /// Live update channel configuration.
    pub realtime: RealtimeSettings,
    /// Locale configuration.
    pub locale: LocaleSettings,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Translation API configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the app's API routes (e.g. `https://sop.example.com/api`).
    pub base_url: String,
    /// Bearer token forwarded to the route layer.
    pub auth_token: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Retries for timeouts and 5xx responses.
    pub max_retries: usize,
}

/// Bundle cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Seconds a bundle counts as fresh.
    pub ttl_secs: u64,
    /// Maximum number of (locale, namespace) bundles kept in memory.
    pub max_entries: usize,
}

/// Usage tracking configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageSettings {
    /// Whether lookups are reported at all.
    pub enabled: bool,
    /// Debounce window in milliseconds.
    pub debounce_ms: u64,
    /// Most events carried by one report; extra events in a window are dropped.
    pub max_batch_size: usize,
}

/// Live update channel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeSettings {
    /// Whether facades may subscribe to live updates.
    pub enabled: bool,
    /// Path of the event stream, relative to `api.base_url`.
    pub stream_path: String,
    /// Lower bound between reconnect attempts in milliseconds.
    pub min_reconnect_delay_ms: u64,
    /// Upper bound between reconnect attempts in milliseconds.
    pub max_reconnect_delay_ms: u64,
}

/// Locale configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocaleSettings {
    /// Language used before the app reports one.
    pub default_language: Locale,
    /// Namespaces to warm on startup.
    pub prefetch_namespaces: Vec<String>,
}

impl ApiConfig {
    /// Request timeout as a [`Duration`].
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl CacheSettings {
    /// Freshness window as a [`Duration`].
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl UsageSettings {
    /// Debounce window as a [`Duration`].
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl RealtimeSettings {
    /// Minimum reconnect delay as a [`Duration`].
    pub const fn min_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.min_reconnect_delay_ms)
    }

    /// Maximum reconnect delay as a [`Duration`].
    pub const fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }
}

impl Config {
    /// Validates the configuration, returning the first problem found.
    pub fn validate(&self) -> Result<(), SopError> {
        match crate::validator::ConfigValidator::collect_issues(self).into_iter().next() {
            Some(issue) => Err(issue),
            None => Ok(()),
        }
    }
}
