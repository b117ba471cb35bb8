//! Runtime validation of loaded configuration.

use crate::schema::Config;
use sop_common::{Result, SopError};
use url::Url;

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a configuration.
    pub fn validate(config: &Config) -> Result<()> {
        config.validate()
    }

    /// Collects every problem instead of stopping at the first one.
    pub fn collect_issues(config: &Config) -> Vec<SopError> {
        let mut issues = Vec::new();

        match Url::parse(&config.api.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => issues.push(SopError::validation_field(
                format!("Unsupported URL scheme '{}'", url.scheme()),
                "api.base_url",
            )),
            Err(e) => issues.push(SopError::validation_field(
                format!("Invalid API base URL: {e}"),
                "api.base_url",
            )),
        }

        if config.api.timeout_secs == 0 {
            issues.push(SopError::validation_field(
                "Request timeout must be greater than 0",
                "api.timeout_secs",
            ));
        }

        if config.cache.max_entries == 0 {
            issues.push(SopError::validation_field(
                "Cache must hold at least one bundle",
                "cache.max_entries",
            ));
        }

        if config.usage.enabled && config.usage.max_batch_size == 0 {
            issues.push(SopError::validation_field(
                "Usage batch size must be greater than 0",
                "usage.max_batch_size",
            ));
        }

        let realtime = &config.realtime;
        if realtime.min_reconnect_delay_ms == 0 {
            issues.push(SopError::validation_field(
                "Reconnect delay must be greater than 0",
                "realtime.min_reconnect_delay_ms",
            ));
        }
        if realtime.min_reconnect_delay_ms > realtime.max_reconnect_delay_ms {
            issues.push(SopError::validation_field(
                "Minimum reconnect delay exceeds maximum",
                "realtime.max_reconnect_delay_ms",
            ));
        }
        if realtime.enabled && realtime.stream_path.trim().is_empty() {
            issues.push(SopError::validation_field(
                "Stream path cannot be empty",
                "realtime.stream_path",
            ));
        }

        if config
            .locale
            .prefetch_namespaces
            .iter()
            .any(|ns| ns.trim().is_empty())
        {
            issues.push(SopError::validation_field(
                "Prefetch namespaces cannot be blank",
                "locale.prefetch_namespaces",
            ));
        }

        issues
    }
}
