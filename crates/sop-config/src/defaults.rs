//! Default values for every configuration section.

use crate::schema::*;
use sop_common::{Locale, LoggingConfig};

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            cache: CacheSettings::default(),
            usage: UsageSettings::default(),
            realtime: RealtimeSettings::default(),
            locale: LocaleSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            auth_token: None,
            timeout_secs: 10,
            max_retries: 2,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            max_entries: 64,
        }
    }
}

impl Default for UsageSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 2_000,
            max_batch_size: 200,
        }
    }
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            stream_path: "translations/stream".to_string(),
            min_reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 30_000,
        }
    }
}

impl Default for LocaleSettings {
    fn default() -> Self {
        Self {
            default_language: Locale::En,
            prefetch_namespaces: vec!["common".to_string()],
        }
    }
}
