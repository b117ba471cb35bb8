//! Test utilities and shared fixtures.
//!
//! Available to other workspace crates through the `testing` feature.

use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Once;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize test logging once per test run.
static INIT: Once = Once::new();

/// Initialize logging for tests with a sensible default configuration.
/// This function is safe to call multiple times and will only initialize once.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        let _ = fmt().with_test_writer().with_env_filter(filter).try_init();
    });
}

/// Test fixture for creating a fixed timestamp.
pub fn mock_timestamp(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
        .unwrap()
}

/// Create a temporary directory for tests that automatically cleans up.
#[cfg(feature = "tempfile")]
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temporary directory")
}

/// Translation fixtures modelled on the kitchen SOP screens.
pub mod translation_fixtures {
    use super::HashMap;

    /// A small `common` namespace bundle in English.
    pub fn common_en() -> HashMap<String, String> {
        [
            ("common.welcome", "Welcome, {name}!"),
            ("common.save", "Save"),
            (
                "common.items",
                "{count, plural, =0 {No items} =1 {1 item} other {# items}}",
            ),
            (
                "common.went",
                "{gender, select, male {He} female {She} other {They}} went to the store",
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    /// The same `common` keys in French.
    pub fn common_fr() -> HashMap<String, String> {
        [
            ("common.welcome", "Bienvenue, {name} !"),
            ("common.save", "Enregistrer"),
            (
                "common.items",
                "{count, plural, =0 {Aucun article} =1 {1 article} other {# articles}}",
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    /// Keys for the SOP document screens.
    pub fn sop_en() -> HashMap<String, String> {
        [
            ("sop.title", "Standard Operating Procedures"),
            ("sop.steps", "{count, plural, =1 {One step} other {# steps}}"),
            ("sop.station", "Station: {station}"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }
}

/// Property-based testing strategies.
#[cfg(feature = "proptest")]
pub mod property_testing {
    use proptest::prelude::*;

    /// Strategy for translation key segments such as `common.welcome`.
    pub fn translation_key_strategy() -> impl Strategy<Value = String> {
        r"[a-z]{2,8}(\.[a-z_]{2,12}){1,3}".prop_map(|s| s)
    }

    /// Strategy for variable names accepted by the ICU formatter.
    pub fn variable_name_strategy() -> impl Strategy<Value = String> {
        r"[a-zA-Z_][a-zA-Z0-9_]{0,11}".prop_map(|s| s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_init_logging_multiple_calls() {
        init_test_logging();
        init_test_logging();
    }

    #[test]
    fn test_mock_timestamp() {
        let timestamp = mock_timestamp(2024, 1, 1, 12, 0, 0);
        assert_eq!(timestamp.year(), 2024);
        assert_eq!(timestamp.month(), 1);
        assert_eq!(timestamp.hour(), 12);
    }

    #[test]
    fn test_fixtures_share_keys_across_locales() {
        let en = translation_fixtures::common_en();
        let fr = translation_fixtures::common_fr();
        assert!(fr.keys().all(|key| en.contains_key(key)));
    }
}
