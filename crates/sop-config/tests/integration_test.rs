//! Integration tests for sop-config crate.

use sop_common::test_utils::create_temp_dir;
use sop_common::Locale;
use sop_config::{Config, ConfigCache, ConfigLoader};

#[test]
fn test_default_config_validation() {
    let mut config = Config::default();
    assert!(config.validate().is_ok());

    config.cache.max_entries = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_config_cache() {
    let config = Config::default();
    let cache = ConfigCache::new(config.clone());

    let cached_config = cache.get();
    assert_eq!(cached_config.locale.default_language, config.locale.default_language);

    let mut new_config = config;
    new_config.locale.default_language = Locale::Th;
    cache.update(new_config);
    assert_eq!(cache.get().locale.default_language, Locale::Th);
}

#[test]
fn test_config_cache_rejects_invalid_update() {
    let cache = ConfigCache::default();
    let mut bad = Config::default();
    bad.api.timeout_secs = 0;

    assert!(cache.try_update(bad).is_err());
    assert_eq!(cache.get().api.timeout_secs, Config::default().api.timeout_secs);
}

#[tokio::test]
async fn test_load_partial_toml_fills_defaults() {
    let dir = create_temp_dir();
    let path = dir.path().join("i18n.toml");
    std::fs::write(
        &path,
        r#"
[api]
base_url = "https://sop.example.com/api"

[cache]
ttl_secs = 60

[locale]
default_language = "es"
"#,
    )
    .unwrap();

    let config = ConfigLoader::new(&path).load().await.unwrap();
    assert_eq!(config.api.base_url, "https://sop.example.com/api");
    assert_eq!(config.api.timeout_secs, 10);
    assert_eq!(config.cache.ttl_secs, 60);
    assert_eq!(config.locale.default_language, Locale::Es);
    assert_eq!(config.locale.prefetch_namespaces, vec!["common".to_string()]);
}

#[tokio::test]
async fn test_save_then_load_yaml() {
    let dir = create_temp_dir();
    let loader = ConfigLoader::new(dir.path().join("i18n.yaml"));

    let mut config = Config::default();
    config.realtime.enabled = false;
    config.usage.debounce_ms = 500;
    loader.save(&config).await.unwrap();

    let loaded = loader.load().await.unwrap();
    assert!(!loaded.realtime.enabled);
    assert_eq!(loaded.usage.debounce_ms, 500);
}

#[tokio::test]
async fn test_missing_file_uses_defaults() {
    let dir = create_temp_dir();
    let loader = ConfigLoader::new(dir.path().join("absent.toml"));
    let config = loader.load_or_default().await.unwrap();
    assert_eq!(config.cache, Config::default().cache);
}

#[tokio::test]
async fn test_invalid_file_is_rejected() {
    let dir = create_temp_dir();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[api\nbase_url = ").unwrap();

    assert!(ConfigLoader::new(&path).load().await.is_err());
}
