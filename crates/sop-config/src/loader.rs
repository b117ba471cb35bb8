//! Configuration loading and persistence with atomic file operations.

use crate::schema::Config;
use sop_common::{Locale, Result, SopError};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Prefix for environment overrides, e.g. `SOP_I18N_API_BASE_URL`.
pub const ENV_PREFIX: &str = "SOP_I18N_";

/// On-disk configuration formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// `.toml`
    Toml,
    /// `.yaml` / `.yml`
    Yaml,
}

impl ConfigFormat {
    /// Picks the format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("yaml" | "yml") => Ok(Self::Yaml),
            other => Err(SopError::config(format!(
                "Unsupported configuration file extension: {other:?}"
            ))),
        }
    }

    /// Parses configuration text in this format.
    pub fn parse(self, text: &str) -> Result<Config> {
        match self {
            Self::Toml => Ok(toml::from_str(text)?),
            Self::Yaml => Ok(serde_yaml::from_str(text)?),
        }
    }

    /// Renders configuration in this format.
    pub fn render(self, config: &Config) -> Result<String> {
        match self {
            Self::Toml => toml::to_string_pretty(config)
                .map_err(|e| SopError::config_with_source("TOML serialization error", e)),
            Self::Yaml => Ok(serde_yaml::to_string(config)?),
        }
    }
}

/// Configuration loader with atomic file operations.
pub struct ConfigLoader {
    path: PathBuf,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path this loader reads from and writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads configuration from file, applies environment overrides, and validates.
    pub async fn load(&self) -> Result<Config> {
        let format = ConfigFormat::from_path(&self.path)?;
        let text = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            SopError::config_with_source(format!("Failed to read {}", self.path.display()), e)
        })?;

        let mut config = format.parse(&text)?;
        apply_env_overrides(&mut config, std::env::vars())?;
        config.validate()?;

        info!("Loaded configuration from {}", self.path.display());
        Ok(config)
    }

    /// Loads the file if it exists, otherwise falls back to defaults plus environment.
    pub async fn load_or_default(&self) -> Result<Config> {
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return self.load().await;
        }

        warn!(
            "Configuration file {} not found, using defaults",
            self.path.display()
        );
        let mut config = Config::default();
        apply_env_overrides(&mut config, std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to file atomically (temp file in the same directory, then rename).
    pub async fn save(&self, config: &Config) -> Result<()> {
        config.validate()?;
        let rendered = ConfigFormat::from_path(&self.path)?.render(config)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
            tmp.write_all(rendered.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| SopError::from(e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| SopError::with_source("Configuration save task failed", e))??;

        debug!("Saved configuration to {}", self.path.display());
        Ok(())
    }
}

/// Applies `SOP_I18N_*` overrides from the given variables.
///
/// Takes the variables as an iterator so callers (and tests) do not have to
/// mutate the process environment.
pub fn apply_env_overrides<I>(config: &mut Config, vars: I) -> Result<()>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (name, value) in vars {
        let Some(key) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };

        match key {
            "API_BASE_URL" => config.api.base_url = value,
            "API_TOKEN" => config.api.auth_token = Some(value),
            "API_TIMEOUT_SECS" => config.api.timeout_secs = parse_number(&name, &value)?,
            "DEFAULT_LANGUAGE" => {
                config.locale.default_language = value.parse::<Locale>()?;
            }
            "REALTIME_ENABLED" => config.realtime.enabled = parse_bool(&name, &value)?,
            "USAGE_ENABLED" => config.usage.enabled = parse_bool(&name, &value)?,
            "CACHE_TTL_SECS" => config.cache.ttl_secs = parse_number(&name, &value)?,
            "LOG_LEVEL" => config.logging.level = value,
            _ => {
                debug!("Ignoring unknown override {}", name);
                continue;
            }
        }
        debug!("Applied environment override {}", name);
    }
    Ok(())
}

fn parse_number(name: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| SopError::validation_field(format!("Expected a number, got '{value}'"), name))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SopError::validation_field(
            format!("Expected a boolean, got '{value}'"),
            name,
        )),
    }
}
