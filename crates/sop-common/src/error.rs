//! Error types and utilities shared across the workspace

use thiserror::Error;

/// Result type alias for workspace operations
pub type Result<T> = std::result::Result<T, SopError>;

/// Main error type for configuration, I/O and network plumbing
#[derive(Error, Debug)]
pub enum SopError {
    /// Configuration related errors
    #[error("Configuration error: {message}")]
    Config {
        /// Human readable description
        message: String,
        /// Underlying cause
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O related errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network related errors (HTTP client setup)
    #[error("Network error: {message}")]
    Network {
        /// Human readable description
        message: String,
        /// Underlying cause
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Validation errors for configuration values or input data
    #[error("Validation error: {message}")]
    Validation {
        /// Human readable description
        message: String,
        /// Offending field, if known
        field: Option<String>,
    },

    /// Generic error with custom message
    #[error("{message}")]
    Generic {
        /// Human readable description
        message: String,
        /// Underlying cause
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl SopError {
    /// Create a new generic error with a custom message and source
    pub fn with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Generic {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a new configuration error with source
    pub fn config_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a new network error with source
    pub fn network_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Network {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a new validation error with field name
    pub fn validation_field(msg: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }
}

/// Convert from toml::de::Error to SopError
impl From<toml::de::Error> for SopError {
    fn from(err: toml::de::Error) -> Self {
        Self::config_with_source("TOML parsing error", err)
    }
}

/// Convert from serde_yaml::Error to SopError
impl From<serde_yaml::Error> for SopError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::config_with_source("YAML parsing error", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{error::Error, io};

    #[test]
    fn test_error_creation() {
        let config_error = SopError::config("config issue");
        assert_eq!(config_error.to_string(), "Configuration error: config issue");

        let network_error = SopError::network_with_source(
            "Failed to create HTTP client",
            io::Error::new(io::ErrorKind::Other, "tls backend"),
        );
        assert!(network_error.to_string().contains("Network error"));
        assert!(network_error.source().is_some());

        let validation_error = SopError::validation_field("must be positive", "cache.ttl_secs");
        assert!(validation_error.to_string().contains("Validation error"));
        assert!(matches!(
            validation_error,
            SopError::Validation { field: Some(ref field), .. } if field == "cache.ttl_secs"
        ));
    }

    #[test]
    fn test_error_with_source() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let wrapped_error = SopError::with_source("Failed to read file", io_error);

        assert!(wrapped_error.to_string().contains("Failed to read file"));
        assert!(wrapped_error.source().is_some());

        let config_source_error = SopError::config_with_source(
            "Config loading failed",
            io::Error::new(io::ErrorKind::PermissionDenied, "Access denied"),
        );
        assert!(config_source_error.source().is_some());
    }

    #[test]
    fn test_parse_error_conversions() {
        let toml_error = toml::from_str::<toml::Value>("key = = 1").unwrap_err();
        let converted: SopError = toml_error.into();
        assert!(converted.to_string().contains("TOML parsing error"));

        let json_error = serde_json::from_str::<serde_json::Value>("{nope}").unwrap_err();
        let converted: SopError = json_error.into();
        assert!(converted.to_string().contains("Serialization error"));
    }

    #[test]
    fn test_error_chain_preservation() {
        let root_error = io::Error::new(io::ErrorKind::NotFound, "Root cause");
        let middle_error = SopError::config_with_source("Middle layer", root_error);
        let top_error = SopError::with_source("Top layer", middle_error);

        let mut current_error: &dyn std::error::Error = &top_error;
        let mut depth = 0;
        while let Some(source) = current_error.source() {
            current_error = source;
            depth += 1;
        }
        assert_eq!(depth, 2);
    }
}
