//! Error types for translation loading and live updates

use sop_common::{Locale, SopError};
use thiserror::Error;

/// Errors surfaced by the translation engine.
///
/// Only [`I18nError::Fetch`] ever reaches UI code, and only when no cached
/// bundle can stand in for the failed request.
#[derive(Error, Debug)]
pub enum I18nError {
    /// Retrieving a bundle failed (network, HTTP status, timeout, bad body)
    #[error(
        "Failed to fetch translations for {locale}/{ns}: {message}",
        ns = .namespace.as_deref().unwrap_or("default")
    )]
    Fetch {
        /// Requested locale
        locale: Locale,
        /// Requested namespace
        namespace: Option<String>,
        /// Human readable description
        message: String,
        /// HTTP status, when the route layer answered
        status: Option<u16>,
        /// Underlying cause
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The live update channel could not be opened or broke
    #[error("Live update transport error: {message}")]
    Transport {
        /// Human readable description
        message: String,
        /// Underlying cause
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Usage report was rejected or could not be sent
    #[error("Usage report failed: {message}")]
    Report {
        /// Human readable description
        message: String,
        /// HTTP status, when the route layer answered
        status: Option<u16>,
    },

    /// A payload did not match the expected wire shape
    #[error("Malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// A locale code outside the supported set
    #[error("Unsupported locale: {0}")]
    UnsupportedLocale(String),

    /// Configuration or plumbing error from the shared layer
    #[error(transparent)]
    Common(#[from] SopError),
}

impl I18nError {
    /// Create a fetch error without an underlying cause
    pub fn fetch(locale: Locale, namespace: Option<&str>, message: impl Into<String>) -> Self {
        Self::Fetch {
            locale,
            namespace: namespace.map(str::to_string),
            message: message.into(),
            status: None,
            source: None,
        }
    }

    /// Create a fetch error for a non-success HTTP status
    pub fn fetch_status(locale: Locale, namespace: Option<&str>, status: u16) -> Self {
        Self::Fetch {
            locale,
            namespace: namespace.map(str::to_string),
            message: format!("route returned status {status}"),
            status: Some(status),
            source: None,
        }
    }

    /// Create a fetch error wrapping a lower-level cause
    pub fn fetch_with_source(
        locale: Locale,
        namespace: Option<&str>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Fetch {
            locale,
            namespace: namespace.map(str::to_string),
            message: message.into(),
            status: None,
            source: Some(Box::new(source)),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error wrapping a lower-level cause
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether retrying the same request may succeed (timeouts, 5xx, connection loss)
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Fetch { status, .. } | Self::Report { status, .. } => {
                status.map_or(true, |code| code >= 500 || code == 429)
            }
            Self::Transport { .. } => true,
            _ => false,
        }
    }
}

/// Result type for translation engine operations
pub type I18nResult<T> = Result<T, I18nError>;
