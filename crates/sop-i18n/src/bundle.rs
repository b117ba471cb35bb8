//! Translation bundles and their wire representation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sop_common::Locale;
use std::collections::HashMap;
use std::fmt;

/// Cache-key segment used when a bundle has no namespace.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Builds the cache key for a (locale, namespace) pair, e.g. `fr-common`.
pub fn cache_key(locale: Locale, namespace: Option<&str>) -> String {
    format!("{}-{}", locale.code(), namespace.unwrap_or(DEFAULT_NAMESPACE))
}

/// Identifies one bundle to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BundleRequest {
    /// Requested locale
    pub locale: Locale,
    /// Requested namespace; `None` means every key of the locale
    pub namespace: Option<String>,
}

impl BundleRequest {
    /// Create a request for the given locale and namespace
    pub fn new(locale: Locale, namespace: Option<&str>) -> Self {
        Self {
            locale,
            namespace: namespace.map(str::to_string),
        }
    }

    /// Cache key this request populates
    pub fn cache_key(&self) -> String {
        cache_key(self.locale, self.namespace.as_deref())
    }
}

impl fmt::Display for BundleRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}

/// Version and timing information attached to a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMetadata {
    /// Content version reported by the route layer
    #[serde(deserialize_with = "version_from_any")]
    pub version: String,
    /// When the newest translation in the bundle was edited
    pub last_updated: DateTime<Utc>,
    /// When the route layer assembled the bundle
    pub cached_at: DateTime<Utc>,
    /// Number of keys in the bundle
    pub total_keys: usize,
}

impl BundleMetadata {
    /// Metadata for a bundle assembled locally, stamped with the current time
    pub fn local(total_keys: usize) -> Self {
        let now = Utc::now();
        Self {
            version: "local".to_string(),
            last_updated: now,
            cached_at: now,
            total_keys,
        }
    }
}

/// The route layer sends the version as either a string or a number.
fn version_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Version {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Version::deserialize(deserializer)? {
        Version::Text(text) => text,
        Version::Number(number) => number.to_string(),
    })
}

/// Body of `GET translations?locale=..&namespace=..`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundlePayload {
    /// Locale the route layer answered for
    pub locale: Locale,
    /// Key to raw ICU template
    pub translations: HashMap<String, String>,
    /// Absent on older route versions
    #[serde(default)]
    pub metadata: Option<BundleMetadata>,
}

/// All translations for one (locale, namespace) pair.
///
/// Bundles are immutable once built; the cache swaps whole bundles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationBundle {
    /// Locale of every template in the bundle
    pub locale: Locale,
    /// Namespace, or `None` for the whole locale
    pub namespace: Option<String>,
    /// Key to raw ICU template
    pub translations: HashMap<String, String>,
    /// Version and timing information
    pub metadata: BundleMetadata,
}

impl TranslationBundle {
    /// Assemble a bundle
    pub fn new(
        locale: Locale,
        namespace: Option<&str>,
        translations: HashMap<String, String>,
        metadata: BundleMetadata,
    ) -> Self {
        Self {
            locale,
            namespace: namespace.map(str::to_string),
            translations,
            metadata,
        }
    }

    /// Build a bundle from a fetch response for `request`.
    ///
    /// Missing metadata is synthesized from the current time.
    pub fn from_payload(request: &BundleRequest, payload: BundlePayload) -> Self {
        let total_keys = payload.translations.len();
        Self {
            locale: request.locale,
            namespace: request.namespace.clone(),
            metadata: payload
                .metadata
                .unwrap_or_else(|| BundleMetadata::local(total_keys)),
            translations: payload.translations,
        }
    }

    /// Cache key for this bundle
    pub fn cache_key(&self) -> String {
        cache_key(self.locale, self.namespace.as_deref())
    }

    /// Raw template for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.translations.get(key).map(String::as_str)
    }

    /// Whether `key` is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.translations.contains_key(key)
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.translations.len()
    }

    /// Whether the bundle holds no keys
    pub fn is_empty(&self) -> bool {
        self.translations.is_empty()
    }

    /// Whether any of `keys` is part of this bundle
    pub fn intersects<S: AsRef<str>>(&self, keys: &[S]) -> bool {
        keys.iter().any(|key| self.translations.contains_key(key.as_ref()))
    }

    /// Rough heap footprint in bytes, used for cache statistics
    pub fn approx_bytes(&self) -> usize {
        let strings: usize = self
            .translations
            .iter()
            .map(|(key, template)| key.len() + template.len())
            .sum();
        let per_entry = 2 * std::mem::size_of::<String>();
        strings
            + self.translations.len() * per_entry
            + self.namespace.as_ref().map_or(0, String::len)
            + self.metadata.version.len()
            + std::mem::size_of::<Self>()
    }
}
