//! Common type definitions shared by the config and translation crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use unic_langid::LanguageIdentifier;

use crate::error::SopError;

/// Languages the tablet app ships translations for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    /// English
    #[serde(alias = "en-US", alias = "en-GB")]
    En,
    /// French
    #[serde(alias = "fr-FR", alias = "fr-CA")]
    Fr,
    /// Spanish
    #[serde(alias = "es-ES", alias = "es-MX")]
    Es,
    /// Thai
    #[serde(alias = "th-TH")]
    Th,
}

impl Default for Locale {
    fn default() -> Self {
        Self::En
    }
}

impl Locale {
    /// Short language code used in cache keys and on the wire
    pub const fn code(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Fr => "fr",
            Self::Es => "es",
            Self::Th => "th",
        }
    }

    /// Native display name for language pickers
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::En => "English",
            Self::Fr => "Français",
            Self::Es => "Español",
            Self::Th => "ไทย",
        }
    }

    /// All supported locales
    pub const fn all() -> [Self; 4] {
        [Self::En, Self::Fr, Self::Es, Self::Th]
    }

    /// Parse a BCP 47 tag (`fr`, `fr-CA`, `en_US`) by its primary language subtag
    pub fn from_code(code: &str) -> Option<Self> {
        let normalized = code.trim().replace('_', "-");
        let langid: LanguageIdentifier = normalized.parse().ok()?;
        match langid.language.as_str() {
            "en" => Some(Self::En),
            "fr" => Some(Self::Fr),
            "es" => Some(Self::Es),
            "th" => Some(Self::Th),
            _ => None,
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Locale {
    type Err = SopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s)
            .ok_or_else(|| SopError::validation_field(format!("Unsupported locale: {s}"), "locale"))
    }
}
