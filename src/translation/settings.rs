//! Per-user speech translation settings.

use serde::{Deserialize, Serialize};

use crate::ws::protocol::TranslationSettingsRequest;

pub const DEFAULT_SOURCE_LANGUAGE: &str = "ru";
pub const DEFAULT_TARGET_LANGUAGE: &str = "en";
pub const DEFAULT_VOICE: &str = "alloy";

/// Language pair and synthesis voice for one user's translation sessions.
/// Stored for the process lifetime, overwritten on each update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationSettings {
    pub source_language: String,
    pub target_language: String,
    pub voice: String,
}

impl Default for TranslationSettings {
    fn default() -> Self {
        Self {
            source_language: DEFAULT_SOURCE_LANGUAGE.to_string(),
            target_language: DEFAULT_TARGET_LANGUAGE.to_string(),
            voice: DEFAULT_VOICE.to_string(),
        }
    }
}

impl TranslationSettings {
    /// Build settings from a client update, filling absent fields with the
    /// defaults rather than leaving holes.
    pub fn merged(req: TranslationSettingsRequest) -> Self {
        let defaults = Self::default();
        Self {
            source_language: req.source_language.unwrap_or(defaults.source_language),
            target_language: req.target_language.unwrap_or(defaults.target_language),
            voice: req.voice.unwrap_or(defaults.voice),
        }
    }
}
