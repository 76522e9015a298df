//! Input row screening
//!
//! Rows with missing text or runaway lengths are rejected before they ever
//! reach injection.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Length limits applied to source and translation text (in characters)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreeningConfig {
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

fn default_min_chars() -> usize {
    1
}

fn default_max_chars() -> usize {
    1_000
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            min_chars: default_min_chars(),
            max_chars: default_max_chars(),
        }
    }
}

impl ScreeningConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_chars == 0 {
            return Err(Error::InvalidConfig("min_chars must be at least 1".to_string()));
        }
        if self.min_chars > self.max_chars {
            return Err(Error::InvalidConfig(format!(
                "min_chars ({}) exceeds max_chars ({})",
                self.min_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

/// Why an input row was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreeningRejection {
    MissingId,
    MissingSource,
    MissingTranslation,
    TooShort,
    TooLong,
}

impl ScreeningRejection {
    /// Stable key used in reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingId => "missing_id",
            Self::MissingSource => "missing_source",
            Self::MissingTranslation => "missing_translation",
            Self::TooShort => "too_short",
            Self::TooLong => "too_long",
        }
    }
}

impl std::fmt::Display for ScreeningRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::MissingId => "missing rid",
            Self::MissingSource => "missing src_en",
            Self::MissingTranslation => "missing mt_de",
            Self::TooShort => "text too short",
            Self::TooLong => "text too long",
        };
        f.write_str(text)
    }
}

/// Check one input row.
pub fn screen(
    rid: &str,
    source: &str,
    translation: &str,
    config: &ScreeningConfig,
) -> std::result::Result<(), ScreeningRejection> {
    if rid.trim().is_empty() {
        return Err(ScreeningRejection::MissingId);
    }
    if source.trim().is_empty() {
        return Err(ScreeningRejection::MissingSource);
    }
    if translation.trim().is_empty() {
        return Err(ScreeningRejection::MissingTranslation);
    }

    for text in [source, translation] {
        let length = text.trim().chars().count();
        if length < config.min_chars {
            return Err(ScreeningRejection::TooShort);
        }
        if length > config.max_chars {
            return Err(ScreeningRejection::TooLong);
        }
    }

    Ok(())
}
