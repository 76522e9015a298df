//! Text normalization for duplicate signatures and lexicon lookups
//!
//! The leakage guard compares sentence pairs after normalization so that
//! casing, punctuation and spacing differences never hide a duplicate.

use regex::Regex;
use std::sync::OnceLock;
use unicode_normalization::UnicodeNormalization;

/// Text normalization configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextNormalizer {
    /// Convert to lowercase
    pub lowercase: bool,
    /// Replace punctuation with spaces
    pub strip_punctuation: bool,
    /// Collapse whitespace runs and trim
    pub collapse_whitespace: bool,
    /// Apply Unicode NFKC composition first
    pub unicode_compose: bool,
}

static PUNCTUATION_REGEX: OnceLock<Regex> = OnceLock::new();
static WHITESPACE_REGEX: OnceLock<Regex> = OnceLock::new();

fn punctuation_regex() -> &'static Regex {
    PUNCTUATION_REGEX.get_or_init(|| {
        Regex::new(r"[^\w\s]").expect("Failed to compile punctuation regex")
    })
}

fn whitespace_regex() -> &'static Regex {
    WHITESPACE_REGEX.get_or_init(|| {
        Regex::new(r"\s+").expect("Failed to compile whitespace regex")
    })
}

impl TextNormalizer {
    pub fn new(
        lowercase: bool,
        strip_punctuation: bool,
        collapse_whitespace: bool,
        unicode_compose: bool,
    ) -> Self {
        Self {
            lowercase,
            strip_punctuation,
            collapse_whitespace,
            unicode_compose,
        }
    }

    /// Normalization used for duplicate signatures.
    ///
    /// NFKC keeps umlauts as single code points, so "Brücke" typed with a
    /// combining diaeresis and the precomposed form hash identically.
    pub fn signature() -> Self {
        Self {
            lowercase: true,
            strip_punctuation: true,
            collapse_whitespace: true,
            unicode_compose: true,
        }
    }

    /// Light normalization for comparing an injected candidate against its
    /// reference: punctuation is significant, spacing and case are not.
    pub fn surface() -> Self {
        Self {
            lowercase: true,
            strip_punctuation: false,
            collapse_whitespace: true,
            unicode_compose: true,
        }
    }

    /// Normalize text according to configuration
    ///
    /// Order: composition, lowercase, punctuation, whitespace.
    pub fn normalize(&self, text: &str) -> String {
        let mut result = text.to_string();

        if self.unicode_compose {
            result = result.nfkc().collect::<String>();
        }

        if self.lowercase {
            result = result.to_lowercase();
        }

        if self.strip_punctuation {
            result = punctuation_regex().replace_all(&result, " ").to_string();
        }

        if self.collapse_whitespace {
            result = whitespace_regex().replace_all(&result, " ").trim().to_string();
        }

        result
    }

    /// Normalize a source/translation pair into a single signature text.
    ///
    /// Either side may be empty; the result is then just the other side.
    pub fn normalize_pair(&self, source: &str, translation: &str) -> String {
        let src = self.normalize(source);
        let mt = self.normalize(translation);
        match (src.is_empty(), mt.is_empty()) {
            (true, _) => mt,
            (_, true) => src,
            _ => format!("{} {}", src, mt),
        }
    }
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::signature()
    }
}
