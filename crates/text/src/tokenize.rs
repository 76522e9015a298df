//! Span-preserving tokenization
//!
//! Perturbations edit the reference translation in place, so every token
//! keeps the byte range it came from.

use regex::Regex;
use std::sync::OnceLock;

static TOKEN_REGEX: OnceLock<Regex> = OnceLock::new();

fn token_regex() -> &'static Regex {
    TOKEN_REGEX.get_or_init(|| {
        Regex::new(r"\d+(?:[.,:]\d+)*|[\p{L}\p{M}]+(?:[-'][\p{L}\p{M}]+)*")
            .expect("Failed to compile token regex")
    })
}

/// Token class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    Number,
}

/// A token borrowed from its sentence with its byte range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
    pub kind: TokenKind,
    /// First token of the text or of a sentence after `.`, `!` or `?`
    pub sentence_initial: bool,
}

impl<'a> Token<'a> {
    pub fn is_capitalized(&self) -> bool {
        self.text.chars().next().map(char::is_uppercase).unwrap_or(false)
    }

    pub fn lowercase(&self) -> String {
        self.text.to_lowercase()
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Split text into word and number tokens.
pub fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut sentence_start = true;
    let mut last_end = 0;

    for m in token_regex().find_iter(text) {
        let gap = &text[last_end..m.start()];
        if gap.chars().any(|c| matches!(c, '.' | '!' | '?')) {
            sentence_start = true;
        }

        let kind = if m.as_str().starts_with(|c: char| c.is_ascii_digit()) {
            TokenKind::Number
        } else {
            TokenKind::Word
        };

        tokens.push(Token {
            text: m.as_str(),
            start: m.start(),
            end: m.end(),
            kind,
            sentence_initial: sentence_start,
        });

        sentence_start = false;
        last_end = m.end();
    }

    tokens
}

/// Carry the casing of `original` over to `replacement`.
///
/// All-caps words stay all-caps; a capitalized word capitalizes only the
/// first letter of the replacement.
pub fn match_case(original: &str, replacement: &str) -> String {
    let letters: Vec<char> = original.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() > 1 && letters.iter().all(|c| c.is_uppercase()) {
        return replacement.to_uppercase();
    }
    if original.chars().next().map(char::is_uppercase).unwrap_or(false) {
        return capitalize(replacement);
    }
    replacement.to_string()
}

/// Uppercase the first character.
pub fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Replace `text[start..end]` with `replacement`.
///
/// An empty replacement is an omission: one adjacent space is removed with
/// the span, and a sentence that now starts lowercase is re-capitalized.
pub fn splice(text: &str, start: usize, end: usize, replacement: &str) -> String {
    if !replacement.is_empty() {
        let mut out = String::with_capacity(text.len() + replacement.len());
        out.push_str(&text[..start]);
        out.push_str(replacement);
        out.push_str(&text[end..]);
        return out;
    }

    let (mut cut_start, mut cut_end) = (start, end);
    if text[..start].ends_with(' ') {
        cut_start -= 1;
    } else if text[end..].starts_with(' ') {
        cut_end += 1;
    }

    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..cut_start]);
    out.push_str(&text[cut_end..]);

    if cut_start == 0 {
        out = capitalize(&out);
    }
    out
}
