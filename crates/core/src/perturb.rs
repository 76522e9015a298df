//! German perturbation kinds
//!
//! Each kind enumerates every edit it could make to a reference translation,
//! tagged with a confidence tier. The injection engine keeps the top tier and
//! picks one edit with the row's deterministic RNG.

use std::collections::HashSet;

use synced_text::lexicon;
use synced_text::tokenize::{match_case, tokenize, Token, TokenKind};

use crate::hash::DetRng;
use crate::row::FailureReason;
use crate::schema::PerturbationKind;

const NEGATION_CONFIDENCE: f64 = 0.95;
const POLARITY_CONFIDENCE: f64 = 0.8;
const NUMBER_CONFIDENCE: f64 = 0.9;
const NUMBER_WORD_CONFIDENCE: f64 = 0.85;
const ALIGNED_ENTITY_CONFIDENCE: f64 = 0.85;
const GAZETTEER_ENTITY_CONFIDENCE: f64 = 0.75;
const CLAUSE_OMISSION_CONFIDENCE: f64 = 0.8;
const TOKEN_OMISSION_CONFIDENCE: f64 = 0.5;
const SAFETY_SUBSTITUTION_CONFIDENCE: f64 = 0.85;
const SAFETY_OMISSION_CONFIDENCE: f64 = 0.75;
const PEJORATIVE_CONFIDENCE: f64 = 0.7;
const INTERJECTION_CONFIDENCE: f64 = 0.5;
const CONFUSION_CONFIDENCE: f64 = 0.8;

/// Minimum length of a content token eligible for omission
const MIN_CONTENT_CHARS: usize = 5;

/// A single edit of the reference: `reference[start..end]` becomes
/// `replacement`. Insertions have `start == end`; omissions an empty
/// replacement.
#[derive(Debug, Clone, PartialEq)]
pub struct Edit {
    pub start: usize,
    pub end: usize,
    pub replacement: String,
    pub confidence: f64,
}

impl Edit {
    fn replace(token: &Token<'_>, replacement: &str, confidence: f64) -> Self {
        Self {
            start: token.start,
            end: token.end,
            replacement: match_case(token.text, replacement),
            confidence,
        }
    }

    fn remove(start: usize, end: usize, confidence: f64) -> Self {
        Self {
            start,
            end,
            replacement: String::new(),
            confidence,
        }
    }

    fn insert(at: usize, text: String, confidence: f64) -> Self {
        Self {
            start: at,
            end: at,
            replacement: text,
            confidence,
        }
    }

    pub fn is_omission(&self) -> bool {
        self.replacement.is_empty()
    }

    pub fn is_insertion(&self) -> bool {
        self.start == self.end
    }
}

/// Enumerate candidate edits for `kind`.
///
/// `Identity` yields no edits. A structural failure reason is returned when
/// the sentence offers nothing for the kind to work on.
pub fn candidate_edits(
    kind: PerturbationKind,
    source: &str,
    reference: &str,
    rng: &mut DetRng,
) -> Result<Vec<Edit>, FailureReason> {
    if reference.trim().is_empty() {
        return Err(FailureReason::EmptyReference);
    }

    match kind {
        PerturbationKind::Identity => Ok(Vec::new()),
        PerturbationKind::NegationFlip => negation_edits(reference),
        PerturbationKind::NumericSubstitution => numeric_edits(reference, rng),
        PerturbationKind::EntitySwap => entity_edits(source, reference, rng),
        PerturbationKind::Omission => omission_edits(reference),
        PerturbationKind::SafetyOmission => safety_edits(reference),
        PerturbationKind::ToxicInsertion => toxic_edits(reference, rng),
        PerturbationKind::Mistranslation => confusion_edits(reference),
    }
}

/// Keep the highest-confidence tier and pick one edit from it.
pub fn select_edit(edits: Vec<Edit>, rng: &mut DetRng) -> Option<Edit> {
    let top = edits
        .iter()
        .map(|e| e.confidence)
        .fold(f64::NEG_INFINITY, f64::max);
    let mut tier: Vec<Edit> = edits
        .into_iter()
        .filter(|e| (e.confidence - top).abs() < 1e-9)
        .collect();
    if tier.is_empty() {
        return None;
    }
    let idx = rng.below(tier.len());
    Some(tier.swap_remove(idx))
}

fn words<'a>(tokens: &'a [Token<'a>]) -> impl Iterator<Item = &'a Token<'a>> {
    tokens.iter().filter(|t| t.kind == TokenKind::Word)
}

fn non_empty(edits: Vec<Edit>, reason: FailureReason) -> Result<Vec<Edit>, FailureReason> {
    if edits.is_empty() {
        Err(reason)
    } else {
        Ok(edits)
    }
}

fn negation_edits(reference: &str) -> Result<Vec<Edit>, FailureReason> {
    let tokens = tokenize(reference);

    let negations: Vec<Edit> = words(&tokens)
        .filter_map(|t| {
            lexicon::negation(t.text).map(|inverse| match inverse {
                Some(replacement) => Edit::replace(t, replacement, NEGATION_CONFIDENCE),
                None => Edit::remove(t.start, t.end, NEGATION_CONFIDENCE),
            })
        })
        .collect();
    if !negations.is_empty() {
        return Ok(negations);
    }

    let antonyms = words(&tokens)
        .filter_map(|t| {
            lexicon::polarity_antonym(t.text)
                .map(|antonym| Edit::replace(t, antonym, POLARITY_CONFIDENCE))
        })
        .collect();
    non_empty(antonyms, FailureReason::NoNegationToken)
}

fn numeric_edits(reference: &str, rng: &mut DetRng) -> Result<Vec<Edit>, FailureReason> {
    let tokens = tokenize(reference);
    let mut edits = Vec::new();

    for token in &tokens {
        match token.kind {
            TokenKind::Number => edits.push(Edit {
                start: token.start,
                end: token.end,
                replacement: change_digit(token.text, rng),
                confidence: NUMBER_CONFIDENCE,
            }),
            TokenKind::Word => {
                if let Some(idx) = lexicon::number_word_index(token.text) {
                    let n = lexicon::NUMBER_WORDS.len();
                    let other = (idx + 1 + rng.below(n - 1)) % n;
                    edits.push(Edit::replace(
                        token,
                        lexicon::NUMBER_WORDS[other],
                        NUMBER_WORD_CONFIDENCE,
                    ));
                }
            }
        }
    }

    non_empty(edits, FailureReason::NoNumericToken)
}

/// Replace one digit of a number with a different digit. A multi-digit
/// number never gains a leading zero.
fn change_digit(number: &str, rng: &mut DetRng) -> String {
    let digits: Vec<(usize, char)> = number
        .char_indices()
        .filter(|(_, c)| c.is_ascii_digit())
        .collect();
    let (pos, old) = digits[rng.below(digits.len())];

    let leading_group = number.chars().take_while(|c| c.is_ascii_digit()).count();
    let forbid_zero = pos == 0 && leading_group > 1;
    let choices: Vec<char> = ('0'..='9')
        .filter(|&c| c != old && !(forbid_zero && c == '0'))
        .collect();
    let new = choices[rng.below(choices.len())];

    let mut changed = number.to_string();
    changed.replace_range(pos..pos + 1, new.encode_utf8(&mut [0u8; 4]));
    changed
}

fn pick_other(members: &[&'static str], current: &str, rng: &mut DetRng) -> Option<&'static str> {
    let others: Vec<&'static str> = members.iter().copied().filter(|m| *m != current).collect();
    if others.is_empty() {
        None
    } else {
        Some(others[rng.below(others.len())])
    }
}

fn entity_edits(source: &str, reference: &str, rng: &mut DetRng) -> Result<Vec<Edit>, FailureReason> {
    let source_tokens = tokenize(source);
    let aligned: HashSet<&str> = words(&source_tokens)
        .filter(|t| t.is_capitalized() && !t.sentence_initial && t.char_len() >= 2)
        .map(|t| t.text)
        .collect();

    let tokens = tokenize(reference);
    let mut edits = Vec::new();
    for token in words(&tokens).filter(|t| t.is_capitalized()) {
        let class = lexicon::entity_class(token.text);
        if aligned.contains(token.text) && !lexicon::is_function_word(token.text) {
            let members = class
                .map(|(_, members)| members)
                .unwrap_or_else(|| lexicon::entity_members(lexicon::FALLBACK_ENTITY_CLASS));
            if let Some(other) = pick_other(members, token.text, rng) {
                edits.push(Edit::replace(token, other, ALIGNED_ENTITY_CONFIDENCE));
            }
        } else if let Some((_, members)) = class {
            if let Some(other) = pick_other(members, token.text, rng) {
                edits.push(Edit::replace(token, other, GAZETTEER_ENTITY_CONFIDENCE));
            }
        }
    }

    non_empty(edits, FailureReason::NoNamedEntity)
}

/// Byte offset where the sentence body ends, before final punctuation.
fn body_end(text: &str) -> usize {
    let trimmed = text.trim_end();
    match trimmed.chars().last() {
        Some(c @ ('.' | '!' | '?')) => trimmed.len() - c.len_utf8(),
        _ => trimmed.len(),
    }
}

fn omission_edits(reference: &str) -> Result<Vec<Edit>, FailureReason> {
    let end = body_end(reference);
    let body = &reference[..end];
    let commas: Vec<usize> = body.match_indices(", ").map(|(i, _)| i).collect();

    let mut edits = Vec::new();
    for (k, &comma) in commas.iter().enumerate() {
        let clause_end = commas.get(k + 1).copied().unwrap_or(end);
        let clause = &reference[comma + 2..clause_end];
        if !reference[..comma].trim().is_empty() && clause.chars().any(char::is_alphanumeric) {
            edits.push(Edit::remove(comma, clause_end, CLAUSE_OMISSION_CONFIDENCE));
        }
    }
    if !edits.is_empty() {
        return Ok(edits);
    }

    let tokens = tokenize(reference);
    let content = words(&tokens)
        .filter(|t| {
            !t.sentence_initial
                && t.char_len() >= MIN_CONTENT_CHARS
                && !lexicon::is_function_word(t.text)
        })
        .map(|t| Edit::remove(t.start, t.end, TOKEN_OMISSION_CONFIDENCE))
        .collect();
    non_empty(content, FailureReason::NoOmissionTarget)
}

fn safety_edits(reference: &str) -> Result<Vec<Edit>, FailureReason> {
    let tokens = tokenize(reference);
    let mut edits = Vec::new();
    for token in words(&tokens) {
        if let Some(weaker) = lexicon::safety_substitute(token.text) {
            edits.push(Edit::replace(token, weaker, SAFETY_SUBSTITUTION_CONFIDENCE));
        } else if lexicon::is_safety_modifier(token.text) {
            edits.push(Edit::remove(token.start, token.end, SAFETY_OMISSION_CONFIDENCE));
        }
    }
    non_empty(edits, FailureReason::NoSafetyPhrase)
}

fn toxic_edits(reference: &str, rng: &mut DetRng) -> Result<Vec<Edit>, FailureReason> {
    let tokens = tokenize(reference);
    let mut edits = Vec::new();
    for token in words(&tokens) {
        let noun_like = token.is_capitalized()
            && !token.sentence_initial
            && token.char_len() >= 3
            && !lexicon::is_function_word(token.text)
            && lexicon::entity_class(token.text).is_none();
        if noun_like {
            let pejorative = lexicon::PEJORATIVES[rng.below(lexicon::PEJORATIVES.len())];
            edits.push(Edit::insert(
                token.start,
                format!("{} ", pejorative),
                PEJORATIVE_CONFIDENCE,
            ));
        }
    }
    if !edits.is_empty() {
        return Ok(edits);
    }

    let at = body_end(reference);
    if reference[..at].trim().is_empty() {
        return Err(FailureReason::NoInsertionPoint);
    }
    let interjection = lexicon::INTERJECTIONS[rng.below(lexicon::INTERJECTIONS.len())];
    Ok(vec![Edit::insert(
        at,
        interjection.to_string(),
        INTERJECTION_CONFIDENCE,
    )])
}

fn confusion_edits(reference: &str) -> Result<Vec<Edit>, FailureReason> {
    let tokens = tokenize(reference);
    let edits = words(&tokens)
        .filter_map(|t| {
            lexicon::confusion(t.text).map(|other| Edit::replace(t, other, CONFUSION_CONFIDENCE))
        })
        .collect();
    non_empty(edits, FailureReason::NoLexiconMatch)
}
