//! Row model and the id-indexed row collection
//!
//! A row moves through `PENDING -> INJECTED | FAILED -> REPAIRED | FAILED -> FINAL`.
//! Stages never mutate a row in place; they return updated copies that are
//! swapped into a fresh [`RowSet`].

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::hash::unit_fraction;
use crate::schema::PerturbationKind;
use crate::{Error, Result};

/// Stable row identifier (the `rid` column)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(String);

impl RowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RowId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RowId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Lifecycle status of a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowStatus {
    Pending,
    Injected,
    Failed,
    Repaired,
    Final,
}

impl RowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Injected => "INJECTED",
            Self::Failed => "FAILED",
            Self::Repaired => "REPAIRED",
            Self::Final => "FINAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "INJECTED" => Some(Self::Injected),
            "FAILED" => Some(Self::Failed),
            "REPAIRED" => Some(Self::Repaired),
            "FINAL" => Some(Self::Final),
            _ => None,
        }
    }

    /// Rows that carry a usable candidate and label set.
    pub fn is_labelled(&self) -> bool {
        matches!(self, Self::Injected | Self::Repaired | Self::Final)
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split a row is meant for before assembly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Eval,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Eval => "eval",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "train" | "silver" => Some(Self::Train),
            "eval" | "test" | "gold" => Some(Self::Eval),
            _ => None,
        }
    }

    /// Hash-based split for rows without an explicit `split` column.
    ///
    /// Keyed by rid and seed only, so the result does not depend on input order.
    pub fn assign(rid: &RowId, seed: u64, eval_fraction: f64) -> Self {
        if unit_fraction(rid.as_str(), "split", seed) < eval_fraction {
            Self::Eval
        } else {
            Self::Train
        }
    }
}

/// Where the assembler placed a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitAssignment {
    Train,
    Eval,
    Discarded,
}

impl SplitAssignment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Eval => "eval",
            Self::Discarded => "discarded",
        }
    }
}

/// Byte span of the reference translation that was edited
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Provenance of one injection attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectionRecord {
    /// Category whose perturbation was applied
    pub category: String,
    /// Category the planner originally asked for
    pub requested_category: String,
    pub perturbation_kind: PerturbationKind,
    pub seed: u64,
    /// `None` for identity rows and for failed attempts
    pub source_span: Option<Span>,
    pub replacement: String,
    pub confidence: f64,
    /// 0 for the initial injection, otherwise the repair round
    pub attempt: u32,
}

/// Whether a failure may still be repaired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    InjectionFailure,
    SchemaMismatch,
    /// Terminal: the row is never retried again
    RepairExhausted,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InjectionFailure => "INJECTION_FAILURE",
            Self::SchemaMismatch => "SCHEMA_MISMATCH",
            Self::RepairExhausted => "REPAIR_EXHAUSTED",
        }
    }
}

/// Reason code for a failed injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NoNegationToken,
    NoNumericToken,
    NoNamedEntity,
    NoOmissionTarget,
    NoSafetyPhrase,
    NoInsertionPoint,
    NoLexiconMatch,
    EmptyReference,
    UnchangedOutput,
    EmptyCandidate,
    InvalidLabels,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoNegationToken => "no_negation_token",
            Self::NoNumericToken => "no_numeric_token",
            Self::NoNamedEntity => "no_named_entity",
            Self::NoOmissionTarget => "no_omission_target",
            Self::NoSafetyPhrase => "no_safety_phrase",
            Self::NoInsertionPoint => "no_insertion_point",
            Self::NoLexiconMatch => "no_lexicon_match",
            Self::EmptyReference => "empty_reference",
            Self::UnchangedOutput => "unchanged_output",
            Self::EmptyCandidate => "empty_candidate",
            Self::InvalidLabels => "invalid_labels",
        }
    }

    /// Failures a different seed could fix, so the same category is worth
    /// another attempt. Structural failures (the sentence has no target for
    /// the perturbation) never are.
    pub fn is_seed_dependent(&self) -> bool {
        matches!(self, Self::UnchangedOutput | Self::EmptyCandidate)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub reason: FailureReason,
    #[serde(default)]
    pub detail: Option<String>,
}

impl Failure {
    pub fn injection(reason: FailureReason) -> Self {
        Self {
            kind: FailureKind::InjectionFailure,
            reason,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.kind == FailureKind::RepairExhausted
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.reason)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

/// One source/translation pair and everything the pipeline learned about it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    id: RowId,
    pub source_text: String,
    /// Clean German translation the candidate is derived from
    pub reference_translation: String,
    /// Translation that ships in the dataset (`mt_de`)
    pub candidate_translation: String,
    pub label_binary: Option<String>,
    pub label_multiclass: Option<String>,
    /// One score per schema dimension, in schema order
    pub label_dims: Vec<u8>,
    /// Judge scores supplied with the input, used instead of the heuristic
    pub supplied_dims: Option<Vec<u8>>,
    pub injection_metadata: Option<InjectionRecord>,
    pub status: RowStatus,
    pub failure: Option<Failure>,
    /// Category the planner assigned
    pub target_category: Option<String>,
    pub intended_split: Split,
    pub assignment: Option<SplitAssignment>,
    pub schema_version: Option<String>,
}

impl Row {
    /// A fresh input row awaiting injection.
    pub fn pending(
        id: impl Into<RowId>,
        source_text: impl Into<String>,
        reference_translation: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_text: source_text.into(),
            reference_translation: reference_translation.into(),
            candidate_translation: String::new(),
            label_binary: None,
            label_multiclass: None,
            label_dims: Vec::new(),
            supplied_dims: None,
            injection_metadata: None,
            status: RowStatus::Pending,
            failure: None,
            target_category: None,
            intended_split: Split::Train,
            assignment: None,
            schema_version: None,
        }
    }

    /// A row of the frozen evaluation reference. Its labels are taken as-is.
    pub fn frozen_eval(
        id: impl Into<RowId>,
        source_text: impl Into<String>,
        translation: impl Into<String>,
    ) -> Self {
        let translation = translation.into();
        let mut row = Self::pending(id, source_text, translation.clone());
        row.candidate_translation = translation;
        row.status = RowStatus::Final;
        row.intended_split = Split::Eval;
        row.assignment = Some(SplitAssignment::Eval);
        row
    }

    pub fn id(&self) -> &RowId {
        &self.id
    }

    pub fn with_split(mut self, split: Split) -> Self {
        self.intended_split = split;
        self
    }

    pub fn with_labels(
        mut self,
        binary: impl Into<String>,
        multiclass: impl Into<String>,
        dims: Vec<u8>,
    ) -> Self {
        self.label_binary = Some(binary.into());
        self.label_multiclass = Some(multiclass.into());
        self.label_dims = dims;
        self
    }

    /// Failed rows that a repair round may still pick up.
    pub fn is_retriable(&self) -> bool {
        self.status == RowStatus::Failed
            && self.failure.as_ref().map(|f| !f.is_terminal()).unwrap_or(true)
    }
}

/// Rows indexed by id. Ids are unique by construction.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    rows: Vec<Row>,
    index: AHashMap<RowId, usize>,
}

impl RowSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set, rejecting duplicate ids.
    pub fn from_rows(rows: Vec<Row>) -> Result<Self> {
        let mut index = AHashMap::with_capacity(rows.len());
        for (pos, row) in rows.iter().enumerate() {
            if index.insert(row.id().clone(), pos).is_some() {
                return Err(Error::DuplicateIdViolation(row.id().to_string()));
            }
        }
        Ok(Self { rows, index })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: &RowId) -> Option<&Row> {
        self.index.get(id).map(|&pos| &self.rows[pos])
    }

    pub fn contains(&self, id: &RowId) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// New set with `updates` swapped in by id; order is preserved.
    pub fn with_updates(&self, updates: Vec<Row>) -> Result<Self> {
        let mut rows = self.rows.clone();
        for row in updates {
            let pos = *self.index.get(row.id()).ok_or_else(|| {
                Error::InvariantViolation(format!("update for unknown row {}", row.id()))
            })?;
            rows[pos] = row;
        }
        Ok(Self {
            rows,
            index: self.index.clone(),
        })
    }

    pub fn count_by_status(&self) -> BTreeMap<RowStatus, usize> {
        let mut counts = BTreeMap::new();
        for row in &self.rows {
            *counts.entry(row.status).or_insert(0) += 1;
        }
        counts
    }
}

impl<'a> IntoIterator for &'a RowSet {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}
