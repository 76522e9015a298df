//! Leakage guard between the evaluation reference and training candidates
//!
//! The guard indexes every eval row once: its id, exact keys for the
//! normalized source, translation and pair, and a MinHash signature of the
//! normalized pair. Training rows matching any of them are removed and
//! recorded with the eval row they collided with.

use ahash::{AHashMap, AHashSet};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use synced_text::TextNormalizer;

use crate::hash::hash_string;
use crate::minhash::{recall_guaranteed, LSHIndex, MinHashSignature, MinHasher};
use crate::row::{Row, RowId};
use crate::{Error, Result};

/// Near-duplicate detection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeakageConfig {
    /// Minimum estimated Jaccard similarity treated as a duplicate
    pub threshold: f64,
    pub num_hashes: usize,
    /// Words per shingle
    pub shingle_size: usize,
    pub num_bands: usize,
    pub rows_per_band: usize,
}

impl Default for LeakageConfig {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            num_hashes: 128,
            shingle_size: 2,
            num_bands: 64,
            rows_per_band: 2,
        }
    }
}

impl LeakageConfig {
    /// Reject settings under which banding could miss an above-threshold pair.
    pub fn validate(&self) -> Result<()> {
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "leakage threshold must be in (0, 1], got {}",
                self.threshold
            )));
        }
        if self.shingle_size == 0 || self.num_bands == 0 || self.rows_per_band == 0 {
            return Err(Error::InvalidConfig(
                "shingle_size, num_bands and rows_per_band must be positive".to_string(),
            ));
        }
        if self.num_bands * self.rows_per_band != self.num_hashes {
            return Err(Error::InvalidConfig(format!(
                "num_bands x rows_per_band ({} x {}) must equal num_hashes ({})",
                self.num_bands, self.rows_per_band, self.num_hashes
            )));
        }
        if !recall_guaranteed(self.num_hashes, self.num_bands, self.threshold) {
            return Err(Error::InvalidConfig(format!(
                "{} bands cannot guarantee recall at threshold {}; use more bands or a higher threshold",
                self.num_bands, self.threshold
            )));
        }
        Ok(())
    }
}

/// How a training row collided with the eval set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Same row id as a frozen eval row
    RowId,
    /// Row id listed in the eval blocklist
    Blocklist,
    /// Normalized source sentence equals an eval source
    SourceText,
    /// Normalized translation equals an eval translation
    TranslationText,
    /// Normalized source and translation both equal
    Signature,
    /// MinHash similarity at or above the threshold
    NearDuplicate,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RowId => "row_id",
            Self::Blocklist => "blocklist",
            Self::SourceText => "source_text",
            Self::TranslationText => "translation_text",
            Self::Signature => "signature",
            Self::NearDuplicate => "near_duplicate",
        }
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakageMatch {
    pub eval_id: RowId,
    pub kind: MatchKind,
    pub similarity: f64,
}

/// A training candidate removed by the guard
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedRow {
    pub row: Row,
    pub matched: LeakageMatch,
}

/// Normalized texts and MinHash of one sentence pair
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateSignature {
    pub source: String,
    pub translation: String,
    pub pair: String,
    pub minhash: MinHashSignature,
}

/// Statistics for a guard run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeakageStats {
    pub eval_rows_indexed: usize,
    pub candidates_checked: usize,
    pub removed: usize,
    pub near_duplicates: usize,
}

impl LeakageStats {
    pub fn removal_rate(&self) -> f64 {
        if self.candidates_checked == 0 {
            0.0
        } else {
            (self.removed as f64 / self.candidates_checked as f64) * 100.0
        }
    }
}

pub struct LeakageGuard {
    config: LeakageConfig,
    normalizer: TextNormalizer,
    minhasher: MinHasher,
    index: LSHIndex,
    /// Eval row ids by LSH document id
    index_ids: Vec<RowId>,
    eval_ids: AHashSet<RowId>,
    blocklist: AHashSet<RowId>,
    by_source: AHashMap<u64, RowId>,
    by_translation: AHashMap<u64, RowId>,
    by_pair: AHashMap<u64, RowId>,
}

impl LeakageGuard {
    /// Index the evaluation reference. Built once, then only queried.
    pub fn build<'r>(
        eval_rows: impl IntoIterator<Item = &'r Row>,
        blocklist: impl IntoIterator<Item = RowId>,
        config: LeakageConfig,
    ) -> Result<Self> {
        config.validate()?;

        let mut guard = Self {
            normalizer: TextNormalizer::signature(),
            minhasher: MinHasher::new(config.num_hashes, config.shingle_size),
            index: LSHIndex::new(config.num_bands, config.rows_per_band),
            index_ids: Vec::new(),
            eval_ids: AHashSet::new(),
            blocklist: blocklist.into_iter().collect(),
            by_source: AHashMap::new(),
            by_translation: AHashMap::new(),
            by_pair: AHashMap::new(),
            config,
        };

        for row in eval_rows {
            let id = row.id().clone();
            let sig = guard.signature(&row.source_text, &row.candidate_translation);

            // first eval row wins on key collisions, keeping matches stable
            if !sig.source.is_empty() {
                guard.by_source.entry(hash_string(&sig.source)).or_insert_with(|| id.clone());
            }
            if !sig.translation.is_empty() {
                guard
                    .by_translation
                    .entry(hash_string(&sig.translation))
                    .or_insert_with(|| id.clone());
            }
            if !sig.pair.is_empty() {
                guard.by_pair.entry(hash_string(&sig.pair)).or_insert_with(|| id.clone());
                guard.index.insert(sig.minhash)?;
                guard.index_ids.push(id.clone());
            }
            guard.eval_ids.insert(id);
        }

        info!(
            "Leakage guard indexed {} eval rows ({} blocklisted ids, threshold {})",
            guard.eval_ids.len(),
            guard.blocklist.len(),
            guard.config.threshold
        );
        Ok(guard)
    }

    pub fn config(&self) -> &LeakageConfig {
        &self.config
    }

    pub fn eval_len(&self) -> usize {
        self.eval_ids.len()
    }

    pub fn signature(&self, source: &str, translation: &str) -> DuplicateSignature {
        let source = self.normalizer.normalize(source);
        let translation = self.normalizer.normalize(translation);
        let pair = match (source.is_empty(), translation.is_empty()) {
            (true, _) => translation.clone(),
            (_, true) => source.clone(),
            _ => format!("{} {}", source, translation),
        };
        let minhash = self.minhasher.compute_signature(&pair);
        DuplicateSignature {
            source,
            translation,
            pair,
            minhash,
        }
    }

    /// The strongest collision of `row` with the eval set, if any.
    ///
    /// Checked in order: row id, blocklist, full pair, source, translation,
    /// then near duplicates (highest similarity, earliest eval row on ties).
    pub fn check(&self, row: &Row) -> Option<LeakageMatch> {
        let exact = |eval_id: &RowId, kind| LeakageMatch {
            eval_id: eval_id.clone(),
            kind,
            similarity: 1.0,
        };

        if self.eval_ids.contains(row.id()) {
            return Some(exact(row.id(), MatchKind::RowId));
        }
        if self.blocklist.contains(row.id()) {
            return Some(exact(row.id(), MatchKind::Blocklist));
        }

        let sig = self.signature(&row.source_text, &row.candidate_translation);
        if sig.pair.is_empty() {
            return None;
        }
        if let Some(id) = self.by_pair.get(&hash_string(&sig.pair)) {
            return Some(exact(id, MatchKind::Signature));
        }
        if !sig.source.is_empty() {
            if let Some(id) = self.by_source.get(&hash_string(&sig.source)) {
                return Some(exact(id, MatchKind::SourceText));
            }
        }
        if !sig.translation.is_empty() {
            if let Some(id) = self.by_translation.get(&hash_string(&sig.translation)) {
                return Some(exact(id, MatchKind::TranslationText));
            }
        }

        let mut best: Option<(usize, f64)> = None;
        for candidate in self.index.query(&sig.minhash) {
            let Some(eval_sig) = self.index.get_signature(candidate) else {
                continue;
            };
            let similarity = sig.minhash.jaccard_similarity(eval_sig);
            if similarity >= self.config.threshold
                && best.map(|(_, s)| similarity > s).unwrap_or(true)
            {
                best = Some((candidate, similarity));
            }
        }

        best.map(|(doc, similarity)| LeakageMatch {
            eval_id: self.index_ids[doc].clone(),
            kind: MatchKind::NearDuplicate,
            similarity,
        })
    }

    /// Split training candidates into clean rows and removed rows, both in
    /// input order.
    pub fn filter(&self, candidates: Vec<Row>) -> (Vec<Row>, Vec<RemovedRow>, LeakageStats) {
        let checked: Vec<(Row, Option<LeakageMatch>)> = candidates
            .into_par_iter()
            .map(|row| {
                let matched = self.check(&row);
                (row, matched)
            })
            .collect();

        let mut stats = LeakageStats {
            eval_rows_indexed: self.eval_ids.len(),
            candidates_checked: checked.len(),
            ..Default::default()
        };
        let mut clean = Vec::with_capacity(checked.len());
        let mut removed = Vec::new();

        for (row, matched) in checked {
            match matched {
                Some(matched) => {
                    debug!(
                        "Removed {} from train: {} match with eval row {} ({:.2})",
                        row.id(),
                        matched.kind,
                        matched.eval_id,
                        matched.similarity
                    );
                    if matched.kind == MatchKind::NearDuplicate {
                        stats.near_duplicates += 1;
                    }
                    removed.push(RemovedRow { row, matched });
                }
                None => clean.push(row),
            }
        }
        stats.removed = removed.len();

        info!(
            "Leakage guard removed {} of {} training candidates ({:.2}%)",
            stats.removed,
            stats.candidates_checked,
            stats.removal_rate()
        );
        (clean, removed, stats)
    }
}

/// Build a guard over `eval_reference` and filter `train_candidates`.
pub fn filter_leakage(
    train_candidates: Vec<Row>,
    eval_reference: &[Row],
    blocklist: &[RowId],
    config: LeakageConfig,
) -> Result<(Vec<Row>, Vec<RemovedRow>)> {
    let guard = LeakageGuard::build(eval_reference, blocklist.iter().cloned(), config)?;
    let (clean, removed, _) = guard.filter(train_candidates);
    Ok((clean, removed))
}
