//! Final dataset assembly
//!
//! Partitions the processed rows into the training split and the evaluation
//! split, runs the leakage guard over every training candidate and verifies
//! the partition before anything is returned. Frozen evaluation rows are
//! carried through unchanged.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

use crate::leakage::{LeakageConfig, LeakageGuard, LeakageMatch, LeakageStats, RemovedRow};
use crate::row::{FailureKind, FailureReason, Row, RowId, RowSet, RowStatus, Split, SplitAssignment};
use crate::schema::{LabelIssue, LabelSchema};
use crate::{Error, Result};

/// Why a row did not make it into either split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Injection failed and repair gave up (or never ran)
    Failed {
        kind: FailureKind,
        code: FailureReason,
    },
    /// Labels present but not valid under the active schema
    SchemaViolation { detail: String },
    /// EVAL-tagged row reusing the id of a frozen eval row
    FrozenEval,
    /// Training row colliding with the eval set
    Leakage(LeakageMatch),
}

impl ExclusionReason {
    /// Stable key for counting exclusions
    pub fn key(&self) -> String {
        match self {
            Self::Failed { kind, .. } => kind.as_str().to_ascii_lowercase(),
            Self::SchemaViolation { .. } => "schema_violation".to_string(),
            Self::FrozenEval => "frozen_eval".to_string(),
            Self::Leakage(_) => "leakage".to_string(),
        }
    }
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { kind, code } => write!(f, "{}:{}", kind.as_str(), code),
            Self::SchemaViolation { detail } => write!(f, "SCHEMA_VIOLATION ({})", detail),
            Self::FrozenEval => f.write_str("FROZEN_EVAL"),
            Self::Leakage(m) => write!(f, "LEAKAGE:{} with {}", m.kind, m.eval_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Excluded {
    pub row: Row,
    pub reason: ExclusionReason,
}

/// Output of assembly
#[derive(Debug, Clone)]
pub struct Assembly {
    pub train_final: Vec<Row>,
    /// Frozen eval rows first, then new eval rows, each in input order
    pub eval_final: Vec<Row>,
    pub excluded: Vec<Excluded>,
    pub removed_by_leakage: Vec<RemovedRow>,
    pub leakage_stats: LeakageStats,
    pub schema_version: String,
    pub frozen_eval_rows: usize,
}

impl Assembly {
    pub fn excluded_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for excluded in &self.excluded {
            *counts.entry(excluded.reason.key()).or_insert(0) += 1;
        }
        counts
    }
}

pub struct Assembler<'a> {
    schema: &'a LabelSchema,
    leakage: LeakageConfig,
}

impl<'a> Assembler<'a> {
    pub fn new(schema: &'a LabelSchema, leakage: LeakageConfig) -> Self {
        Self { schema, leakage }
    }

    /// Partition `rows` and the frozen `eval_reference` into final splits.
    ///
    /// Fatal: a schema version other than the registry's, a PENDING row, a
    /// labelled row missing a label field, a frozen row failing the schema,
    /// duplicate ids, or a broken partition.
    pub fn assemble(
        &self,
        rows: &RowSet,
        eval_reference: &[Row],
        blocklist: &[RowId],
        schema_version: &str,
    ) -> Result<Assembly> {
        if schema_version != self.schema.version() {
            return Err(Error::SchemaViolation(format!(
                "assembly requested for schema {} but registry holds {}",
                schema_version,
                self.schema.version()
            )));
        }

        let frozen = RowSet::from_rows(eval_reference.to_vec())?;
        for row in frozen.iter() {
            match self.schema.validate_row(row) {
                Ok(()) => {}
                Err(LabelIssue::Incomplete(detail)) => {
                    return Err(Error::IncompleteLabels {
                        id: row.id().to_string(),
                        detail,
                    })
                }
                Err(LabelIssue::Invalid(detail)) => {
                    return Err(Error::SchemaViolation(format!(
                        "frozen eval row {}: {}",
                        row.id(),
                        detail
                    )))
                }
            }
        }

        let mut train_candidates = Vec::new();
        let mut new_eval = Vec::new();
        let mut excluded = Vec::new();

        for row in rows.iter() {
            match row.status {
                RowStatus::Pending => {
                    return Err(Error::IncompleteLabels {
                        id: row.id().to_string(),
                        detail: "row was never injected".to_string(),
                    })
                }
                RowStatus::Final => {
                    return Err(Error::InvalidTransition {
                        id: row.id().to_string(),
                        action: "assembled",
                        status: row.status,
                    })
                }
                RowStatus::Failed => {
                    let (kind, code) = row
                        .failure
                        .as_ref()
                        .map(|f| (f.kind, f.reason))
                        .unwrap_or((FailureKind::InjectionFailure, FailureReason::EmptyCandidate));
                    excluded.push(Excluded {
                        row: row.clone(),
                        reason: ExclusionReason::Failed { kind, code },
                    });
                }
                RowStatus::Injected | RowStatus::Repaired => {
                    if row.intended_split == Split::Eval && frozen.contains(row.id()) {
                        warn!("Row {} reuses a frozen eval id; keeping the frozen row", row.id());
                        excluded.push(Excluded {
                            row: row.clone(),
                            reason: ExclusionReason::FrozenEval,
                        });
                        continue;
                    }
                    match self.schema.validate_row(row) {
                        Ok(()) => {}
                        Err(LabelIssue::Incomplete(detail)) => {
                            return Err(Error::IncompleteLabels {
                                id: row.id().to_string(),
                                detail,
                            })
                        }
                        Err(LabelIssue::Invalid(detail)) => {
                            warn!("Row {} excluded: {}", row.id(), detail);
                            excluded.push(Excluded {
                                row: row.clone(),
                                reason: ExclusionReason::SchemaViolation { detail },
                            });
                            continue;
                        }
                    }
                    match row.intended_split {
                        Split::Train => train_candidates.push(row.clone()),
                        Split::Eval => new_eval.push(row.clone()),
                    }
                }
            }
        }

        let guard = LeakageGuard::build(
            frozen.iter().chain(new_eval.iter()),
            blocklist.iter().cloned(),
            self.leakage.clone(),
        )?;
        let (clean_train, removed, leakage_stats) = guard.filter(train_candidates);

        let version = self.schema.version().to_string();
        let finalize = |mut row: Row, assignment: SplitAssignment| {
            row.status = RowStatus::Final;
            row.assignment = Some(assignment);
            row.schema_version = Some(version.clone());
            row
        };

        let train_final: Vec<Row> = clean_train
            .into_iter()
            .map(|row| finalize(row, SplitAssignment::Train))
            .collect();
        let frozen_eval_rows = frozen.len();
        let mut eval_final = frozen.into_rows();
        eval_final.extend(new_eval.into_iter().map(|row| finalize(row, SplitAssignment::Eval)));

        for removed_row in &removed {
            excluded.push(Excluded {
                row: removed_row.row.clone(),
                reason: ExclusionReason::Leakage(removed_row.matched.clone()),
            });
        }
        for entry in &mut excluded {
            entry.row.assignment = Some(SplitAssignment::Discarded);
        }

        let assembly = Assembly {
            train_final,
            eval_final,
            excluded,
            removed_by_leakage: removed,
            leakage_stats,
            schema_version: version,
            frozen_eval_rows,
        };
        verify(&assembly, rows, eval_reference)?;

        info!(
            "Assembled {} train rows and {} eval rows ({} frozen); {} rows excluded",
            assembly.train_final.len(),
            assembly.eval_final.len(),
            assembly.frozen_eval_rows,
            assembly.excluded.len()
        );
        Ok(assembly)
    }
}

/// Post-conditions: unique ids, disjoint splits, complete partition.
fn verify(assembly: &Assembly, rows: &RowSet, eval_reference: &[Row]) -> Result<()> {
    let mut train_ids = AHashSet::new();
    for row in &assembly.train_final {
        if !train_ids.insert(row.id()) {
            return Err(Error::InvariantViolation(format!("train repeats id {}", row.id())));
        }
    }
    let mut eval_ids = AHashSet::new();
    for row in &assembly.eval_final {
        if !eval_ids.insert(row.id()) {
            return Err(Error::InvariantViolation(format!("eval repeats id {}", row.id())));
        }
        if train_ids.contains(row.id()) {
            return Err(Error::InvariantViolation(format!(
                "row {} is in both splits",
                row.id()
            )));
        }
    }
    for row in eval_reference {
        if !eval_ids.contains(row.id()) {
            return Err(Error::InvariantViolation(format!(
                "frozen eval row {} went missing",
                row.id()
            )));
        }
    }

    let placed = assembly.train_final.len()
        + (assembly.eval_final.len() - assembly.frozen_eval_rows)
        + assembly.excluded.len();
    if placed != rows.len() {
        return Err(Error::InvariantViolation(format!(
            "{} input rows but {} placed",
            rows.len(),
            placed
        )));
    }
    let excluded_ids: AHashSet<&RowId> = assembly.excluded.iter().map(|e| e.row.id()).collect();
    for row in rows.iter() {
        let id = row.id();
        let homes = usize::from(train_ids.contains(id))
            + usize::from(excluded_ids.contains(id))
            + usize::from(
                eval_ids.contains(id)
                    && row.intended_split == Split::Eval
                    && !excluded_ids.contains(id),
            );
        if homes != 1 {
            return Err(Error::InvariantViolation(format!(
                "row {} placed {} times",
                id, homes
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::InjectionEngine;
    use crate::leakage::MatchKind;
    use crate::row::Failure;

    fn schema() -> LabelSchema {
        LabelSchema::builtin().unwrap()
    }

    fn frozen(id: &str, src: &str, mt: &str) -> Row {
        let mut row = Row::frozen_eval(id, src, mt).with_labels("NOT", "NOT", vec![5, 1, 1, 1, 1]);
        row.schema_version = Some("synced_ende_v1".to_string());
        row
    }

    fn injected(engine: &InjectionEngine<'_>, id: &str, src: &str, mt: &str, category: &str) -> Row {
        engine.inject(&Row::pending(id, src, mt), category, 1).unwrap()
    }

    #[test]
    fn test_assemble_with_leakage() {
        let schema = schema();
        let engine = InjectionEngine::new(&schema);
        let rows = RowSet::from_rows(vec![
            injected(&engine, "T9", "The bridge is closed.", "Die Brücke ist geschlossen.", "NOT"),
            injected(&engine, "T1", "Turn left.", "Biegen Sie links ab.", "NOT"),
            injected(&engine, "T2", "The train leaves at 8.", "Der Zug fährt um 8 Uhr ab.", "SEN"),
        ])
        .unwrap();
        let evals = vec![frozen("E1", "The bridge is closed.", "Die Brücke ist geschlossen.")];

        let assembly = Assembler::new(&schema, LeakageConfig::default())
            .assemble(&rows, &evals, &[], "synced_ende_v1")
            .unwrap();

        assert_eq!(assembly.train_final.len(), 1);
        assert_eq!(assembly.train_final[0].id().as_str(), "T1");
        assert_eq!(assembly.train_final[0].status, RowStatus::Final);
        assert_eq!(assembly.train_final[0].schema_version.as_deref(), Some("synced_ende_v1"));
        assert_eq!(assembly.eval_final.len(), 1);
        assert_eq!(assembly.removed_by_leakage.len(), 1);
        assert_eq!(assembly.removed_by_leakage[0].matched.eval_id.as_str(), "E1");
        assert_eq!(assembly.removed_by_leakage[0].matched.kind, MatchKind::Signature);

        let counts = assembly.excluded_counts();
        assert_eq!(counts.get("leakage"), Some(&1));
        assert_eq!(counts.get("injection_failure"), Some(&1));
        assert!(assembly
            .excluded
            .iter()
            .all(|e| e.row.assignment == Some(SplitAssignment::Discarded)));
    }

    #[test]
    fn test_new_eval_rows_guard_training() {
        let schema = schema();
        let engine = InjectionEngine::new(&schema);
        let eval_row = injected(&engine, "N1", "Turn left.", "Biegen Sie links ab.", "NOT")
            .with_split(Split::Eval);
        let train_row = injected(&engine, "N2", "Turn left.", "Biegen Sie links ab.", "NOT");
        let rows = RowSet::from_rows(vec![eval_row, train_row]).unwrap();

        let assembly = Assembler::new(&schema, LeakageConfig::default())
            .assemble(&rows, &[], &[], "synced_ende_v1")
            .unwrap();
        assert!(assembly.train_final.is_empty());
        assert_eq!(assembly.eval_final.len(), 1);
        assert_eq!(assembly.eval_final[0].assignment, Some(SplitAssignment::Eval));
    }

    #[test]
    fn test_frozen_id_collisions() {
        let schema = schema();
        let engine = InjectionEngine::new(&schema);
        let evals = vec![frozen("E1", "Hello there.", "Hallo zusammen.")];
        let as_eval = injected(&engine, "E1", "Other text.", "Anderer Text.", "NOT").with_split(Split::Eval);
        let rows = RowSet::from_rows(vec![as_eval]).unwrap();
        let assembly = Assembler::new(&schema, LeakageConfig::default())
            .assemble(&rows, &evals, &[], "synced_ende_v1")
            .unwrap();
        assert_eq!(assembly.excluded[0].reason, ExclusionReason::FrozenEval);
        assert_eq!(assembly.eval_final[0].candidate_translation, "Hallo zusammen.");

        let as_train = injected(&engine, "E1", "Other text.", "Anderer Text.", "NOT");
        let rows = RowSet::from_rows(vec![as_train]).unwrap();
        let assembly = Assembler::new(&schema, LeakageConfig::default())
            .assemble(&rows, &evals, &[], "synced_ende_v1")
            .unwrap();
        assert_eq!(assembly.removed_by_leakage[0].matched.kind, MatchKind::RowId);
    }

    #[test]
    fn test_fatal_conditions() {
        let schema = schema();
        let assembler = Assembler::new(&schema, LeakageConfig::default());

        let pending = RowSet::from_rows(vec![Row::pending("p", "a", "b")]).unwrap();
        assert!(matches!(
            assembler.assemble(&pending, &[], &[], "synced_ende_v1"),
            Err(Error::IncompleteLabels { .. })
        ));

        let empty = RowSet::new();
        assert!(matches!(
            assembler.assemble(&empty, &[], &[], "synced_ende_v2"),
            Err(Error::SchemaViolation(_))
        ));

        let bad_frozen = vec![Row::frozen_eval("E1", "a", "b").with_labels("ERR", "XYZ", vec![1, 1, 1, 1, 1])];
        assert!(matches!(
            assembler.assemble(&empty, &bad_frozen, &[], "synced_ende_v1"),
            Err(Error::SchemaViolation(_))
        ));

        let unlabelled_frozen = vec![Row::frozen_eval("E1", "a", "b")];
        assert!(matches!(
            assembler.assemble(&empty, &unlabelled_frozen, &[], "synced_ende_v1"),
            Err(Error::IncompleteLabels { .. })
        ));

        let dup = vec![frozen("E1", "a", "b"), frozen("E1", "c", "d")];
        assert!(matches!(
            assembler.assemble(&empty, &dup, &[], "synced_ende_v1"),
            Err(Error::DuplicateIdViolation(_))
        ));
    }

    #[test]
    fn test_invalid_labels_excluded_not_fatal() {
        let schema = schema();
        let mut row = Row::pending("r1", "a", "b").with_labels("ERR", "NUM", vec![9, 9, 9, 9, 9]);
        row.status = RowStatus::Injected;
        row.candidate_translation = "c".to_string();
        let mut exhausted = Row::pending("r2", "x", "y");
        exhausted.status = RowStatus::Failed;
        exhausted.failure = Some(Failure {
            kind: FailureKind::RepairExhausted,
            reason: FailureReason::NoNegationToken,
            detail: None,
        });
        let rows = RowSet::from_rows(vec![row, exhausted]).unwrap();

        let assembly = Assembler::new(&schema, LeakageConfig::default())
            .assemble(&rows, &[], &[], "synced_ende_v1")
            .unwrap();
        let counts = assembly.excluded_counts();
        assert_eq!(counts.get("schema_violation"), Some(&1));
        assert_eq!(counts.get("repair_exhausted"), Some(&1));
        assert!(assembly.train_final.is_empty());
    }
}
