//! Retry/repair of failed injections
//!
//! Every round is a barrier: all retriable rows are attempted against the
//! same snapshot, then the updates are swapped in together. Successful rows
//! become REPAIRED. Rows still failing after the last round are marked
//! `RepairExhausted`, which is terminal, so a second pass is a no-op.

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::hash::round_seed;
use crate::inject::InjectionEngine;
use crate::row::{Failure, FailureKind, FailureReason, Row, RowSet, RowStatus};
use crate::schema::{LabelIssue, LabelSchema};
use crate::{Error, Result};

/// Result of a repair pass
#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub rows: RowSet,
    pub rounds_run: u32,
    pub repaired: usize,
    pub exhausted: usize,
}

/// Mark labelled rows that are unusable as FAILED.
///
/// Catches rows that carry an empty candidate or a label set the schema
/// rejects, e.g. a checkpoint produced under an older schema.
pub fn scan_failures(rows: &RowSet, schema: &LabelSchema) -> Result<RowSet> {
    let updates: Vec<Row> = rows
        .iter()
        .filter(|r| matches!(r.status, RowStatus::Injected | RowStatus::Repaired))
        .filter_map(|row| {
            let failure = if row.candidate_translation.trim().is_empty() {
                Failure::injection(FailureReason::EmptyCandidate)
            } else {
                match schema.validate_row(row) {
                    Ok(()) => return None,
                    Err(LabelIssue::Incomplete(detail)) | Err(LabelIssue::Invalid(detail)) => {
                        Failure {
                            kind: FailureKind::SchemaMismatch,
                            reason: FailureReason::InvalidLabels,
                            detail: Some(detail),
                        }
                    }
                }
            };
            warn!("Row {} flagged for repair: {}", row.id(), failure);
            let mut flagged = row.clone();
            flagged.status = RowStatus::Failed;
            flagged.failure = Some(failure);
            Some(flagged)
        })
        .collect();

    if !updates.is_empty() {
        info!("Scan flagged {} rows for repair", updates.len());
    }
    rows.with_updates(updates)
}

pub struct RepairPass<'a> {
    engine: &'a InjectionEngine<'a>,
    seed: u64,
    max_rounds: u32,
}

impl<'a> RepairPass<'a> {
    pub fn new(engine: &'a InjectionEngine<'a>, seed: u64, max_rounds: u32) -> Self {
        Self {
            engine,
            seed,
            max_rounds,
        }
    }

    /// Categories to try for a failed row, in order.
    ///
    /// The original category comes first only when a different seed could
    /// succeed. Error categories then fall through to every other error
    /// category; clean categories only use their explicit fallbacks.
    pub fn priority_list(&self, row: &Row) -> Vec<String> {
        let schema = self.engine.schema();
        let original = row
            .injection_metadata
            .as_ref()
            .map(|m| m.requested_category.clone())
            .or_else(|| row.target_category.clone());
        let Some(original) = original else {
            return Vec::new();
        };
        let Some(category) = schema.category(&original) else {
            return Vec::new();
        };

        let mut list = Vec::new();
        let seed_dependent = row
            .failure
            .as_ref()
            .map(|f| f.reason.is_seed_dependent())
            .unwrap_or(false);
        if seed_dependent {
            list.push(category.name.clone());
        }
        for fallback in &category.fallbacks {
            if !list.contains(fallback) {
                list.push(fallback.clone());
            }
        }
        if category.is_error() {
            for other in schema.error_categories() {
                if other.name != category.name && !list.contains(&other.name) {
                    list.push(other.name.clone());
                }
            }
        }
        list
    }

    fn repair_row(&self, row: &Row, round: u32) -> Row {
        let schema = self.engine.schema();
        let seed = round_seed(self.seed, round);
        let requested = row
            .injection_metadata
            .as_ref()
            .map(|m| m.requested_category.clone())
            .or_else(|| row.target_category.clone())
            .unwrap_or_default();

        let mut last = row.clone();
        for name in self.priority_list(row) {
            let Some(category) = schema.category(&name) else {
                continue;
            };
            let attempt = self.engine.attempt(
                row.clone(),
                category,
                &requested,
                seed,
                round,
                RowStatus::Repaired,
            );
            if attempt.status == RowStatus::Repaired {
                debug!("Row {} repaired with {} in round {}", row.id(), name, round);
                return attempt;
            }
            last = attempt;
        }

        // keep the original reason so structural causes stay visible
        let mut failed = row.clone();
        failed.status = RowStatus::Failed;
        failed.failure = row.failure.clone().or(last.failure);
        failed
    }

    /// Run up to `max_rounds` repair rounds.
    pub fn repair(&self, rows: &RowSet) -> Result<RepairOutcome> {
        if let Some(pending) = rows.iter().find(|r| r.status == RowStatus::Pending) {
            return Err(Error::InvalidTransition {
                id: pending.id().to_string(),
                action: "repaired",
                status: RowStatus::Pending,
            });
        }

        let mut current = rows.clone();
        let mut rounds_run = 0;
        let mut repaired = 0;

        for round in 1..=self.max_rounds {
            let retriable: Vec<&Row> = current.iter().filter(|r| r.is_retriable()).collect();
            if retriable.is_empty() {
                break;
            }
            rounds_run = round;

            let updates: Vec<Row> = retriable
                .par_iter()
                .map(|row| self.repair_row(row, round))
                .collect();
            let fixed = updates
                .iter()
                .filter(|r| r.status == RowStatus::Repaired)
                .count();
            repaired += fixed;

            info!(
                "Repair round {}: {} of {} failed rows repaired",
                round,
                fixed,
                updates.len()
            );
            current = current.with_updates(updates)?;
        }

        let exhausted: Vec<Row> = current
            .iter()
            .filter(|r| r.is_retriable())
            .map(|row| {
                let mut row = row.clone();
                let reason = row
                    .failure
                    .as_ref()
                    .map(|f| f.reason)
                    .unwrap_or(FailureReason::EmptyCandidate);
                warn!("Row {} exhausted repair ({})", row.id(), reason);
                row.failure = Some(Failure {
                    kind: FailureKind::RepairExhausted,
                    reason,
                    detail: Some(format!("no category succeeded within {} rounds", self.max_rounds)),
                });
                row
            })
            .collect();
        let exhausted_count = exhausted.len();
        let rows = current.with_updates(exhausted)?;

        Ok(RepairOutcome {
            rows,
            rounds_run,
            repaired,
            exhausted: exhausted_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::RowId;

    fn inject(engine: &InjectionEngine<'_>, rows: Vec<(Row, &str)>) -> RowSet {
        let injected = rows
            .into_iter()
            .map(|(row, category)| engine.inject(&row, category, 42).unwrap())
            .collect();
        RowSet::from_rows(injected).unwrap()
    }

    #[test]
    fn test_structural_failure_falls_back() {
        let schema = LabelSchema::builtin().unwrap();
        let engine = InjectionEngine::new(&schema);
        let rows = inject(
            &engine,
            vec![(
                Row::pending("r1", "The train leaves at 8.", "Der Zug fährt um 8 Uhr ab."),
                "SEN",
            )],
        );

        let pass = RepairPass::new(&engine, 42, 1);
        let first = rows.get(&RowId::from("r1")).unwrap();
        assert_eq!(pass.priority_list(first)[0], "NUM");

        let outcome = pass.repair(&rows).unwrap();
        let row = outcome.rows.get(&RowId::from("r1")).unwrap();
        assert_eq!(row.status, RowStatus::Repaired);
        assert_eq!(row.label_multiclass.as_deref(), Some("NUM"));
        let record = row.injection_metadata.as_ref().unwrap();
        assert_eq!(record.requested_category, "SEN");
        assert_eq!(record.attempt, 1);
        assert_eq!(outcome.repaired, 1);
    }

    #[test]
    fn test_seed_dependent_failure_retries_same_category() {
        let schema = LabelSchema::builtin().unwrap();
        let engine = InjectionEngine::new(&schema);
        let pass = RepairPass::new(&engine, 1, 1);

        let mut row = Row::pending("r1", "a", "Nicht rauchen.");
        row.status = RowStatus::Failed;
        row.target_category = Some("TOX".to_string());
        row.failure = Some(Failure::injection(FailureReason::UnchangedOutput));
        assert_eq!(pass.priority_list(&row)[0], "TOX");

        row.failure = Some(Failure::injection(FailureReason::NoInsertionPoint));
        assert!(!pass.priority_list(&row).contains(&"TOX".to_string()));
    }

    #[test]
    fn test_clean_rows_never_become_errors() {
        let schema = LabelSchema::builtin().unwrap();
        let engine = InjectionEngine::new(&schema);
        let pass = RepairPass::new(&engine, 1, 3);
        let mut row = Row::pending("r1", "a", "x");
        row.status = RowStatus::Failed;
        row.target_category = Some("NOT".to_string());
        row.failure = Some(Failure::injection(FailureReason::EmptyReference));
        assert!(pass.priority_list(&row).is_empty());
    }

    #[test]
    fn test_exhaustion_is_terminal_and_idempotent() {
        let schema = LabelSchema::builtin().unwrap();
        let engine = InjectionEngine::new(&schema);
        let rows = inject(&engine, vec![(Row::pending("r1", "x", "   "), "NUM")]);

        let pass = RepairPass::new(&engine, 42, 2);
        let once = pass.repair(&rows).unwrap();
        let row = once.rows.get(&RowId::from("r1")).unwrap();
        assert_eq!(row.status, RowStatus::Failed);
        let failure = row.failure.as_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::RepairExhausted);
        assert_eq!(failure.reason, FailureReason::EmptyReference);
        assert_eq!(once.exhausted, 1);

        let twice = pass.repair(&once.rows).unwrap();
        assert_eq!(twice.rows.rows(), once.rows.rows());
        assert_eq!(twice.rounds_run, 0);
        assert_eq!(twice.exhausted, 0);
    }

    #[test]
    fn test_good_rows_untouched() {
        let schema = LabelSchema::builtin().unwrap();
        let engine = InjectionEngine::new(&schema);
        let rows = inject(
            &engine,
            vec![
                (Row::pending("ok", "Do not enter.", "Nicht betreten."), "SEN"),
                (Row::pending("bad", "The train leaves at 8.", "Der Zug fährt um 8 Uhr ab."), "SEN"),
            ],
        );
        let before = rows.get(&RowId::from("ok")).unwrap().clone();
        let outcome = RepairPass::new(&engine, 42, 3).repair(&rows).unwrap();
        assert_eq!(outcome.rows.get(&RowId::from("ok")).unwrap(), &before);
        assert!(outcome.rows.iter().all(|r| r.status != RowStatus::Pending));
    }

    #[test]
    fn test_zero_rounds_exhausts_immediately() {
        let schema = LabelSchema::builtin().unwrap();
        let engine = InjectionEngine::new(&schema);
        let rows = inject(
            &engine,
            vec![(Row::pending("r1", "a", "Der Zug fährt um 8 Uhr ab."), "SEN")],
        );
        let outcome = RepairPass::new(&engine, 42, 0).repair(&rows).unwrap();
        assert_eq!(outcome.exhausted, 1);
        assert_eq!(outcome.rounds_run, 0);
    }

    #[test]
    fn test_scan_flags_broken_rows() {
        let schema = LabelSchema::builtin().unwrap();
        let mut broken = Row::pending("r1", "a", "b").with_labels("ERR", "NUM", vec![9, 9, 9, 9, 9]);
        broken.status = RowStatus::Injected;
        broken.candidate_translation = "c".to_string();
        let mut empty = Row::pending("r2", "a", "b").with_labels("NOT", "NOT", vec![5, 1, 1, 1, 1]);
        empty.status = RowStatus::Injected;

        let rows = RowSet::from_rows(vec![broken, empty]).unwrap();
        let scanned = scan_failures(&rows, &schema).unwrap();
        let r1 = scanned.get(&RowId::from("r1")).unwrap();
        assert_eq!(r1.status, RowStatus::Failed);
        assert_eq!(r1.failure.as_ref().unwrap().kind, FailureKind::SchemaMismatch);
        let r2 = scanned.get(&RowId::from("r2")).unwrap();
        assert_eq!(r2.failure.as_ref().unwrap().reason, FailureReason::EmptyCandidate);
    }

    #[test]
    fn test_pending_rows_rejected() {
        let schema = LabelSchema::builtin().unwrap();
        let engine = InjectionEngine::new(&schema);
        let rows = RowSet::from_rows(vec![Row::pending("r1", "a", "b")]).unwrap();
        assert!(RepairPass::new(&engine, 1, 1).repair(&rows).is_err());
    }
}
