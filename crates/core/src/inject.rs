//! Injection engine
//!
//! Applies a category's perturbation to a row's reference translation and
//! attaches the resulting labels and provenance. The outcome is a pure
//! function of `(row, category, seed)`.

use rayon::prelude::*;
use tracing::{debug, info};

use synced_text::tokenize::splice;
use synced_text::TextNormalizer;

use crate::hash::{injection_seed, DetRng};
use crate::perturb::{candidate_edits, select_edit, Edit};
use crate::planner::CategoryPlan;
use crate::quantify::quantify;
use crate::row::{
    Failure, FailureKind, FailureReason, InjectionRecord, Row, RowSet, RowStatus, Span,
};
use crate::schema::{Category, LabelIssue, LabelSchema, PerturbationKind};
use crate::{Error, Result};

/// Statistics for an injection batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InjectionStats {
    pub attempted: usize,
    pub injected: usize,
    pub failed: usize,
    /// Rows that were not PENDING and were left untouched
    pub skipped: usize,
}

impl InjectionStats {
    pub fn failure_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            (self.failed as f64 / self.attempted as f64) * 100.0
        }
    }
}

struct Perturbed {
    candidate: String,
    edit: Option<Edit>,
    dims: Vec<u8>,
}

pub struct InjectionEngine<'a> {
    schema: &'a LabelSchema,
    surface: TextNormalizer,
}

impl<'a> InjectionEngine<'a> {
    pub fn new(schema: &'a LabelSchema) -> Self {
        Self {
            schema,
            surface: TextNormalizer::surface(),
        }
    }

    pub fn schema(&self) -> &LabelSchema {
        self.schema
    }

    /// Inject `category` into a PENDING row.
    ///
    /// Returns the row as INJECTED, or as FAILED with a reason code when the
    /// perturbation has nothing to work on. Unknown categories and non-pending
    /// rows are errors.
    pub fn inject(&self, row: &Row, category: &str, seed: u64) -> Result<Row> {
        if row.status != RowStatus::Pending {
            return Err(Error::InvalidTransition {
                id: row.id().to_string(),
                action: "injected",
                status: row.status,
            });
        }
        let spec = self.schema.category(category).ok_or_else(|| {
            Error::SchemaViolation(format!(
                "row {} requests unknown category '{}'",
                row.id(),
                category
            ))
        })?;

        let mut next = row.clone();
        next.target_category = Some(spec.name.clone());
        Ok(self.attempt(next, spec, &spec.name, seed, 0, RowStatus::Injected))
    }

    /// Inject every PENDING row of `rows` with its planned category.
    pub fn inject_batch(
        &self,
        rows: &RowSet,
        plan: &CategoryPlan,
        seed: u64,
    ) -> Result<(RowSet, InjectionStats)> {
        let updates: Vec<Row> = rows
            .rows()
            .par_iter()
            .filter(|row| row.status == RowStatus::Pending)
            .map(|row| {
                let category = plan.category_for(row.id()).ok_or_else(|| {
                    Error::InvariantViolation(format!("row {} has no planned category", row.id()))
                })?;
                self.inject(row, category, seed)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut stats = InjectionStats {
            attempted: updates.len(),
            skipped: rows.len() - updates.len(),
            ..Default::default()
        };
        for row in &updates {
            match row.status {
                RowStatus::Injected => stats.injected += 1,
                _ => stats.failed += 1,
            }
        }

        info!(
            "Injected {} of {} rows ({} failed, {:.1}% failure rate)",
            stats.injected,
            stats.attempted,
            stats.failed,
            stats.failure_rate()
        );

        Ok((rows.with_updates(updates)?, stats))
    }

    /// One attempt at `category`. On success the row takes `success`
    /// status; otherwise it is FAILED with no candidate and no labels.
    pub(crate) fn attempt(
        &self,
        mut row: Row,
        category: &Category,
        requested: &str,
        seed: u64,
        attempt: u32,
        success: RowStatus,
    ) -> Row {
        let mut record = InjectionRecord {
            category: category.name.clone(),
            requested_category: requested.to_string(),
            perturbation_kind: category.perturbation,
            seed,
            source_span: None,
            replacement: String::new(),
            confidence: 0.0,
            attempt,
        };

        match self.perturb(&row, category, seed) {
            Ok(perturbed) => {
                if let Some(edit) = &perturbed.edit {
                    record.source_span = Some(Span {
                        start: edit.start,
                        end: edit.end,
                        text: row.reference_translation[edit.start..edit.end].to_string(),
                    });
                    record.replacement = edit.replacement.clone();
                    record.confidence = edit.confidence;
                } else {
                    record.confidence = 1.0;
                }

                row.candidate_translation = perturbed.candidate;
                row.label_binary = Some(category.binary.clone());
                row.label_multiclass = Some(category.multiclass.clone());
                row.label_dims = perturbed.dims;
                row.status = success;
                row.failure = None;
                debug!("Row {} injected with {}", row.id(), category.name);
            }
            Err(failure) => {
                debug!(
                    "Row {} failed {} injection: {}",
                    row.id(),
                    category.name,
                    failure
                );
                row.candidate_translation.clear();
                row.label_binary = None;
                row.label_multiclass = None;
                row.label_dims.clear();
                row.status = RowStatus::Failed;
                row.failure = Some(failure);
            }
        }

        row.injection_metadata = Some(record);
        row
    }

    fn perturb(&self, row: &Row, category: &Category, seed: u64) -> std::result::Result<Perturbed, Failure> {
        let mut rng = DetRng::new(injection_seed(row.id().as_str(), &category.name, seed));
        let reference = &row.reference_translation;

        let edits = candidate_edits(category.perturbation, &row.source_text, reference, &mut rng)
            .map_err(Failure::injection)?;

        let (candidate, edit) = if category.perturbation == PerturbationKind::Identity {
            (reference.clone(), None)
        } else {
            let edit = select_edit(edits, &mut rng)
                .ok_or_else(|| Failure::injection(FailureReason::UnchangedOutput))?;
            let candidate = splice(reference, edit.start, edit.end, &edit.replacement);
            if self.surface.normalize(&candidate) == self.surface.normalize(reference) {
                return Err(Failure::injection(FailureReason::UnchangedOutput));
            }
            (candidate, Some(edit))
        };

        if candidate.trim().is_empty() {
            return Err(Failure::injection(FailureReason::EmptyCandidate));
        }

        let dims = match &row.supplied_dims {
            Some(supplied) => supplied.clone(),
            None => quantify(self.schema, category, edit.as_ref(), reference),
        };

        match self.schema.validate_labels(
            Some(&category.binary),
            Some(&category.multiclass),
            &dims,
        ) {
            Ok(()) => Ok(Perturbed {
                candidate,
                edit,
                dims,
            }),
            Err(LabelIssue::Incomplete(detail)) | Err(LabelIssue::Invalid(detail)) => Err(Failure {
                kind: FailureKind::SchemaMismatch,
                reason: FailureReason::InvalidLabels,
                detail: Some(detail),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{CategoryPlanner, CategoryRequest, TargetDistribution};
    use crate::row::RowId;

    fn schema() -> LabelSchema {
        LabelSchema::builtin().unwrap()
    }

    #[test]
    fn test_inject_success() {
        let schema = schema();
        let engine = InjectionEngine::new(&schema);
        let row = Row::pending("r1", "The train leaves at 8.", "Der Zug fährt um 8 Uhr ab.");

        let out = engine.inject(&row, "NUM", 42).unwrap();
        assert_eq!(out.status, RowStatus::Injected);
        assert_ne!(out.candidate_translation, out.reference_translation);
        assert_eq!(out.label_binary.as_deref(), Some("ERR"));
        assert_eq!(out.label_multiclass.as_deref(), Some("NUM"));
        assert!(schema.validate_row(&out).is_ok());

        let record = out.injection_metadata.unwrap();
        assert_eq!(record.perturbation_kind, PerturbationKind::NumericSubstitution);
        assert_eq!(record.source_span.unwrap().text, "8");
        assert_eq!(record.attempt, 0);
    }

    #[test]
    fn test_inject_is_deterministic() {
        let schema = schema();
        let engine = InjectionEngine::new(&schema);
        let row = Row::pending("r7", "Take 25 mg twice.", "Nehmen Sie zweimal 25 mg.");
        let a = engine.inject(&row, "NUM", 9).unwrap();
        let b = engine.inject(&row, "NUM", 9).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_structural_failure() {
        let schema = schema();
        let engine = InjectionEngine::new(&schema);
        let row = Row::pending("r1", "The train leaves at 8.", "Der Zug fährt um 8 Uhr ab.");

        let out = engine.inject(&row, "SEN", 42).unwrap();
        assert_eq!(out.status, RowStatus::Failed);
        assert!(out.candidate_translation.is_empty());
        assert!(out.label_binary.is_none());
        let failure = out.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::InjectionFailure);
        assert_eq!(failure.reason, FailureReason::NoNegationToken);
        assert_eq!(out.injection_metadata.unwrap().category, "SEN");
    }

    #[test]
    fn test_identity_keeps_reference() {
        let schema = schema();
        let engine = InjectionEngine::new(&schema);
        let row = Row::pending("r2", "The bridge is closed.", "Die Brücke ist geschlossen.");
        let out = engine.inject(&row, "NOT", 1).unwrap();
        assert_eq!(out.status, RowStatus::Injected);
        assert_eq!(out.candidate_translation, "Die Brücke ist geschlossen.");
        assert_eq!(out.label_binary.as_deref(), Some("NOT"));
        assert_eq!(out.label_dims, vec![5, 1, 1, 1, 1]);
    }

    #[test]
    fn test_supplied_scores_override_and_are_validated() {
        let schema = schema();
        let engine = InjectionEngine::new(&schema);
        let mut row = Row::pending("r3", "Do not smoke.", "Nicht rauchen.");
        row.supplied_dims = Some(vec![2, 4, 1, 1, 4]);
        let out = engine.inject(&row, "SEN", 1).unwrap();
        assert_eq!(out.label_dims, vec![2, 4, 1, 1, 4]);

        row.supplied_dims = Some(vec![2, 1, 1, 1, 4]);
        let out = engine.inject(&row, "SEN", 1).unwrap();
        assert_eq!(out.status, RowStatus::Failed);
        assert_eq!(out.failure.unwrap().kind, FailureKind::SchemaMismatch);
    }

    #[test]
    fn test_rejects_non_pending_and_unknown_category() {
        let schema = schema();
        let engine = InjectionEngine::new(&schema);
        let row = Row::pending("r1", "a", "Nicht rauchen.");
        assert!(matches!(
            engine.inject(&row, "ZZZ", 1),
            Err(Error::SchemaViolation(_))
        ));

        let injected = engine.inject(&row, "SEN", 1).unwrap();
        assert!(matches!(
            engine.inject(&injected, "SEN", 1),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_inject_batch() {
        let schema = schema();
        let engine = InjectionEngine::new(&schema);
        let rows = RowSet::from_rows(vec![
            Row::pending("a", "Do not enter.", "Nicht betreten."),
            Row::pending("b", "The train leaves at 8.", "Der Zug fährt um 8 Uhr ab."),
        ])
        .unwrap();
        let requests = vec![
            (RowId::from("a"), CategoryRequest::Explicit("SEN".to_string())),
            (RowId::from("b"), CategoryRequest::Explicit("SEN".to_string())),
        ];
        let plan = CategoryPlanner::new(&schema, TargetDistribution::uniform(&schema), 1)
            .plan(&requests)
            .unwrap();

        let (out, stats) = engine.inject_batch(&rows, &plan, 1).unwrap();
        assert_eq!(stats.injected, 1);
        assert_eq!(stats.failed, 1);
        assert!(out.iter().all(|r| r.status != RowStatus::Pending));

        // a second pass leaves everything alone
        let (again, stats) = engine.inject_batch(&out, &plan, 1).unwrap();
        assert_eq!(stats.skipped, 2);
        assert_eq!(again.rows(), out.rows());
    }
}
