//! Heuristic dimension scores for injected rows
//!
//! Scores follow from the perturbation kind, adjusted by the edit's
//! confidence tier and span size, then clamped to the category's ranges.

use synced_text::tokenize::tokenize;

use crate::perturb::Edit;
use crate::schema::{Category, LabelSchema, PerturbationKind};

/// Dimension names the heuristic knows, in base-table order
const KNOWN_DIMENSIONS: [&str; 5] = [
    "error_obviousness",
    "error_severity",
    "localization_complexity",
    "contextual_dependency",
    "adequacy_deviation",
];

const OBVIOUSNESS: usize = 0;
const SEVERITY: usize = 1;
const LOCALIZATION: usize = 2;

/// Edits below this confidence are subtler and less damaging.
const SUBTLE_BELOW: f64 = 0.8;

fn base_scores(kind: PerturbationKind, confidence: f64) -> [u8; 5] {
    match kind {
        PerturbationKind::NegationFlip if confidence >= 0.9 => [1, 5, 1, 1, 5],
        PerturbationKind::NegationFlip => [2, 4, 1, 1, 4],
        PerturbationKind::NumericSubstitution => [3, 4, 1, 2, 3],
        PerturbationKind::EntitySwap => [2, 3, 1, 2, 3],
        PerturbationKind::SafetyOmission => [3, 5, 1, 3, 4],
        PerturbationKind::Omission => [3, 3, 2, 1, 3],
        PerturbationKind::ToxicInsertion => [1, 4, 1, 1, 3],
        PerturbationKind::Mistranslation => [2, 4, 1, 2, 4],
        PerturbationKind::Identity => [5, 1, 1, 1, 1],
    }
}

/// Words touched by the edit: removed or replaced text, or inserted text.
fn span_words(edit: &Edit, reference: &str) -> usize {
    let touched = if edit.is_insertion() {
        edit.replacement.as_str()
    } else {
        &reference[edit.start..edit.end]
    };
    tokenize(touched).len()
}

/// Score an injection for `category`, one value per schema dimension.
pub fn quantify(
    schema: &LabelSchema,
    category: &Category,
    edit: Option<&Edit>,
    reference: &str,
) -> Vec<u8> {
    if let Some(defaults) = &category.default_scores {
        return defaults.clone();
    }

    let confidence = edit.map(|e| e.confidence).unwrap_or(1.0);
    let mut base = base_scores(category.perturbation, confidence);

    if let Some(edit) = edit {
        base[LOCALIZATION] = match span_words(edit, reference) {
            0 | 1 => base[LOCALIZATION],
            2 | 3 => base[LOCALIZATION].max(2),
            _ => base[LOCALIZATION].max(3),
        };
    }
    if confidence < SUBTLE_BELOW {
        base[OBVIOUSNESS] = base[OBVIOUSNESS].saturating_add(1);
        base[SEVERITY] = base[SEVERITY].saturating_sub(1);
    }

    schema
        .dimensions()
        .iter()
        .zip(&category.ranges)
        .map(|(dim, &(lo, hi))| {
            let raw = KNOWN_DIMENSIONS
                .iter()
                .position(|known| *known == dim.name)
                .map(|idx| base[idx])
                .unwrap_or((dim.min + dim.max) / 2);
            raw.clamp(lo, hi)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit(start: usize, end: usize, replacement: &str, confidence: f64) -> Edit {
        Edit {
            start,
            end,
            replacement: replacement.to_string(),
            confidence,
        }
    }

    #[test]
    fn test_negation_scores() {
        let schema = LabelSchema::builtin().unwrap();
        let sen = schema.category("SEN").unwrap();
        let reference = "Das ist nicht erlaubt.";
        let scores = quantify(&schema, sen, Some(&edit(8, 13, "", 0.95)), reference);
        assert_eq!(scores, vec![1, 5, 1, 1, 5]);
        assert!(schema.validate_labels(Some("ERR"), Some("SEN"), &scores).is_ok());
    }

    #[test]
    fn test_low_confidence_softens() {
        let schema = LabelSchema::builtin().unwrap();
        let tox = schema.category("TOX").unwrap();
        let scores = quantify(&schema, tox, Some(&edit(11, 11, ", so ein Mist", 0.5)), "Das ist gut.");
        // obviousness 1 -> 2, severity 4 -> 3, three inserted words -> localization 2
        assert_eq!(scores, vec![2, 3, 2, 1, 3]);
    }

    #[test]
    fn test_scores_clamped_to_category() {
        let schema = LabelSchema::builtin().unwrap();
        let sen = schema.category("SEN").unwrap();
        // polarity tier with low confidence would drop severity below SEN's floor
        let scores = quantify(&schema, sen, Some(&edit(0, 5, "x", 0.7)), "Gut so.");
        assert_eq!(scores[1], 3);
        assert!(schema.validate_labels(Some("ERR"), Some("SEN"), &scores).is_ok());
    }

    #[test]
    fn test_default_scores_win() {
        let schema = LabelSchema::builtin().unwrap();
        let clean = schema.category("NOT").unwrap();
        assert_eq!(quantify(&schema, clean, None, "Hallo."), vec![5, 1, 1, 1, 1]);
    }

    #[test]
    fn test_clause_omission_localization() {
        let schema = LabelSchema::builtin().unwrap();
        let num = schema.category("NUM").unwrap();
        let reference = "Nehmen Sie die Tablette, aber nur nach dem Essen.";
        let scores = quantify(&schema, num, Some(&edit(23, 48, "", 0.9)), reference);
        assert_eq!(scores[2], 3);
    }
}
