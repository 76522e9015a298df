//! Stage checkpoints
//!
//! Every row field round-trips through the checkpoint TSV so a later stage
//! can resume from it. Structured fields (injection provenance, failure) are
//! stored as JSON inside their column.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use synced_core::{Failure, InjectionRecord, Row, RowSet, RowStatus, Split, SplitAssignment};
use tracing::info;

use crate::emit::write_atomic;
use crate::tsv::tsv_writer;
use crate::{Error, Result, TsvReader};

pub const MANIFEST_FILE: &str = "checkpoint.json";

/// Pipeline stage a checkpoint file belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Injected,
    Repaired,
}

impl Stage {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Injected => "01_injected.tsv",
            Self::Repaired => "02_repaired.tsv",
        }
    }

    pub fn path_in(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(self.file_name())
    }
}

/// Describes which run produced the checkpoints in a work directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub last_stage: Stage,
    pub schema_version: String,
    pub seed: u64,
    pub input_digest: u64,
    /// Digest of the stage settings (targets, repair rounds, screening)
    pub settings_digest: u64,
}

impl CheckpointManifest {
    /// Read the manifest in `work_dir`, if there is one.
    pub fn load(work_dir: &Path) -> Result<Option<Self>> {
        let path = work_dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn save(&self, work_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(work_dir)?;
        write_atomic(&work_dir.join(MANIFEST_FILE), |sink| {
            serde_json::to_writer_pretty(&mut *sink, self)?;
            Ok(())
        })
    }

    /// Same run: identical schema, seed, input and stage settings.
    pub fn same_run(&self, other: &Self) -> bool {
        self.schema_version == other.schema_version
            && self.seed == other.seed
            && self.input_digest == other.input_digest
            && self.settings_digest == other.settings_digest
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRecord {
    rid: String,
    src_en: String,
    reference_de: String,
    mt_de: String,
    status: RowStatus,
    split: Split,
    assignment: Option<SplitAssignment>,
    target_category: Option<String>,
    target_err: Option<String>,
    multiclass_label: Option<String>,
    label_dims: String,
    supplied_dims: String,
    injection: String,
    failure: String,
    schema_version: Option<String>,
}

fn join_scores(scores: &[u8]) -> String {
    scores.iter().map(u8::to_string).collect::<Vec<_>>().join(",")
}

fn split_scores(value: &str) -> Option<Vec<u8>> {
    if value.trim().is_empty() {
        return Some(Vec::new());
    }
    value.split(',').map(|v| v.trim().parse::<u8>().ok()).collect()
}

impl CheckpointRecord {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            rid: row.id().to_string(),
            src_en: row.source_text.clone(),
            reference_de: row.reference_translation.clone(),
            mt_de: row.candidate_translation.clone(),
            status: row.status,
            split: row.intended_split,
            assignment: row.assignment,
            target_category: row.target_category.clone(),
            target_err: row.label_binary.clone(),
            multiclass_label: row.label_multiclass.clone(),
            label_dims: join_scores(&row.label_dims),
            supplied_dims: row.supplied_dims.as_deref().map(join_scores).unwrap_or_default(),
            injection: match &row.injection_metadata {
                Some(record) => serde_json::to_string(record)?,
                None => String::new(),
            },
            failure: match &row.failure {
                Some(failure) => serde_json::to_string(failure)?,
                None => String::new(),
            },
            schema_version: row.schema_version.clone(),
        })
    }

    fn into_row(self) -> Result<Row> {
        let invalid = |field: &str| {
            Error::InvalidFile(format!("checkpoint row {}: malformed {}", self.rid, field))
        };
        let label_dims = split_scores(&self.label_dims).ok_or_else(|| invalid("label_dims"))?;
        let supplied = split_scores(&self.supplied_dims).ok_or_else(|| invalid("supplied_dims"))?;
        let injection: Option<InjectionRecord> = if self.injection.is_empty() {
            None
        } else {
            Some(serde_json::from_str(&self.injection)?)
        };
        let failure: Option<Failure> = if self.failure.is_empty() {
            None
        } else {
            Some(serde_json::from_str(&self.failure)?)
        };

        let mut row = Row::pending(self.rid.as_str(), self.src_en, self.reference_de)
            .with_split(self.split);
        row.candidate_translation = self.mt_de;
        row.status = self.status;
        row.assignment = self.assignment;
        row.target_category = self.target_category;
        row.label_binary = self.target_err;
        row.label_multiclass = self.multiclass_label;
        row.label_dims = label_dims;
        row.supplied_dims = Some(supplied).filter(|s| !s.is_empty());
        row.injection_metadata = injection;
        row.failure = failure;
        row.schema_version = self.schema_version;
        Ok(row)
    }
}

/// Write all rows of a stage to its checkpoint file.
pub fn write_checkpoint(path: &Path, rows: &RowSet) -> Result<()> {
    write_atomic(path, |sink| {
        let mut writer = tsv_writer(sink);
        for row in rows {
            writer.serialize(CheckpointRecord::from_row(row)?)?;
        }
        writer.flush()?;
        Ok(())
    })?;
    info!("Wrote checkpoint {:?} ({} rows)", path, rows.len());
    Ok(())
}

/// Read a checkpoint back into a row set.
pub fn read_checkpoint(path: &Path) -> Result<RowSet> {
    let reader = TsvReader::open(path)?;
    let rows = reader
        .into_deserialize::<CheckpointRecord>()
        .map(|record| record.and_then(CheckpointRecord::into_row))
        .collect::<Result<Vec<Row>>>()?;
    info!("Read checkpoint {:?} ({} rows)", path, rows.len());
    Ok(RowSet::from_rows(rows)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use synced_core::{FailureKind, FailureReason, PerturbationKind, Span};
    use tempfile::TempDir;

    fn injected_row() -> Row {
        let mut row = Row::pending("r1", "Do not \"touch\".", "Nicht berühren.")
            .with_split(Split::Eval)
            .with_labels("ERR", "SEN", vec![1, 5, 1, 1, 5]);
        row.candidate_translation = "Berühren.".to_string();
        row.status = RowStatus::Injected;
        row.target_category = Some("SEN".to_string());
        row.supplied_dims = Some(vec![1, 5, 1, 1, 5]);
        row.injection_metadata = Some(InjectionRecord {
            category: "SEN".to_string(),
            requested_category: "SEN".to_string(),
            perturbation_kind: PerturbationKind::NegationFlip,
            seed: 42,
            source_span: Some(Span {
                start: 0,
                end: 5,
                text: "Nicht".to_string(),
            }),
            replacement: String::new(),
            confidence: 0.95,
            attempt: 0,
        });
        row
    }

    fn failed_row() -> Row {
        let mut row = Row::pending("r2", "Call\tme.", "Ruf mich an.");
        row.status = RowStatus::Failed;
        row.target_category = Some("NUM".to_string());
        row.failure = Some(
            synced_core::Failure::injection(FailureReason::NoNumericToken).with_detail("no digits"),
        );
        row
    }

    #[test]
    fn test_checkpoint_preserves_rows() {
        let dir = TempDir::new().unwrap();
        let path = Stage::Injected.path_in(dir.path());
        let rows = RowSet::from_rows(vec![injected_row(), failed_row()]).unwrap();

        write_checkpoint(&path, &rows).unwrap();
        let restored = read_checkpoint(&path).unwrap();

        assert_eq!(restored.len(), 2);
        for (a, b) in rows.iter().zip(restored.iter()) {
            assert_eq!(a, b);
        }
        let failed = restored.get(&"r2".into()).unwrap();
        assert_eq!(failed.failure.as_ref().unwrap().kind, FailureKind::InjectionFailure);
    }

    #[test]
    fn test_malformed_scores_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.tsv");
        let rows = RowSet::from_rows(vec![injected_row()]).unwrap();
        write_checkpoint(&path, &rows).unwrap();

        let content = std::fs::read_to_string(&path).unwrap().replace("1,5,1,1,5", "1,x,1,1,5");
        std::fs::write(&path, content).unwrap();

        assert!(matches!(read_checkpoint(&path), Err(Error::InvalidFile(_))));
    }

    #[test]
    fn test_manifest_round_trip_and_matching() {
        let dir = TempDir::new().unwrap();
        assert!(CheckpointManifest::load(dir.path()).unwrap().is_none());

        let manifest = CheckpointManifest {
            last_stage: Stage::Injected,
            schema_version: "synced_ende_v1".to_string(),
            seed: 42,
            input_digest: 7,
            settings_digest: 9,
        };
        manifest.save(dir.path()).unwrap();

        let loaded = CheckpointManifest::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded, manifest);

        let mut later = manifest.clone();
        later.last_stage = Stage::Repaired;
        assert!(manifest.same_run(&later));

        later.seed = 43;
        assert!(!manifest.same_run(&later));
    }
}
