//! All-or-nothing output emission
//!
//! Every output is first written to a temp file in the output directory.
//! Only when all of them were written are they renamed into place. A rename
//! that fails part way undoes the renames before it and restores whatever
//! the targets held, so a failed run never leaves a partial set behind.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use synced_core::{Assembly, LabelSchema, RunReport};
use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, info, warn};

use crate::dataset::{write_annotated_tsv, write_final_tsv, write_removed_jsonl};
use crate::{Error, Result};

pub const TRAIN_FILE: &str = "synced_ende_train_silver.tsv";
pub const EVAL_FILE: &str = "synced_ende_eval_gold.tsv";
pub const ANNOTATED_FILE: &str = "judged_quantified_annotated.tsv";
pub const REMOVED_FILE: &str = "leakage_removed.jsonl";
pub const REPORT_FILE: &str = "run_report.json";

/// Final output locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub train: PathBuf,
    pub eval: PathBuf,
    pub annotated: PathBuf,
    pub removed: PathBuf,
    pub report: PathBuf,
}

impl OutputPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            train: dir.join(TRAIN_FILE),
            eval: dir.join(EVAL_FILE),
            annotated: dir.join(ANNOTATED_FILE),
            removed: dir.join(REMOVED_FILE),
            report: dir.join(REPORT_FILE),
        }
    }

    pub fn all(&self) -> [&Path; 5] {
        [&self.train, &self.eval, &self.annotated, &self.removed, &self.report]
    }
}

fn staging_file(dir: &Path) -> Result<NamedTempFile> {
    Ok(tempfile::Builder::new().prefix(".synced-").suffix(".tmp").tempfile_in(dir)?)
}

fn stage<F>(dir: &Path, write: F) -> Result<NamedTempFile>
where
    F: FnOnce(&mut BufWriter<&mut NamedTempFile>) -> Result<()>,
{
    let mut file = staging_file(dir)?;
    {
        let mut sink = BufWriter::new(&mut file);
        write(&mut sink)?;
        sink.flush()?;
    }
    file.as_file().sync_all()?;
    Ok(file)
}

fn persist(file: NamedTempFile, path: &Path) -> Result<()> {
    file.persist(path).map_err(|e| Error::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// A target renamed into place, with the content it replaced.
struct Placed<'p> {
    path: &'p Path,
    backup: Option<TempPath>,
    persisted: bool,
}

/// Move an existing file at `path` aside so it can be restored.
fn back_up(dir: &Path, path: &Path) -> Result<Option<TempPath>> {
    if !path.is_file() {
        return Ok(None);
    }
    let backup = staging_file(dir)?.into_temp_path();
    fs::rename(path, &backup)?;
    Ok(Some(backup))
}

fn roll_back(placed: Vec<Placed<'_>>) {
    for entry in placed.into_iter().rev() {
        if entry.persisted {
            if let Err(e) = fs::remove_file(entry.path) {
                warn!("Failed to remove {:?} during rollback: {}", entry.path, e);
            }
        }
        if let Some(backup) = entry.backup {
            if let Err(e) = backup.persist(entry.path) {
                match e.path.keep() {
                    Ok(kept) => warn!(
                        "Failed to restore {:?} during rollback ({}); previous content kept at {:?}",
                        entry.path, e.error, kept
                    ),
                    Err(lost) => warn!(
                        "Failed to restore {:?} during rollback: {}",
                        entry.path, lost.error
                    ),
                }
            }
        }
    }
}

/// Rename every staged file into place, or none of them.
///
/// Staged files not yet renamed are deleted when dropped; replaced targets
/// are kept aside until the last rename succeeded.
fn commit(dir: &Path, staged: Vec<(NamedTempFile, &Path)>) -> Result<()> {
    let mut placed: Vec<Placed<'_>> = Vec::with_capacity(staged.len());

    for (file, path) in staged {
        let backup = match back_up(dir, path) {
            Ok(backup) => backup,
            Err(e) => {
                roll_back(placed);
                return Err(e);
            }
        };
        placed.push(Placed {
            path,
            backup,
            persisted: false,
        });

        if let Err(e) = persist(file, path) {
            warn!("Rolling back {} output file(s) after {}", placed.len(), e);
            roll_back(placed);
            return Err(e);
        }
        if let Some(entry) = placed.last_mut() {
            entry.persisted = true;
        }
    }

    Ok(())
}

/// Write one file through a temp file in its directory.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<&mut NamedTempFile>) -> Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file = stage(dir, write)?;
    persist(file, path)
}

/// Write the final datasets, the leakage audit and the run report.
///
/// `report.outputs` should already list the paths; the report is written
/// as given.
pub fn emit_outputs(
    output_dir: &Path,
    assembly: &Assembly,
    schema: &LabelSchema,
    report: &RunReport,
) -> Result<OutputPaths> {
    fs::create_dir_all(output_dir)?;
    let paths = OutputPaths::in_dir(output_dir);

    let staged = vec![
        (
            stage(output_dir, |sink| write_final_tsv(sink, &assembly.train_final, schema))?,
            paths.train.as_path(),
        ),
        (
            stage(output_dir, |sink| write_final_tsv(sink, &assembly.eval_final, schema))?,
            paths.eval.as_path(),
        ),
        (
            stage(output_dir, |sink| write_annotated_tsv(sink, assembly, schema))?,
            paths.annotated.as_path(),
        ),
        (
            stage(output_dir, |sink| write_removed_jsonl(sink, &assembly.removed_by_leakage))?,
            paths.removed.as_path(),
        ),
        (
            stage(output_dir, |sink| {
                serde_json::to_writer_pretty(&mut *sink, report)?;
                writeln!(sink)?;
                Ok(())
            })?,
            paths.report.as_path(),
        ),
    ];
    debug!("Staged {} output files in {:?}", staged.len(), output_dir);

    commit(output_dir, staged)?;

    info!(
        "Wrote {} train rows to {:?} and {} eval rows to {:?}",
        assembly.train_final.len(),
        paths.train,
        assembly.eval_final.len(),
        paths.eval
    );
    Ok(paths)
}
