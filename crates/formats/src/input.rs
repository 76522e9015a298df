//! Input, frozen-eval and blocklist loaders

use std::collections::BTreeMap;
use std::path::Path;
use synced_core::{CategoryRequest, LabelSchema, Row, RowId, RowSet, Split};
use synced_text::screening::{screen, ScreeningConfig};
use tracing::{debug, info, warn};

use crate::record::columns;
use crate::{Error, Record, Result, TsvReader};

/// Settings that shape how input rows are read
#[derive(Debug, Clone)]
pub struct InputOptions<'a> {
    pub schema: &'a LabelSchema,
    pub screening: &'a ScreeningConfig,
    pub seed: u64,
    /// Share of rows sent to eval when the file has no `split` column
    pub eval_fraction: f64,
}

/// An input line that never became a row
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub rid: String,
    pub line: u64,
    pub reason: String,
    pub detail: String,
}

/// Rows accepted from the input file and their category requests
#[derive(Debug)]
pub struct LoadedInput {
    pub rows: RowSet,
    /// In input order
    pub requests: Vec<(RowId, CategoryRequest)>,
    pub rejected: Vec<Rejection>,
}

impl LoadedInput {
    /// Rejections counted by reason key
    pub fn rejection_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for rejection in &self.rejected {
            *counts.entry(rejection.reason.clone()).or_insert(0) += 1;
        }
        counts
    }
}

/// Load the input TSV into pending rows.
///
/// Requires `rid`, `src_en` and `mt_de`. When a `reference_de` column is
/// present and non-empty it is used as the clean reference; otherwise
/// `mt_de` is. A repeated rid is fatal.
pub fn load_input(path: &Path, options: &InputOptions<'_>) -> Result<LoadedInput> {
    let reader = TsvReader::open(path)?;
    reader.require_columns(&[columns::RID, columns::SOURCE, columns::TRANSLATION])?;

    let dims: Vec<String> = options.schema.dimension_names().map(str::to_string).collect();
    let has_split = reader.has_column(columns::SPLIT);
    let has_dims = dims.iter().all(|d| reader.has_column(d));

    let mut rows = Vec::new();
    let mut requests = Vec::new();
    let mut rejected = Vec::new();

    for record in reader {
        let record = record?;
        match parse_input_record(&record, options, &dims, has_split, has_dims) {
            Ok((row, request)) => {
                requests.push((row.id().clone(), request));
                rows.push(row);
            }
            Err(rejection) => {
                debug!(
                    "Rejected input line {} (rid '{}'): {}",
                    rejection.line, rejection.rid, rejection.detail
                );
                rejected.push(rejection);
            }
        }
    }

    if !rejected.is_empty() {
        warn!("{} input rows rejected at load", rejected.len());
    }
    info!("Loaded {} input rows from {:?}", rows.len(), path);

    Ok(LoadedInput {
        rows: RowSet::from_rows(rows)?,
        requests,
        rejected,
    })
}

fn parse_input_record(
    record: &Record,
    options: &InputOptions<'_>,
    dims: &[String],
    has_split: bool,
    has_dims: bool,
) -> std::result::Result<(Row, CategoryRequest), Rejection> {
    let rid = record.text(columns::RID).trim();
    let source = record.text(columns::SOURCE);
    let translation = record.text(columns::TRANSLATION);
    let reference = record
        .get_trimmed(columns::REFERENCE)
        .map(|_| record.text(columns::REFERENCE))
        .unwrap_or(translation);

    let reject = |reason: &str, detail: String| Rejection {
        rid: rid.to_string(),
        line: record.source_line,
        reason: reason.to_string(),
        detail,
    };

    screen(rid, source, reference, options.screening)
        .map_err(|r| reject(r.as_str(), r.to_string()))?;

    let request = CategoryRequest::parse(record.text(columns::TARGET), options.schema)
        .map_err(|e| reject("invalid_target", e.to_string()))?;

    let split = match record.get_trimmed(columns::SPLIT).filter(|_| has_split) {
        Some(value) => Split::parse(value)
            .ok_or_else(|| reject("invalid_split", format!("unknown split '{}'", value)))?,
        None => Split::assign(&RowId::from(rid), options.seed, options.eval_fraction),
    };

    let mut row = Row::pending(rid, source.trim(), reference.trim()).with_split(split);

    if has_dims {
        let raw: Vec<Option<&str>> = dims.iter().map(|d| record.get_trimmed(d)).collect();
        if raw.iter().all(Option::is_some) {
            let scores = raw
                .iter()
                .zip(dims)
                .map(|(value, name)| {
                    let value = value.unwrap_or_default();
                    value
                        .parse::<u8>()
                        .map_err(|_| reject("invalid_scores", format!("{}='{}'", name, value)))
                })
                .collect::<std::result::Result<Vec<u8>, Rejection>>()?;
            row.supplied_dims = Some(scores);
        }
    }

    Ok((row, request))
}

/// Load the frozen evaluation reference.
///
/// Labels are taken as they are; the assembler decides whether they satisfy
/// the active schema.
pub fn read_eval_reference(path: &Path, schema: &LabelSchema) -> Result<Vec<Row>> {
    let rows = read_final_tsv(path, schema)?;
    info!("Loaded {} frozen eval rows from {:?}", rows.len(), path);
    Ok(rows)
}

/// Read rows written in the final split layout.
pub fn read_final_tsv(path: &Path, schema: &LabelSchema) -> Result<Vec<Row>> {
    let reader = TsvReader::open(path)?;
    reader.require_columns(&[columns::RID, columns::SOURCE, columns::TRANSLATION])?;

    let dims: Vec<String> = schema.dimension_names().map(str::to_string).collect();
    let mut rows = Vec::new();

    for record in reader {
        let record = record?;
        let rid = record.text(columns::RID).trim();
        if rid.is_empty() {
            return Err(Error::InvalidFile(format!(
                "{:?} line {}: row without rid",
                path, record.source_line
            )));
        }

        let mut row = Row::frozen_eval(
            rid,
            record.text(columns::SOURCE).trim(),
            record.text(columns::TRANSLATION).trim(),
        );
        row.label_binary = record.get_trimmed(columns::TARGET).map(str::to_string);
        row.label_multiclass = record.get_trimmed(columns::MULTICLASS).map(str::to_string);
        row.label_dims = parse_scores(&record, &dims).ok_or_else(|| {
            Error::InvalidFile(format!(
                "{:?} line {}: row {} has non-numeric dimension scores",
                path, record.source_line, rid
            ))
        })?;
        row.schema_version = record.get_trimmed(columns::SCHEMA_VERSION).map(str::to_string);
        rows.push(row);
    }

    Ok(rows)
}

/// Scores for every present dimension column, in schema order. Absent or
/// empty columns are skipped so incomplete rows surface as label errors later.
fn parse_scores(record: &Record, dims: &[String]) -> Option<Vec<u8>> {
    dims.iter()
        .filter_map(|d| record.get_trimmed(d))
        .map(|v| v.parse::<u8>().ok())
        .collect()
}

/// Read a blocklist of eval rids, one per line. Blank lines and `#` comments
/// are skipped.
pub fn read_blocklist(path: &Path) -> Result<Vec<RowId>> {
    let content = std::fs::read_to_string(path)?;
    let ids: Vec<RowId> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(RowId::from)
        .collect();
    info!("Loaded {} blocklisted rids from {:?}", ids.len(), path);
    Ok(ids)
}
