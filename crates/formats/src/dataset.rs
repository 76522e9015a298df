//! Final dataset writers
//!
//! The two split files share one layout; the annotated file adds the
//! provenance of every processed row, including excluded ones.

use serde_json::json;
use std::io::Write;
use synced_core::{Assembly, LabelSchema, RemovedRow, Row};

use crate::record::columns;
use crate::tsv::tsv_writer;
use crate::Result;

const ANNOTATION_COLUMNS: &[&str] = &[
    columns::REFERENCE,
    "status",
    columns::SPLIT,
    "category",
    "perturbation",
    "seed",
    "span_start",
    "span_end",
    "span_text",
    "confidence",
    "exclusion",
];

/// Header of the train and eval files
pub fn final_header(schema: &LabelSchema) -> Vec<String> {
    let mut header: Vec<String> = [columns::RID, columns::SOURCE, columns::TRANSLATION, columns::TARGET, columns::MULTICLASS]
        .iter()
        .map(|c| c.to_string())
        .collect();
    header.extend(schema.dimension_names().map(str::to_string));
    header.push(columns::SCHEMA_VERSION.to_string());
    header
}

fn final_fields(row: &Row, default_version: &str) -> Vec<String> {
    let mut fields = vec![
        row.id().to_string(),
        row.source_text.clone(),
        row.candidate_translation.clone(),
        row.label_binary.clone().unwrap_or_default(),
        row.label_multiclass.clone().unwrap_or_default(),
    ];
    fields.extend(row.label_dims.iter().map(u8::to_string));
    fields.push(
        row.schema_version
            .clone()
            .unwrap_or_else(|| default_version.to_string()),
    );
    fields
}

/// Write rows in the final split layout.
pub fn write_final_tsv<W: Write>(sink: W, rows: &[Row], schema: &LabelSchema) -> Result<()> {
    let mut writer = tsv_writer(sink);
    writer.write_record(final_header(schema))?;
    for row in rows {
        writer.write_record(final_fields(row, schema.version()))?;
    }
    writer.flush()?;
    Ok(())
}

fn annotated_fields(row: &Row, exclusion: &str, schema: &LabelSchema) -> Vec<String> {
    let mut fields = final_fields(row, schema.version());
    // dims may be missing on failed rows; pad so columns line up
    let dims = schema.dimensions().len();
    if row.label_dims.len() < dims {
        let at = fields.len() - 1;
        for _ in row.label_dims.len()..dims {
            fields.insert(at, String::new());
        }
    }

    let injection = row.injection_metadata.as_ref();
    let span = injection.and_then(|i| i.source_span.as_ref());
    let split = row
        .assignment
        .map(|a| a.as_str())
        .unwrap_or_else(|| row.intended_split.as_str());

    fields.extend([
        row.reference_translation.clone(),
        row.status.as_str().to_string(),
        split.to_string(),
        injection
            .map(|i| i.category.clone())
            .or_else(|| row.target_category.clone())
            .unwrap_or_default(),
        injection.map(|i| i.perturbation_kind.to_string()).unwrap_or_default(),
        injection.map(|i| i.seed.to_string()).unwrap_or_default(),
        span.map(|s| s.start.to_string()).unwrap_or_default(),
        span.map(|s| s.end.to_string()).unwrap_or_default(),
        span.map(|s| s.text.clone()).unwrap_or_default(),
        injection.map(|i| format!("{:.2}", i.confidence)).unwrap_or_default(),
        exclusion.to_string(),
    ]);
    fields
}

/// Write every processed row with its judge scores and injection provenance.
pub fn write_annotated_tsv<W: Write>(sink: W, assembly: &Assembly, schema: &LabelSchema) -> Result<()> {
    let mut writer = tsv_writer(sink);
    let mut header = final_header(schema);
    header.extend(ANNOTATION_COLUMNS.iter().map(|c| c.to_string()));
    writer.write_record(&header)?;

    for row in assembly.train_final.iter().chain(&assembly.eval_final) {
        writer.write_record(annotated_fields(row, "", schema))?;
    }
    for excluded in &assembly.excluded {
        let reason = excluded.reason.to_string();
        writer.write_record(annotated_fields(&excluded.row, &reason, schema))?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the leakage audit log, one JSON object per removed row.
pub fn write_removed_jsonl<W: Write>(mut sink: W, removed: &[RemovedRow]) -> Result<()> {
    for entry in removed {
        let line = json!({
            "rid": entry.row.id(),
            "src_en": entry.row.source_text,
            "mt_de": entry.row.candidate_translation,
            "matched_eval_id": entry.matched.eval_id,
            "match_kind": entry.matched.kind,
            "similarity": entry.matched.similarity,
        });
        writeln!(sink, "{}", line)?;
    }
    sink.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TsvReader;
    use synced_core::{LeakageMatch, MatchKind, RowStatus};

    fn final_row(id: &str) -> Row {
        let mut row = Row::pending(id, "Take 2 tablets.", "Nehmen Sie 2 Tabletten.")
            .with_labels("ERR", "NUM", vec![2, 4, 1, 1, 4]);
        row.candidate_translation = "Nehmen Sie 3 Tabletten.".to_string();
        row.status = RowStatus::Final;
        row.schema_version = Some("synced_ende_v1".to_string());
        row
    }

    fn read_back(bytes: Vec<u8>) -> Vec<crate::Record> {
        let cursor = std::io::Cursor::new(bytes);
        TsvReader::from_reader(Box::new(cursor), "out.tsv", None)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_final_header() {
        let schema = LabelSchema::builtin().unwrap();
        let header = final_header(&schema);
        assert_eq!(&header[..5], &["rid", "src_en", "mt_de", "target_err", "multiclass_label"]);
        assert_eq!(header.len(), 5 + 5 + 1);
        assert_eq!(header.last().map(String::as_str), Some("schema_version"));
    }

    #[test]
    fn test_write_final_tsv() {
        let schema = LabelSchema::builtin().unwrap();
        let mut out = Vec::new();
        write_final_tsv(&mut out, &[final_row("r1")], &schema).unwrap();

        let records = read_back(out);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("mt_de"), Some("Nehmen Sie 3 Tabletten."));
        assert_eq!(records[0].get("target_err"), Some("ERR"));
        assert_eq!(records[0].get("error_severity"), Some("4"));
        assert_eq!(records[0].get("schema_version"), Some("synced_ende_v1"));
    }

    #[test]
    fn test_removed_jsonl() {
        let removed = vec![RemovedRow {
            row: final_row("t9"),
            matched: LeakageMatch {
                eval_id: "e1".into(),
                kind: MatchKind::NearDuplicate,
                similarity: 0.81,
            },
        }];
        let mut out = Vec::new();
        write_removed_jsonl(&mut out, &removed).unwrap();

        let text = String::from_utf8(out).unwrap();
        let value: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(value["rid"], "t9");
        assert_eq!(value["matched_eval_id"], "e1");
        assert_eq!(value["similarity"], 0.81);
    }
}
