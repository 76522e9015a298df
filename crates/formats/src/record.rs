//! Header-addressed TSV record

use csv::StringRecord;
use std::sync::Arc;

/// Column names shared by every TSV the pipeline reads or writes
pub mod columns {
    pub const RID: &str = "rid";
    pub const SOURCE: &str = "src_en";
    pub const TRANSLATION: &str = "mt_de";
    pub const REFERENCE: &str = "reference_de";
    pub const TARGET: &str = "target_err";
    pub const MULTICLASS: &str = "multiclass_label";
    pub const SPLIT: &str = "split";
    pub const SCHEMA_VERSION: &str = "schema_version";
}

/// A single data row from a TSV file
#[derive(Debug, Clone)]
pub struct Record {
    headers: Arc<Vec<String>>,
    values: StringRecord,
    /// 1-based line number in the source file
    pub source_line: u64,
}

impl Record {
    pub fn new(headers: Arc<Vec<String>>, values: StringRecord, source_line: u64) -> Self {
        Self {
            headers,
            values,
            source_line,
        }
    }

    /// Field value by column name. Short rows yield `None` for trailing columns.
    pub fn get(&self, column: &str) -> Option<&str> {
        let idx = self.headers.iter().position(|h| h == column)?;
        self.values.get(idx)
    }

    /// Field value with surrounding whitespace removed; empty fields are `None`.
    pub fn get_trimmed(&self, column: &str) -> Option<&str> {
        self.get(column).map(str::trim).filter(|v| !v.is_empty())
    }

    /// Field value or an empty string.
    pub fn text(&self, column: &str) -> &str {
        self.get(column).unwrap_or("")
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.headers.iter().any(|h| h == column)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
