//! Streaming TSV reader and writer
//!
//! Tab-separated files with a header row, read record by record with
//! automatic gzip decompression for `.gz` paths.

use crate::{Error, Record, Result};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use flate2::read::GzDecoder;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Streaming TSV reader yielding header-addressed records
pub struct TsvReader {
    reader: csv::Reader<Box<dyn Read>>,
    headers: Arc<Vec<String>>,
    path: PathBuf,
    records_read: usize,
    total_bytes: Option<u64>,
}

impl TsvReader {
    /// Open a TSV file, auto-detecting gzip compression
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let total_bytes = file.metadata()?.len();

        match path.extension().and_then(|e| e.to_str()) {
            Some("gz") => {
                debug!("Opening gzip-compressed TSV file: {:?}", path);
                let reader: Box<dyn Read> = Box::new(GzDecoder::new(file));
                Self::from_reader(reader, path, None)
            }
            _ => {
                debug!("Opening plain TSV file: {:?}", path);
                let reader: Box<dyn Read> = Box::new(file);
                Self::from_reader(reader, path, Some(total_bytes))
            }
        }
    }

    /// Wrap any reader; `path` is only used in error messages.
    pub fn from_reader(
        reader: Box<dyn Read>,
        path: impl Into<PathBuf>,
        total_bytes: Option<u64>,
    ) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();

        Ok(Self {
            reader,
            headers: Arc::new(headers),
            path: path.into(),
            records_read: 0,
            total_bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.headers.iter().any(|h| h == column)
    }

    /// Fail with [`Error::MissingColumn`] for the first absent column.
    pub fn require_columns(&self, columns: &[&str]) -> Result<()> {
        for column in columns {
            if !self.has_column(column) {
                return Err(Error::MissingColumn {
                    path: self.path.clone(),
                    column: column.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Deserialize the remaining records by header name.
    pub fn into_deserialize<T: DeserializeOwned>(self) -> impl Iterator<Item = Result<T>> {
        self.reader.into_deserialize().map(|r| r.map_err(Error::from))
    }

    /// Get the number of records read
    pub fn records_processed(&self) -> usize {
        self.records_read
    }

    /// Get the number of bytes consumed from the (decompressed) stream
    pub fn bytes_processed(&self) -> u64 {
        self.reader.position().byte()
    }

    /// Get total file size if known
    pub fn total_bytes(&self) -> Option<u64> {
        self.total_bytes
    }
}

impl Iterator for TsvReader {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut values = StringRecord::new();
        loop {
            match self.reader.read_record(&mut values) {
                Ok(false) => return None,
                Ok(true) => {
                    // blank lines come back as a single empty field
                    if values.iter().all(|v| v.trim().is_empty()) {
                        continue;
                    }
                    self.records_read += 1;
                    let line = values.position().map(|p| p.line()).unwrap_or(0);
                    return Some(Ok(Record::new(self.headers.clone(), values, line)));
                }
                Err(e) => return Some(Err(Error::Csv(e))),
            }
        }
    }
}

/// TSV writer over any sink
pub fn tsv_writer<W: Write>(sink: W) -> csv::Writer<W> {
    WriterBuilder::new().delimiter(b'\t').from_writer(sink)
}

/// Content digest of a file, used to match checkpoints to their input.
pub fn file_digest<P: AsRef<Path>>(path: P) -> Result<u64> {
    let bytes = std::fs::read(path)?;
    Ok(seahash::hash(&bytes))
}
