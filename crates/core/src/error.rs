//! Error types for the dataset core
//!
//! Only run-level failures live here. Per-row outcomes (injection failures,
//! repair exhaustion, leakage removals) are recorded on the rows themselves.

use thiserror::Error;

use crate::row::RowStatus;

/// Core pipeline errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Label schema unavailable: {0}")]
    MissingSchema(String),

    #[error("Duplicate row id: {0}")]
    DuplicateIdViolation(String),

    #[error("Row {id} lacks a complete label set: {detail}")]
    IncompleteLabels { id: String, detail: String },

    #[error("Row {id} cannot be {action} while {status}")]
    InvalidTransition {
        id: String,
        action: &'static str,
        status: RowStatus,
    },

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;
