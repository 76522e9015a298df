//! Error types for text utilities

use thiserror::Error;

/// Text utility errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for text operations
pub type Result<T> = std::result::Result<T, Error>;
