//! Text utilities for the SynCED-EnDe dataset builder
//!
//! This crate provides the normalization used by duplicate signatures,
//! span-preserving tokenization of German translations, the German
//! perturbation lexicon, and input row screening.

pub mod error;
pub mod lexicon;
pub mod screening;
pub mod text_preprocessing;
pub mod tokenize;

pub use error::{Error, Result};
pub use text_preprocessing::TextNormalizer;
pub use tokenize::{tokenize, Token};
