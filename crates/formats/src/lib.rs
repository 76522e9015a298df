//! TSV readers and writers for the SynCED-EnDe pipeline
//!
//! Streaming TSV input (plain or gzip), stage checkpoints, the final
//! dataset files and all-or-nothing emission of a run's outputs.

pub mod checkpoint;
pub mod dataset;
pub mod emit;
pub mod error;
pub mod input;
pub mod record;
pub mod tsv;

pub use checkpoint::{read_checkpoint, write_checkpoint, CheckpointManifest, Stage};
pub use emit::{emit_outputs, write_atomic, OutputPaths};
pub use error::{Error, Result};
pub use input::{
    load_input, read_blocklist, read_eval_reference, read_final_tsv, InputOptions, LoadedInput,
    Rejection,
};
pub use record::Record;
pub use tsv::{file_digest, tsv_writer, TsvReader};
