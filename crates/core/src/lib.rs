//! Core of the SynCED-EnDe dataset builder
//!
//! Turns clean English-German sentence pairs into labelled critical-error
//! examples: category planning, deterministic error injection, repair of
//! failed injections, and leakage-safe assembly of the train and eval splits.

pub mod assemble;
pub mod error;
pub mod hash;
pub mod inject;
pub mod leakage;
pub mod minhash;
pub mod perturb;
pub mod planner;
pub mod quantify;
pub mod repair;
pub mod report;
pub mod row;
pub mod schema;

pub use assemble::{Assembler, Assembly, Excluded, ExclusionReason};
pub use error::{Error, Result};
pub use inject::{InjectionEngine, InjectionStats};
pub use leakage::{filter_leakage, LeakageConfig, LeakageGuard, LeakageMatch, MatchKind, RemovedRow};
pub use planner::{CategoryPlan, CategoryPlanner, CategoryRequest, DistributionReport, TargetDistribution};
pub use repair::{scan_failures, RepairOutcome, RepairPass};
pub use report::RunReport;
pub use row::{
    Failure, FailureKind, FailureReason, InjectionRecord, Row, RowId, RowSet, RowStatus, Span,
    Split, SplitAssignment,
};
pub use schema::{Category, LabelDimension, LabelSchema, LabelValue, PerturbationKind};
