//! Run report
//!
//! Counts gathered across stages, serialized to `run_report.json` and
//! printed as the end-of-run summary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::assemble::Assembly;
use crate::inject::InjectionStats;
use crate::planner::DistributionReport;
use crate::repair::RepairOutcome;
use crate::row::{RowSet, RowStatus};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub schema_version: String,
    pub seed: u64,
    pub input_rows: usize,
    /// Rejected at load, keyed by rejection reason
    pub screened_out: BTreeMap<String, usize>,
    pub injected: usize,
    pub injection_failures: usize,
    pub repair_rounds: u32,
    pub repaired: usize,
    pub repair_exhausted: usize,
    pub removed_by_leakage: usize,
    pub near_duplicates: usize,
    /// Every exclusion at assembly, keyed by reason
    pub excluded: BTreeMap<String, usize>,
    pub train_rows: usize,
    pub eval_rows: usize,
    pub frozen_eval_rows: usize,
    pub distribution: Option<DistributionReport>,
    /// Final status of every processed row
    pub status_counts: BTreeMap<String, usize>,
    pub outputs: Vec<String>,
}

impl RunReport {
    pub fn new(schema_version: impl Into<String>, seed: u64) -> Self {
        Self {
            schema_version: schema_version.into(),
            seed,
            ..Default::default()
        }
    }

    pub fn record_screening(&mut self, accepted: usize, rejected: &BTreeMap<String, usize>) {
        self.screened_out = rejected.clone();
        self.input_rows = accepted + rejected.values().sum::<usize>();
    }

    pub fn record_injection(&mut self, stats: &InjectionStats) {
        self.injected = stats.injected;
        self.injection_failures = stats.failed;
    }

    pub fn record_repair(&mut self, outcome: &RepairOutcome) {
        self.repair_rounds = outcome.rounds_run;
        self.repaired = outcome.repaired;
        self.repair_exhausted = outcome.exhausted;
    }

    pub fn record_statuses(&mut self, rows: &RowSet) {
        self.status_counts = rows
            .count_by_status()
            .into_iter()
            .map(|(status, count): (RowStatus, usize)| (status.as_str().to_string(), count))
            .collect();
    }

    pub fn record_assembly(&mut self, assembly: &Assembly) {
        self.removed_by_leakage = assembly.removed_by_leakage.len();
        self.near_duplicates = assembly.leakage_stats.near_duplicates;
        self.excluded = assembly.excluded_counts();
        self.train_rows = assembly.train_final.len();
        self.eval_rows = assembly.eval_final.len();
        self.frozen_eval_rows = assembly.frozen_eval_rows;
    }

    pub fn excluded_total(&self) -> usize {
        self.excluded.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Row;

    #[test]
    fn test_screening_counts() {
        let mut report = RunReport::new("v1", 3);
        let mut rejected = BTreeMap::new();
        rejected.insert("too_long".to_string(), 2);
        report.record_screening(10, &rejected);
        assert_eq!(report.input_rows, 12);
    }

    #[test]
    fn test_status_counts_and_json() {
        let mut report = RunReport::new("v1", 3);
        let rows = RowSet::from_rows(vec![Row::pending("a", "x", "y")]).unwrap();
        report.record_statuses(&rows);
        assert_eq!(report.status_counts.get("PENDING"), Some(&1));

        let json = serde_json::to_string(&report).unwrap();
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
