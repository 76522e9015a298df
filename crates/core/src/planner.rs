//! Category planning
//!
//! Decides which category each pending row is injected with. Explicit
//! requests are honoured; everything else is spread over the schema's
//! categories by largest-remainder quotas, walked round-robin over rows
//! ordered by a seed-keyed hash of their id.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::hash::derive_seed;
use crate::row::{RowId, RowSet};
use crate::schema::LabelSchema;
use crate::{Error, Result};

/// Share deviation above which a category counts as imbalanced
pub const DEFAULT_TOLERANCE: f64 = 0.05;

/// What a row asked for in its `target_err` column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryRequest {
    /// No preference
    Any,
    /// Any category with this binary label (e.g. `ERR`)
    Binary(String),
    /// Exactly this category
    Explicit(String),
}

impl CategoryRequest {
    /// Interpret a `target_err` value against the schema.
    ///
    /// Accepts a category name, a multi-class label or a binary value. Anything
    /// else is a schema violation; the row is rejected, never coerced.
    pub fn parse(value: &str, schema: &LabelSchema) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(Self::Any);
        }
        if let Some(category) = schema.category(value) {
            return Ok(Self::Explicit(category.name.clone()));
        }
        if let Some(category) = schema.category_for_multiclass(value) {
            return Ok(Self::Explicit(category.name.clone()));
        }
        if schema.binary_values().iter().any(|b| b == value) {
            return Ok(Self::Binary(value.to_string()));
        }
        Err(Error::SchemaViolation(format!(
            "target_err '{}' is not a category or binary label of schema {}",
            value,
            schema.version()
        )))
    }
}

/// Desired share of each category, normalized, in registry order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDistribution {
    shares: Vec<(String, f64)>,
}

impl TargetDistribution {
    pub fn uniform(schema: &LabelSchema) -> Self {
        let names = schema.categories();
        let share = 1.0 / names.len() as f64;
        Self {
            shares: names.into_iter().map(|n| (n.to_string(), share)).collect(),
        }
    }

    /// Build from configured weights. Unlisted categories get weight zero.
    pub fn from_weights(schema: &LabelSchema, weights: &BTreeMap<String, f64>) -> Result<Self> {
        if weights.is_empty() {
            return Ok(Self::uniform(schema));
        }
        for (name, weight) in weights {
            if schema.category(name).is_none() {
                return Err(Error::InvalidConfig(format!(
                    "target for unknown category '{}'",
                    name
                )));
            }
            if !weight.is_finite() || *weight < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "target for '{}' must be a non-negative number",
                    name
                )));
            }
        }
        let total: f64 = weights.values().sum();
        if total <= 0.0 {
            return Err(Error::InvalidConfig("category targets sum to zero".to_string()));
        }

        Ok(Self {
            shares: schema
                .categories()
                .into_iter()
                .map(|n| (n.to_string(), weights.get(n).copied().unwrap_or(0.0) / total))
                .collect(),
        })
    }

    pub fn share(&self, category: &str) -> f64 {
        self.shares
            .iter()
            .find(|(name, _)| name == category)
            .map(|(_, share)| *share)
            .unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.shares.iter().map(|(n, s)| (n.as_str(), *s))
    }
}

/// Target versus outcome for one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionEntry {
    pub category: String,
    pub target: f64,
    pub assigned: usize,
    pub achieved: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionReport {
    pub entries: Vec<DistributionEntry>,
    pub tolerance: f64,
}

impl DistributionReport {
    pub fn total_achieved(&self) -> usize {
        self.entries.iter().map(|e| e.achieved).sum()
    }

    /// Count final labels of injected and repaired rows per category.
    pub fn record_achieved(&mut self, rows: &RowSet, schema: &LabelSchema) {
        for entry in &mut self.entries {
            entry.achieved = 0;
        }
        for row in rows.iter().filter(|r| r.status.is_labelled()) {
            let category = row
                .label_multiclass
                .as_deref()
                .and_then(|label| schema.category_for_multiclass(label));
            if let Some(category) = category {
                if let Some(entry) = self.entries.iter_mut().find(|e| e.category == category.name) {
                    entry.achieved += 1;
                }
            }
        }
    }

    pub fn achieved_share(&self, entry: &DistributionEntry) -> f64 {
        let total = self.total_achieved();
        if total == 0 {
            0.0
        } else {
            entry.achieved as f64 / total as f64
        }
    }

    /// Categories whose achieved share misses the target by more than the tolerance.
    pub fn imbalances(&self) -> Vec<&DistributionEntry> {
        if self.total_achieved() == 0 {
            return Vec::new();
        }
        self.entries
            .iter()
            .filter(|e| (self.achieved_share(e) - e.target).abs() > self.tolerance)
            .collect()
    }

    /// Warn about imbalanced categories. The plan is never corrected.
    pub fn log_imbalances(&self) {
        for entry in self.imbalances() {
            warn!(
                "Category {} is off target: {:.1}% achieved vs {:.1}% requested ({} rows)",
                entry.category,
                self.achieved_share(entry) * 100.0,
                entry.target * 100.0,
                entry.achieved
            );
        }
    }
}

/// Category chosen for every planned row
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryPlan {
    assignments: BTreeMap<RowId, String>,
    pub report: DistributionReport,
}

impl CategoryPlan {
    pub fn category_for(&self, id: &RowId) -> Option<&str> {
        self.assignments.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RowId, &str)> {
        self.assignments.iter().map(|(id, c)| (id, c.as_str()))
    }
}

pub struct CategoryPlanner<'a> {
    schema: &'a LabelSchema,
    targets: TargetDistribution,
    seed: u64,
    tolerance: f64,
}

impl<'a> CategoryPlanner<'a> {
    pub fn new(schema: &'a LabelSchema, targets: TargetDistribution, seed: u64) -> Self {
        Self {
            schema,
            targets,
            seed,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Assign a category to every requested row.
    pub fn plan(&self, requests: &[(RowId, CategoryRequest)]) -> Result<CategoryPlan> {
        let mut assignments = BTreeMap::new();
        // free rows grouped by pool: None = any category, Some(b) = binary b
        let mut pools: BTreeMap<Option<String>, Vec<&RowId>> = BTreeMap::new();

        for (id, request) in requests {
            match request {
                CategoryRequest::Explicit(name) => {
                    if self.schema.category(name).is_none() {
                        return Err(Error::SchemaViolation(format!(
                            "row {} requests unknown category '{}'",
                            id, name
                        )));
                    }
                    if assignments.insert(id.clone(), name.clone()).is_some() {
                        return Err(Error::DuplicateIdViolation(id.to_string()));
                    }
                }
                CategoryRequest::Binary(binary) => {
                    pools.entry(Some(binary.clone())).or_default().push(id)
                }
                CategoryRequest::Any => pools.entry(None).or_default().push(id),
            }
        }

        for (pool, mut ids) in pools {
            let members: Vec<&str> = self
                .schema
                .category_specs()
                .iter()
                .filter(|c| pool.as_ref().map(|b| &c.binary == b).unwrap_or(true))
                .map(|c| c.name.as_str())
                .collect();
            if members.is_empty() {
                return Err(Error::SchemaViolation(format!(
                    "no category carries binary label {:?}",
                    pool
                )));
            }

            let weights: Vec<f64> = members.iter().map(|m| self.targets.share(m)).collect();
            let mut remaining = largest_remainder(ids.len(), &weights);

            ids.sort_by_key(|id| {
                (
                    derive_seed(&["plan", id.as_str(), &self.seed.to_string()]),
                    (*id).clone(),
                )
            });

            let mut cursor = 0;
            for id in ids {
                while remaining[cursor] == 0 {
                    cursor = (cursor + 1) % members.len();
                }
                remaining[cursor] -= 1;
                if assignments.insert(id.clone(), members[cursor].to_string()).is_some() {
                    return Err(Error::DuplicateIdViolation(id.to_string()));
                }
                cursor = (cursor + 1) % members.len();
            }
        }

        let entries = self
            .targets
            .iter()
            .map(|(name, target)| DistributionEntry {
                category: name.to_string(),
                target,
                assigned: assignments.values().filter(|c| c.as_str() == name).count(),
                achieved: 0,
            })
            .collect();

        info!(
            "Planned categories for {} rows (seed {})",
            assignments.len(),
            self.seed
        );

        Ok(CategoryPlan {
            assignments,
            report: DistributionReport {
                entries,
                tolerance: self.tolerance,
            },
        })
    }
}

/// Split `n` into integer quotas proportional to `weights`.
///
/// Uniform when all weights are zero. Remainders go to the largest
/// fractional parts, ties to the earlier index.
fn largest_remainder(n: usize, weights: &[f64]) -> Vec<usize> {
    let total: f64 = weights.iter().sum();
    let weights: Vec<f64> = if total > 0.0 {
        weights.iter().map(|w| w / total).collect()
    } else {
        vec![1.0 / weights.len() as f64; weights.len()]
    };

    let exact: Vec<f64> = weights.iter().map(|w| w * n as f64).collect();
    let mut quotas: Vec<usize> = exact.iter().map(|e| e.floor() as usize).collect();
    let assigned: usize = quotas.iter().sum();
    let leftover = n.saturating_sub(assigned);

    let mut order: Vec<usize> = (0..weights.len()).collect();
    order.sort_by(|&a, &b| {
        let fa = exact[a] - exact[a].floor();
        let fb = exact[b] - exact[b].floor();
        fb.total_cmp(&fa).then(a.cmp(&b))
    });
    for &idx in order.iter().cycle().take(leftover) {
        quotas[idx] += 1;
    }
    quotas
}
