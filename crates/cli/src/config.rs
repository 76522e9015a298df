//! Configuration file support for dataset builds

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use synced_core::hash::hash_string;
use synced_core::LeakageConfig;
use synced_text::screening::ScreeningConfig;

/// Complete pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Input TSV with `rid`, `src_en`, `mt_de`
    pub input: PathBuf,
    /// Frozen evaluation reference in the final TSV layout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_reference: Option<PathBuf>,
    /// Eval rids that must never appear in train, one per line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocklist: Option<PathBuf>,
    /// Label schema document (YAML, TOML or JSON)
    pub schema: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default)]
    pub screening: ScreeningConfig,
    #[serde(default)]
    pub injection: InjectionConfig,
    pub repair: RepairConfig,
    #[serde(default)]
    pub leakage: LeakageConfig,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

/// Injection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InjectionConfig {
    #[serde(default)]
    pub seed: u64,
    /// Target share per category; empty means uniform over the schema
    #[serde(default)]
    pub targets: BTreeMap<String, f64>,
    /// Share of rows sent to eval when the input has no `split` column
    #[serde(default)]
    pub eval_fraction: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_threads: Option<usize>,
}

/// Repair settings. `max_rounds` has no default and must be configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairConfig {
    pub max_rounds: u32,
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub seed: Option<u64>,
    pub max_rounds: Option<u32>,
    pub output_dir: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
}

impl PipelineConfig {
    /// Load configuration from a file (YAML or TOML)
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let mut config: Self = match extension {
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?,
            "toml" => toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?,
            _ => bail!(
                "Unsupported config file format: {}. Use .yaml, .yml, or .toml",
                extension
            ),
        };

        // relative paths are relative to the config file
        if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.input);
        resolve(&mut self.schema);
        resolve(&mut self.output_dir);
        resolve(&mut self.work_dir);
        if let Some(p) = self.eval_reference.as_mut() {
            resolve(p);
        }
        if let Some(p) = self.blocklist.as_mut() {
            resolve(p);
        }
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(seed) = overrides.seed {
            self.injection.seed = seed;
        }
        if let Some(max_rounds) = overrides.max_rounds {
            self.repair.max_rounds = max_rounds;
        }
        if let Some(dir) = overrides.output_dir {
            self.output_dir = dir;
        }
        if let Some(dir) = overrides.work_dir {
            self.work_dir = dir;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.injection.eval_fraction) {
            bail!(
                "injection.eval_fraction must be within [0, 1], got {}",
                self.injection.eval_fraction
            );
        }
        if self.injection.num_threads == Some(0) {
            bail!("injection.num_threads must be at least 1");
        }
        self.screening.validate().context("Invalid screening config")?;
        self.leakage.validate().context("Invalid leakage config")?;
        Ok(())
    }

    /// Digest of everything that shapes the checkpointed stages.
    pub fn settings_digest(&self) -> Result<u64> {
        let settings = serde_json::json!({
            "screening": self.screening,
            "targets": self.injection.targets,
            "eval_fraction": self.injection.eval_fraction,
            "max_rounds": self.repair.max_rounds,
        });
        Ok(hash_string(&serde_json::to_string(&settings)?))
    }
}
