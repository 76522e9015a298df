//! Staged build orchestration
//!
//! load -> inject -> repair -> assemble -> emit. The injected and repaired
//! row sets are checkpointed in the work directory together with a manifest
//! identifying the run, so `--resume` can pick up after the last completed
//! stage.

use anyhow::{Context, Result};
use std::path::Path;
use synced_core::{
    scan_failures, Assembler, Assembly, CategoryPlan, CategoryPlanner, FailureKind,
    InjectionEngine, InjectionStats, LabelSchema, RepairOutcome, RepairPass, RowSet, RowStatus,
    RunReport, TargetDistribution,
};
use synced_formats::{
    emit_outputs, file_digest, load_input, read_blocklist, read_checkpoint, read_eval_reference,
    write_checkpoint, CheckpointManifest, InputOptions, LoadedInput, OutputPaths, Stage,
};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::progress::StageProgress;

/// Load the schema named by the config. A missing document is fatal.
pub fn load_schema(path: Option<&Path>) -> Result<LabelSchema> {
    match path {
        Some(path) => LabelSchema::load(path)
            .with_context(|| format!("Failed to load label schema: {}", path.display())),
        None => LabelSchema::builtin().context("Failed to load built-in label schema"),
    }
}

/// Plan a category for every loaded row.
pub fn plan_stage(
    loaded: &LoadedInput,
    schema: &LabelSchema,
    config: &PipelineConfig,
) -> Result<CategoryPlan> {
    let targets = if config.injection.targets.is_empty() {
        TargetDistribution::uniform(schema)
    } else {
        TargetDistribution::from_weights(schema, &config.injection.targets)?
    };
    Ok(CategoryPlanner::new(schema, targets, config.injection.seed).plan(&loaded.requests)?)
}

/// Inject every pending row with its planned category.
pub fn inject_stage(
    rows: &RowSet,
    plan: &CategoryPlan,
    schema: &LabelSchema,
    seed: u64,
) -> Result<(RowSet, InjectionStats)> {
    let engine = InjectionEngine::new(schema);
    Ok(engine.inject_batch(rows, plan, seed)?)
}

/// Mark broken injections as failed, then run the repair rounds.
pub fn repair_stage(
    rows: &RowSet,
    schema: &LabelSchema,
    seed: u64,
    max_rounds: u32,
) -> Result<RepairOutcome> {
    let engine = InjectionEngine::new(schema);
    let scanned = scan_failures(rows, schema)?;
    Ok(RepairPass::new(&engine, seed, max_rounds).repair(&scanned)?)
}

/// Partition into the final splits behind the leakage guard.
pub fn assemble_stage(
    rows: &RowSet,
    schema: &LabelSchema,
    config: &PipelineConfig,
) -> Result<Assembly> {
    let eval_reference = match &config.eval_reference {
        Some(path) => read_eval_reference(path, schema)
            .with_context(|| format!("Failed to read eval reference: {}", path.display()))?,
        None => Vec::new(),
    };
    let blocklist = match &config.blocklist {
        Some(path) => read_blocklist(path)
            .with_context(|| format!("Failed to read blocklist: {}", path.display()))?,
        None => Vec::new(),
    };

    let assembler = Assembler::new(schema, config.leakage.clone());
    Ok(assembler.assemble(rows, &eval_reference, &blocklist, schema.version())?)
}

/// Injection counts recovered from a checkpoint.
fn injection_stats_from(rows: &RowSet) -> InjectionStats {
    let mut stats = InjectionStats {
        attempted: rows.len(),
        ..Default::default()
    };
    for row in rows {
        match row.status {
            RowStatus::Injected => stats.injected += 1,
            RowStatus::Pending => stats.skipped += 1,
            _ => stats.failed += 1,
        }
    }
    stats
}

/// Repair counts recovered from a repaired checkpoint.
fn repair_outcome_from(rows: RowSet) -> RepairOutcome {
    let repaired = rows.iter().filter(|r| r.status == RowStatus::Repaired).count();
    let exhausted = rows
        .iter()
        .filter(|r| r.failure.as_ref().map(|f| f.kind) == Some(FailureKind::RepairExhausted))
        .count();
    let rounds_run = rows
        .iter()
        .filter_map(|r| r.injection_metadata.as_ref())
        .map(|m| m.attempt)
        .max()
        .unwrap_or(0);
    RepairOutcome {
        rows,
        rounds_run,
        repaired,
        exhausted,
    }
}

/// Run the whole build described by `config`.
pub fn run_build(config: &PipelineConfig, resume: bool, progress: &StageProgress) -> Result<RunReport> {
    config.validate()?;
    let schema = load_schema(Some(&config.schema))?;
    let seed = config.injection.seed;
    let mut report = RunReport::new(schema.version(), seed);

    progress.stage("Loading input");
    let options = InputOptions {
        schema: &schema,
        screening: &config.screening,
        seed,
        eval_fraction: config.injection.eval_fraction,
    };
    let loaded = load_input(&config.input, &options)
        .with_context(|| format!("Failed to load input: {}", config.input.display()))?;
    report.record_screening(loaded.rows.len(), &loaded.rejection_counts());

    let manifest = CheckpointManifest {
        last_stage: Stage::Injected,
        schema_version: schema.version().to_string(),
        seed,
        input_digest: file_digest(&config.input)?,
        settings_digest: config.settings_digest()?,
    };
    let resume_from = if resume {
        resumable_stage(&config.work_dir, &manifest)?
    } else {
        None
    };

    let plan = plan_stage(&loaded, &schema, config)?;

    let outcome = match resume_from {
        Some(Stage::Repaired) => {
            info!("Resuming from the repaired checkpoint");
            let rows = read_checkpoint(&Stage::Repaired.path_in(&config.work_dir))?;
            report.record_injection(&injection_stats_from(&rows));
            repair_outcome_from(rows)
        }
        resumed => {
            let injected = if resumed == Some(Stage::Injected) {
                info!("Resuming from the injected checkpoint");
                let rows = read_checkpoint(&Stage::Injected.path_in(&config.work_dir))?;
                report.record_injection(&injection_stats_from(&rows));
                rows
            } else {
                progress.stage("Injecting errors");
                let (rows, stats) = inject_stage(&loaded.rows, &plan, &schema, seed)?;
                report.record_injection(&stats);
                checkpoint(config, &rows, &manifest, Stage::Injected)?;
                rows
            };

            progress.stage("Repairing failed injections");
            let outcome = repair_stage(&injected, &schema, seed, config.repair.max_rounds)?;
            checkpoint(config, &outcome.rows, &manifest, Stage::Repaired)?;
            outcome
        }
    };
    report.record_repair(&outcome);
    report.record_statuses(&outcome.rows);

    let mut distribution = plan.report;
    distribution.record_achieved(&outcome.rows, &schema);
    distribution.log_imbalances();
    report.distribution = Some(distribution);

    progress.stage("Assembling splits");
    let assembly = assemble_stage(&outcome.rows, &schema, config)?;
    report.record_assembly(&assembly);

    progress.stage("Writing outputs");
    report.outputs = OutputPaths::in_dir(&config.output_dir)
        .all()
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    emit_outputs(&config.output_dir, &assembly, &schema, &report).with_context(|| {
        format!("Failed to write outputs to {}", config.output_dir.display())
    })?;

    Ok(report)
}

fn resumable_stage(work_dir: &Path, expected: &CheckpointManifest) -> Result<Option<Stage>> {
    match CheckpointManifest::load(work_dir)? {
        Some(found) if found.same_run(expected) => {
            let path = found.last_stage.path_in(work_dir);
            if path.exists() {
                Ok(Some(found.last_stage))
            } else {
                warn!("Checkpoint {:?} is missing; starting over", path);
                Ok(None)
            }
        }
        Some(_) => {
            warn!("Checkpoint in {:?} belongs to a different run; starting over", work_dir);
            Ok(None)
        }
        None => {
            info!("No checkpoint in {:?}; starting from the input", work_dir);
            Ok(None)
        }
    }
}

fn checkpoint(
    config: &PipelineConfig,
    rows: &RowSet,
    manifest: &CheckpointManifest,
    stage: Stage,
) -> Result<()> {
    std::fs::create_dir_all(&config.work_dir)
        .with_context(|| format!("Failed to create work dir: {}", config.work_dir.display()))?;
    write_checkpoint(&stage.path_in(&config.work_dir), rows)?;
    CheckpointManifest {
        last_stage: stage,
        ..manifest.clone()
    }
    .save(&config.work_dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InjectionConfig, RepairConfig};
    use std::path::PathBuf;
    use synced_formats::emit::{EVAL_FILE, TRAIN_FILE};
    use tempfile::TempDir;

    const INPUT: &str = "rid\tsrc_en\tmt_de\ttarget_err\n\
        r1\tDo not touch the wire.\tBerühren Sie das Kabel nicht.\tSEN\n\
        r2\tTake 2 tablets daily.\tNehmen Sie täglich 2 Tabletten.\tNUM\n\
        r3\tThe train to Berlin leaves at 9.\tDer Zug nach Berlin fährt um 9 Uhr ab.\tNAM\n\
        r4\tThe museum opens on Monday.\tDas Museum öffnet am Montag.\tNOT\n\
        r5\tYou must always wear gloves.\tSie müssen unbedingt Handschuhe tragen.\tSAF\n";

    fn config(dir: &TempDir) -> PipelineConfig {
        let input = dir.path().join("input.tsv");
        std::fs::write(&input, INPUT).unwrap();
        PipelineConfig {
            input,
            eval_reference: None,
            blocklist: None,
            schema: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/../../schema/synced_ende_v1.yaml")),
            output_dir: dir.path().join("out"),
            work_dir: dir.path().join("work"),
            screening: Default::default(),
            injection: InjectionConfig {
                seed: 42,
                ..Default::default()
            },
            repair: RepairConfig { max_rounds: 2 },
            leakage: Default::default(),
        }
    }

    #[test]
    fn test_build_writes_outputs_and_checkpoints() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);

        let report = run_build(&config, false, &StageProgress::new(false)).unwrap();
        assert_eq!(report.input_rows, 5);
        assert_eq!(report.train_rows + report.excluded_total(), 5);
        assert!(config.output_dir.join(TRAIN_FILE).exists());
        assert!(config.output_dir.join(EVAL_FILE).exists());
        assert!(Stage::Repaired.path_in(&config.work_dir).exists());

        let manifest = CheckpointManifest::load(&config.work_dir).unwrap().unwrap();
        assert_eq!(manifest.last_stage, Stage::Repaired);
        assert_eq!(manifest.seed, 42);
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        run_build(&config(&a), false, &StageProgress::new(false)).unwrap();
        run_build(&config(&b), false, &StageProgress::new(false)).unwrap();

        let train = |dir: &TempDir| {
            std::fs::read_to_string(dir.path().join("out").join(TRAIN_FILE)).unwrap()
        };
        assert_eq!(train(&a), train(&b));
    }

    #[test]
    fn test_resume_matches_fresh_run() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let fresh = run_build(&config, false, &StageProgress::new(false)).unwrap();
        let train = std::fs::read_to_string(config.output_dir.join(TRAIN_FILE)).unwrap();

        let resumed = run_build(&config, true, &StageProgress::new(false)).unwrap();
        assert_eq!(resumed.train_rows, fresh.train_rows);
        assert_eq!(resumed.repaired, fresh.repaired);
        assert_eq!(
            std::fs::read_to_string(config.output_dir.join(TRAIN_FILE)).unwrap(),
            train
        );
    }

    #[test]
    fn test_resume_ignores_checkpoint_of_other_seed() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        run_build(&config, false, &StageProgress::new(false)).unwrap();

        let mut reseeded = config.clone();
        reseeded.injection.seed = 7;
        let manifest = CheckpointManifest {
            last_stage: Stage::Injected,
            schema_version: "synced_ende_v1".to_string(),
            seed: 7,
            input_digest: file_digest(&reseeded.input).unwrap(),
            settings_digest: reseeded.settings_digest().unwrap(),
        };
        assert_eq!(resumable_stage(&reseeded.work_dir, &manifest).unwrap(), None);
    }

    #[test]
    fn test_missing_schema_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.schema = dir.path().join("nope.yaml");
        assert!(run_build(&config, false, &StageProgress::new(false)).is_err());
        assert!(!config.output_dir.join(TRAIN_FILE).exists());
    }

    #[test]
    fn test_recovered_counts() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let fresh = run_build(&config, false, &StageProgress::new(false)).unwrap();

        let rows = read_checkpoint(&Stage::Repaired.path_in(&config.work_dir)).unwrap();
        let outcome = repair_outcome_from(rows);
        assert_eq!(outcome.repaired, fresh.repaired);
        assert_eq!(outcome.exhausted, fresh.repair_exhausted);
    }
}
