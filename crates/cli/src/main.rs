//! synced CLI
//!
//! Builds the SynCED-EnDe critical error detection dataset from clean
//! English-German sentence pairs.

mod config;
mod pipeline;
mod progress;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::{Path, PathBuf};
use synced_core::{LeakageConfig, LeakageGuard};
use synced_formats::dataset::{write_final_tsv, write_removed_jsonl};
use synced_formats::{
    load_input, read_blocklist, read_checkpoint, read_final_tsv, write_atomic, write_checkpoint,
    InputOptions,
};
use synced_text::screening::ScreeningConfig;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use config::{Overrides, PipelineConfig};
use progress::StageProgress;

#[derive(Parser)]
#[command(name = "synced")]
#[command(version, about = "SynCED-EnDe critical error detection dataset builder", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output the run report in JSON format
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: inject, repair, guard and assemble
    Build {
        /// Pipeline config file (YAML or TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Continue from the last checkpoint of a matching run
        #[arg(long)]
        resume: bool,

        /// Override the injection seed
        #[arg(long)]
        seed: Option<u64>,

        /// Override the number of repair rounds
        #[arg(long)]
        max_rounds: Option<u32>,

        /// Override the output directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Override the checkpoint directory
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },

    /// Inject errors into an input TSV and write the injected checkpoint
    Inject {
        /// Input TSV with rid, src_en and mt_de columns
        #[arg(short, long)]
        input: PathBuf,

        /// Checkpoint TSV to write
        #[arg(short, long)]
        output: PathBuf,

        /// Label schema document (defaults to the built-in taxonomy)
        #[arg(short, long)]
        schema: Option<PathBuf>,

        #[arg(long, default_value = "0")]
        seed: u64,

        /// Share of rows sent to eval when the input has no split column
        #[arg(long, default_value = "0.0")]
        eval_fraction: f64,
    },

    /// Retry failed injections in a checkpoint TSV
    Repair {
        /// Injected checkpoint TSV
        #[arg(short, long)]
        input: PathBuf,

        /// Repaired checkpoint TSV to write
        #[arg(short, long)]
        output: PathBuf,

        /// Number of repair rounds
        #[arg(long)]
        max_rounds: u32,

        /// Label schema document (defaults to the built-in taxonomy)
        #[arg(short, long)]
        schema: Option<PathBuf>,

        /// Seed the rows were injected with
        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// Remove training rows that leak into an eval set
    Guard {
        /// Training TSV in the final layout
        #[arg(short, long)]
        train: PathBuf,

        /// Eval TSV in the final layout
        #[arg(short, long)]
        eval: PathBuf,

        /// Clean training TSV to write
        #[arg(short, long)]
        output: PathBuf,

        /// File of eval rids, one per line
        #[arg(short, long)]
        blocklist: Option<PathBuf>,

        /// Near-duplicate similarity threshold (0.0-1.0)
        #[arg(long, default_value = "0.6")]
        threshold: f64,

        /// LSH number of bands
        #[arg(long, default_value = "64")]
        bands: usize,

        /// LSH rows per band
        #[arg(long, default_value = "2")]
        rows_per_band: usize,

        /// Label schema document (defaults to the built-in taxonomy)
        #[arg(short, long)]
        schema: Option<PathBuf>,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_ansi(!cli.json) // Disable colors if JSON output
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Build {
            config,
            resume,
            seed,
            max_rounds,
            output_dir,
            work_dir,
        } => {
            let overrides = Overrides {
                seed,
                max_rounds,
                output_dir,
                work_dir,
            };
            build(config, overrides, resume, cli.json).await?;
        }
        Commands::Inject {
            input,
            output,
            schema,
            seed,
            eval_fraction,
        } => {
            inject(input, output, schema, seed, eval_fraction, cli.json).await?;
        }
        Commands::Repair {
            input,
            output,
            max_rounds,
            schema,
            seed,
        } => {
            repair(input, output, max_rounds, schema, seed, cli.json).await?;
        }
        Commands::Guard {
            train,
            eval,
            output,
            blocklist,
            threshold,
            bands,
            rows_per_band,
            schema,
        } => {
            let leakage = LeakageConfig {
                threshold,
                num_hashes: bands * rows_per_band,
                num_bands: bands,
                rows_per_band,
                ..Default::default()
            };
            guard(train, eval, output, blocklist, leakage, schema, cli.json).await?;
        }
        Commands::Completions { shell } => {
            generate_completions(shell);
        }
    }

    Ok(())
}

async fn build(config_path: PathBuf, overrides: Overrides, resume: bool, json_output: bool) -> Result<()> {
    let config = PipelineConfig::load(&config_path)?.with_overrides(overrides);

    info!("Starting dataset build");
    info!("  Config: {:?}", config_path);
    info!("  Input: {:?}", config.input);
    info!("  Schema: {:?}", config.schema);
    info!("  Output dir: {:?}", config.output_dir);
    info!("  Seed: {}", config.injection.seed);
    info!("  Repair rounds: {}", config.repair.max_rounds);

    if let Some(threads) = config.injection.num_threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to configure worker threads")?;
    }

    let progress = StageProgress::new(!json_output);
    let report = pipeline::run_build(&config, resume, &progress)?;
    progress.finish();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        progress::print_summary_report(&config.input, &report);
    }

    Ok(())
}

async fn inject(
    input: PathBuf,
    output: PathBuf,
    schema_path: Option<PathBuf>,
    seed: u64,
    eval_fraction: f64,
    json_output: bool,
) -> Result<()> {
    let schema = pipeline::load_schema(schema_path.as_deref())?;
    let screening = ScreeningConfig::default();

    info!("Injecting errors");
    info!("  Input: {:?}", input);
    info!("  Output: {:?}", output);
    info!("  Schema: {}", schema.version());

    let options = InputOptions {
        schema: &schema,
        screening: &screening,
        seed,
        eval_fraction,
    };
    let loaded = load_input(&input, &options)
        .with_context(|| format!("Failed to load input: {}", input.display()))?;

    let targets = synced_core::TargetDistribution::uniform(&schema);
    let plan = synced_core::CategoryPlanner::new(&schema, targets, seed).plan(&loaded.requests)?;
    let (rows, stats) = pipeline::inject_stage(&loaded.rows, &plan, &schema, seed)?;
    write_checkpoint(&output, &rows)
        .with_context(|| format!("Failed to write checkpoint: {}", output.display()))?;

    if json_output {
        let report = serde_json::json!({
            "input": input.to_string_lossy().to_string(),
            "output": output.to_string_lossy().to_string(),
            "rows": rows.len(),
            "screened_out": loaded.rejection_counts(),
            "injected": stats.injected,
            "failed": stats.failed,
            "failure_rate": stats.failure_rate(),
            "distribution": plan.report,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Injected {} of {} rows ({} failed) -> {}",
            stats.injected,
            stats.attempted,
            stats.failed,
            output.display()
        );
    }

    Ok(())
}

async fn repair(
    input: PathBuf,
    output: PathBuf,
    max_rounds: u32,
    schema_path: Option<PathBuf>,
    seed: u64,
    json_output: bool,
) -> Result<()> {
    let schema = pipeline::load_schema(schema_path.as_deref())?;

    info!("Repairing failed injections");
    info!("  Input: {:?}", input);
    info!("  Output: {:?}", output);
    info!("  Max rounds: {}", max_rounds);

    let rows = read_checkpoint(&input)
        .with_context(|| format!("Failed to read checkpoint: {}", input.display()))?;
    let outcome = pipeline::repair_stage(&rows, &schema, seed, max_rounds)?;
    write_checkpoint(&output, &outcome.rows)
        .with_context(|| format!("Failed to write checkpoint: {}", output.display()))?;

    if json_output {
        let report = serde_json::json!({
            "input": input.to_string_lossy().to_string(),
            "output": output.to_string_lossy().to_string(),
            "rows": outcome.rows.len(),
            "rounds_run": outcome.rounds_run,
            "repaired": outcome.repaired,
            "exhausted": outcome.exhausted,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Repaired {} rows in {} round(s); {} exhausted -> {}",
            outcome.repaired,
            outcome.rounds_run,
            outcome.exhausted,
            output.display()
        );
    }

    Ok(())
}

/// Derive the companion "removed records" path from the clean output path.
///
/// Examples:
///   train.tsv       → train.removed.jsonl
///   out/train.tsv   → out/train.removed.jsonl
fn removed_path(output: &Path) -> PathBuf {
    let stem = output.file_stem().unwrap_or_default().to_string_lossy();
    let parent = output.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("{}.removed.jsonl", stem))
}

async fn guard(
    train: PathBuf,
    eval: PathBuf,
    output: PathBuf,
    blocklist: Option<PathBuf>,
    leakage: LeakageConfig,
    schema_path: Option<PathBuf>,
    json_output: bool,
) -> Result<()> {
    let schema = pipeline::load_schema(schema_path.as_deref())?;
    let removed_output = removed_path(&output);

    info!("Starting leakage guard");
    info!("  Train: {:?}", train);
    info!("  Eval: {:?}", eval);
    info!("  Threshold: {}", leakage.threshold);
    info!("  LSH: {} bands × {} rows per band", leakage.num_bands, leakage.rows_per_band);

    let train_rows = read_final_tsv(&train, &schema)
        .with_context(|| format!("Failed to read train file: {}", train.display()))?;
    let eval_rows = read_final_tsv(&eval, &schema)
        .with_context(|| format!("Failed to read eval file: {}", eval.display()))?;
    let blocked = match &blocklist {
        Some(path) => read_blocklist(path)
            .with_context(|| format!("Failed to read blocklist: {}", path.display()))?,
        None => Vec::new(),
    };

    let guard = LeakageGuard::build(&eval_rows, blocked, leakage)?;
    let (clean, removed, stats) = guard.filter(train_rows);

    write_atomic(&removed_output, |sink| write_removed_jsonl(sink, &removed))
        .with_context(|| format!("Failed to write removed records: {}", removed_output.display()))?;
    write_atomic(&output, |sink| write_final_tsv(sink, &clean, &schema))
        .with_context(|| format!("Failed to write clean train file: {}", output.display()))?;

    if json_output {
        let report = serde_json::json!({
            "train": train.to_string_lossy().to_string(),
            "eval": eval.to_string_lossy().to_string(),
            "output": output.to_string_lossy().to_string(),
            "removed_output": removed_output.to_string_lossy().to_string(),
            "candidates_checked": stats.candidates_checked,
            "removed": stats.removed,
            "near_duplicates": stats.near_duplicates,
            "removal_rate": stats.removal_rate(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Kept {} of {} training rows -> {}",
            clean.len(),
            stats.candidates_checked,
            output.display()
        );
        println!("  Removed records: {:?} ({} rows)", removed_output, removed.len());
    }

    Ok(())
}

fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removed_path() {
        assert_eq!(
            removed_path(Path::new("out/train.tsv")),
            PathBuf::from("out/train.removed.jsonl")
        );
        assert_eq!(removed_path(Path::new("train.tsv")), PathBuf::from("train.removed.jsonl"));
    }

    #[test]
    fn test_cli_parses_repair_requires_rounds() {
        assert!(Cli::try_parse_from(["synced", "repair", "-i", "a.tsv", "-o", "b.tsv"]).is_err());
        assert!(Cli::try_parse_from([
            "synced", "repair", "-i", "a.tsv", "-o", "b.tsv", "--max-rounds", "2"
        ])
        .is_ok());
    }

    fn write_final(path: &Path, rows: &[synced_core::Row], schema: &synced_core::LabelSchema) {
        let file = std::fs::File::create(path).unwrap();
        write_final_tsv(std::io::BufWriter::new(file), rows, schema).unwrap();
    }

    #[tokio::test]
    async fn test_guard_writes_clean_train_and_audit() {
        let dir = tempfile::TempDir::new().unwrap();
        let schema = synced_core::LabelSchema::builtin().unwrap();
        let dims = vec![2, 4, 1, 1, 4];

        let eval = vec![synced_core::Row::frozen_eval(
            "E1",
            "The bridge is closed.",
            "Die Brücke ist geschlossen.",
        )
        .with_labels("ERR", "NUM", dims.clone())];
        let train = vec![
            synced_core::Row::frozen_eval("T9", "The bridge is closed.", "Die Brücke ist geschlossen.")
                .with_labels("ERR", "NUM", dims.clone()),
            synced_core::Row::frozen_eval("T1", "Take 2 tablets daily.", "Nehmen Sie täglich 3 Tabletten.")
                .with_labels("ERR", "NUM", dims),
        ];

        let train_path = dir.path().join("train.tsv");
        let eval_path = dir.path().join("eval.tsv");
        let output = dir.path().join("clean.tsv");
        write_final(&train_path, &train, &schema);
        write_final(&eval_path, &eval, &schema);
        std::fs::write(&output, "stale").unwrap();

        guard(
            train_path,
            eval_path,
            output.clone(),
            None,
            LeakageConfig::default(),
            None,
            true,
        )
        .await
        .unwrap();

        let clean = std::fs::read_to_string(&output).unwrap();
        assert_eq!(clean.lines().count(), 2);
        assert!(clean.contains("T1\t"));
        assert!(!clean.contains("T9\t"));

        let removed = std::fs::read_to_string(removed_path(&output)).unwrap();
        assert_eq!(removed.lines().count(), 1);
        assert!(removed.contains("\"E1\""));

        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_guard_failure_keeps_previous_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("clean.tsv");
        std::fs::write(&output, "previous").unwrap();

        let result = guard(
            dir.path().join("missing_train.tsv"),
            dir.path().join("missing_eval.tsv"),
            output.clone(),
            None,
            LeakageConfig::default(),
            None,
            true,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "previous");
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
