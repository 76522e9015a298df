//! Progress reporting and the end-of-run summary

use std::path::Path;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use synced_core::RunReport;

/// Spinner shown while a pipeline stage runs
pub struct StageProgress {
    bar: ProgressBar,
    started: Instant,
}

impl StageProgress {
    /// A visible spinner, or a hidden one when output must stay machine-readable.
    pub fn new(visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("[{elapsed_precise}] {spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        Self {
            bar,
            started: Instant::now(),
        }
    }

    pub fn stage(&self, name: &str) {
        self.bar.set_message(format!("{}...", name));
    }

    pub fn finish(&self) {
        self.bar
            .finish_with_message(format!("Complete in {:.1}s", self.started.elapsed().as_secs_f64()));
    }
}

/// Print a formatted summary report
pub fn print_summary_report(input: &Path, report: &RunReport) {
    println!("\n{}", "═".repeat(60));
    println!("SynCED-EnDe Build Complete ({})", report.schema_version);
    println!("{}", "═".repeat(60));
    println!("Input:              {}", input.display());
    println!("Seed:               {}", report.seed);
    println!("Input rows:         {}", format_with_commas(report.input_rows));

    for (reason, count) in &report.screened_out {
        println!("  screened out:     {} ({})", format_with_commas(*count), reason);
    }

    println!("Injected:           {}", format_with_commas(report.injected));
    if report.injection_failures > 0 {
        println!(
            "Injection failures: {} ({:.1}%)",
            format_with_commas(report.injection_failures),
            percent(report.injection_failures, report.injected + report.injection_failures)
        );
    }
    println!(
        "Repaired:           {} in {} round(s), {} exhausted",
        format_with_commas(report.repaired),
        report.repair_rounds,
        format_with_commas(report.repair_exhausted)
    );

    if report.removed_by_leakage > 0 {
        println!(
            "Leakage removed:    {} ({} near-duplicates)",
            format_with_commas(report.removed_by_leakage),
            format_with_commas(report.near_duplicates)
        );
    }
    for (reason, count) in &report.excluded {
        println!("  excluded:         {} ({})", format_with_commas(*count), reason);
    }

    if let Some(distribution) = &report.distribution {
        println!("{}", "─".repeat(60));
        println!("{:<10} {:>8} {:>10} {:>10}", "Category", "Target", "Assigned", "Achieved");
        for entry in &distribution.entries {
            println!(
                "{:<10} {:>7.1}% {:>10} {:>10}",
                entry.category,
                entry.target * 100.0,
                entry.assigned,
                entry.achieved
            );
        }
    }

    println!("{}", "─".repeat(60));
    println!(
        "Train:              {}",
        format_with_commas(report.train_rows)
    );
    println!(
        "Eval:               {} ({} frozen)",
        format_with_commas(report.eval_rows),
        format_with_commas(report.frozen_eval_rows)
    );
    for output in &report.outputs {
        println!("Output:             {}", output);
    }
    println!("{}", "═".repeat(60));
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64) * 100.0
    }
}

/// Format number with thousand separators
fn format_with_commas(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_with_commas() {
        assert_eq!(format_with_commas(1234), "1,234");
        assert_eq!(format_with_commas(1234567), "1,234,567");
        assert_eq!(format_with_commas(42), "42");
        assert_eq!(format_with_commas(100), "100");
    }

    #[test]
    fn test_percent_handles_zero() {
        assert_eq!(percent(3, 0), 0.0);
        assert_eq!(percent(1, 4), 25.0);
    }

    #[test]
    fn test_hidden_progress_finishes() {
        let progress = StageProgress::new(false);
        progress.stage("Injecting");
        progress.finish();
    }
}
