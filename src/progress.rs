//! Progress reporting for the extraction
//!
//! Provides real-time progress display using indicatif progress bars.

use crate::extract::{ExtractionReport, JobProgress};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress reporter that displays job status
#[derive(Clone)]
pub struct ProgressReporter {
    /// Progress bar
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .expect("Invalid progress template")
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, progress: &JobProgress) {
        let msg = format!(
            "{} | Rows: {} | Rate: {:.0}/s | Partitions: {}/{} | Queued: {}",
            progress.state,
            format_number(progress.rows_written),
            progress.rows_per_second(),
            progress.partitions_done,
            progress.partitions_total,
            progress.queued_batches,
        );

        self.bar.set_message(msg);
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a summary of a finished extraction
pub fn print_summary(report: &ExtractionReport) {
    println!();
    println!("{}", style("Extraction Complete").green().bold());
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Table:").bold(), report.table);
    println!(
        "  {} {}",
        style("Key:").bold(),
        report.key_column.as_deref().unwrap_or("none (single scan)")
    );
    println!("  {} {}", style("Rows:").bold(), format_number(report.rows));
    println!("  {} {}", style("Partitions:").bold(), report.partitions.len());
    println!(
        "  {} {:.1}s ({:.0} rows/sec)",
        style("Duration:").bold(),
        report.duration_secs,
        report.rows_per_second
    );
    println!(
        "  {} {} ({})",
        style("Output:").bold(),
        report.output_path.display(),
        format_size(report.bytes, BINARY)
    );
    if report.backpressure_events > 0 {
        println!(
            "  {} {} pushes waited on a full queue",
            style("Backpressure:").yellow().bold(),
            format_number(report.backpressure_events)
        );
    }
    println!(
        "  {} {}",
        style("Consistency:").dim(),
        report.consistency
    );
    println!();
}

/// Print a header at the start of the extraction
pub fn print_header(database: &str, table: &str, parallelism: usize, output: &str) {
    println!();
    println!(
        "{} {}",
        style("peregrine").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Source:").bold(), database);
    println!("  {} {}", style("Table:").bold(), table);
    println!("  {} {}", style("Workers:").bold(), parallelism);
    println!("  {} {}", style("Output:").bold(), output);
    println!();
}
