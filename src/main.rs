//! peregrine - Parallel Table-to-Parquet Extractor
//!
//! Entry point for the CLI application.
//!
//! Exit status: 0 on success, 1 when the job fails, 2 for invalid
//! configuration, 130 when interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use peregrine::config::{CliArgs, ExtractConfig};
use peregrine::error::{ConfigError, ExtractError};
use peregrine::extract::{ExtractionCoordinator, ExtractionReport};
use peregrine::progress::{print_header, print_summary, ProgressReporter};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Exit status for configuration errors
const EXIT_CONFIG: u8 = 2;

/// Exit status after Ctrl-C
const EXIT_INTERRUPTED: i32 = 130;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            if e.downcast_ref::<ConfigError>().is_some() {
                ExitCode::from(EXIT_CONFIG)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run() -> Result<ExitCode> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    let report_path = args.report.clone();
    let config = ExtractConfig::from_args(args).context("Invalid configuration")?;

    if config.show_progress {
        print_header(
            &config.database,
            &config.table,
            config.parallelism,
            &config.output_path().display().to_string(),
        );
    }

    let mut coordinator = ExtractionCoordinator::new(config.clone());

    // Ctrl-C ends the process; segments stay for diagnosis
    let abort = coordinator.abort_flag();
    let scratch = config.scratch_path();
    ctrlc::set_handler(move || {
        abort.store(true, Ordering::SeqCst);
        eprintln!(
            "\nInterrupt received, temporary segments left in {}",
            scratch.display()
        );
        std::process::exit(EXIT_INTERRUPTED);
    })
    .context("Failed to set signal handler")?;

    let progress = if config.show_progress {
        Some(ProgressReporter::new())
    } else {
        None
    };

    if let Some(ref p) = progress {
        p.set_status("Probing table...");
        let reporter = p.clone();
        coordinator = coordinator.on_progress(move |snapshot| reporter.update(snapshot));
    }

    match coordinator.run() {
        Ok(report) => {
            if let Some(ref p) = progress {
                p.finish("Extraction completed");
                print_summary(&report);
            }
            if let Some(ref path) = report_path {
                write_report(&report, path)?;
                info!(path = %path.display(), "Report written");
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            if let Some(ref p) = progress {
                p.finish("Extraction failed");
            }
            eprintln!("Error: {}", failure);
            if matches!(failure.error, ExtractError::Config(_)) {
                Ok(ExitCode::from(EXIT_CONFIG))
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

fn write_report(report: &ExtractionReport, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create report {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), report).context("Failed to write report")?;
    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("peregrine=debug,warn")
    } else {
        EnvFilter::new("peregrine=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
