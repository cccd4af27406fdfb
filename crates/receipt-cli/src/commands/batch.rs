//! Batch processing command for multiple receipt files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Args;
use console::style;
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{debug, error, warn};

use receipt_core::{ExtractionSource, MediaKind, ReceiptExtraction, ReceiptPipeline};

use super::process::{format_extraction, OutputFormat};
use super::{load_config, run_pipeline};

/// Arguments for the batch command.
#[derive(Args)]
pub struct BatchArgs {
    /// Glob pattern of input files
    #[arg(required = true)]
    input: String,

    /// Output directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Output format for each file
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Also generate a summary CSV
    #[arg(long)]
    summary: bool,

    /// Per-file timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Continue when a file cannot be processed at all (unreadable, timed out)
    #[arg(long)]
    continue_on_error: bool,
}

/// Outcome of one file.
struct FileResult {
    path: PathBuf,
    extraction: Option<ReceiptExtraction>,
    error: Option<String>,
    processing_time_ms: u64,
}

impl FileResult {
    /// Hard failure or soft extraction error, whichever is set.
    fn error(&self) -> Option<&str> {
        self.error.as_deref().or_else(|| {
            self.extraction
                .as_ref()
                .and_then(|e| e.extraction_error.as_deref())
        })
    }
}

pub async fn run(args: BatchArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();
    let config = load_config(config_path)?;

    let files: Vec<PathBuf> = glob(&args.input)?
        .filter_map(|r| r.ok())
        .filter(|p| {
            let ext = p.extension().and_then(|e| e.to_str()).unwrap_or("");
            !matches!(MediaKind::from_extension(ext), MediaKind::Unsupported(_))
        })
        .collect();

    if files.is_empty() {
        anyhow::bail!("No matching files found for pattern: {}", args.input);
    }

    println!(
        "{} Found {} files to process",
        style("ℹ").blue(),
        files.len()
    );

    if let Some(ref output_dir) = args.output_dir {
        fs::create_dir_all(output_dir)?;
    }

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files")?
            .progress_chars("=>-"),
    );

    let pipeline = Arc::new(ReceiptPipeline::from_config(&config)?);
    let timeout = args.timeout.map(Duration::from_secs);
    let mut results = Vec::with_capacity(files.len());

    for path in files {
        let file_start = Instant::now();
        let kind = super::media_kind(&path, None);
        let outcome = run_pipeline(pipeline.clone(), path.clone(), kind, timeout).await;
        let processing_time_ms = file_start.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(extraction) => FileResult {
                path,
                extraction: Some(extraction),
                error: None,
                processing_time_ms,
            },
            Err(e) => FileResult {
                path,
                extraction: None,
                error: Some(e.to_string()),
                processing_time_ms,
            },
        };

        if let Some(message) = &result.error {
            if args.continue_on_error {
                warn!("Failed to process {}: {}", result.path.display(), message);
            } else {
                error!("Failed to process {}: {}", result.path.display(), message);
                pb.abandon();
                anyhow::bail!("Processing {} failed: {}", result.path.display(), message);
            }
        } else if let Some(message) = result.error() {
            warn!("Extraction failed for {}: {}", result.path.display(), message);
        }

        if let (Some(extraction), Some(output_dir)) = (&result.extraction, &args.output_dir) {
            write_output(output_dir, &result.path, extraction, args.format)?;
        }

        results.push(result);
        pb.inc(1);
    }

    pb.finish_with_message("Complete");

    if args.summary {
        let summary_path = args
            .output_dir
            .as_ref()
            .map(|d| d.join("summary.csv"))
            .unwrap_or_else(|| PathBuf::from("summary.csv"));

        write_summary(&summary_path, &results)?;
        println!(
            "{} Summary written to {}",
            style("✓").green(),
            summary_path.display()
        );
    }

    let failed: Vec<_> = results.iter().filter(|r| r.error().is_some()).collect();

    println!();
    println!(
        "{} Processed {} files in {:?}",
        style("✓").green(),
        results.len(),
        start.elapsed()
    );
    println!(
        "   {} successful, {} failed",
        style(results.len() - failed.len()).green(),
        style(failed.len()).red()
    );

    if !failed.is_empty() {
        println!();
        println!("{}", style("Failed files:").red());
        for result in &failed {
            println!(
                "  - {}: {}",
                result.path.display(),
                result.error().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}

fn write_output(
    output_dir: &Path,
    path: &Path,
    extraction: &ReceiptExtraction,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("receipt");
    let output_path = output_dir.join(format!("{}.{}", name, format.extension()));

    fs::write(&output_path, format_extraction(path, extraction, format)?)?;
    debug!("Wrote output to {}", output_path.display());
    Ok(())
}

/// One line of the summary CSV.
#[derive(Serialize)]
struct SummaryRow<'a> {
    filename: &'a str,
    status: &'a str,
    merchant: Option<&'a str>,
    date: Option<String>,
    amount: Option<String>,
    items: usize,
    source: Option<ExtractionSource>,
    processing_time_ms: u64,
    error: &'a str,
}

fn write_summary(path: &Path, results: &[FileResult]) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    for result in results {
        let receipt = result.extraction.as_ref().map(|e| &e.parsed_data);
        let row = SummaryRow {
            filename: result.path.file_name().and_then(|s| s.to_str()).unwrap_or(""),
            status: if result.error().is_some() { "error" } else { "success" },
            merchant: receipt.and_then(|r| r.merchant_name.as_deref()),
            date: receipt.and_then(|r| r.date).map(|d| d.to_string()),
            amount: receipt.and_then(|r| r.amount).map(|a| a.to_string()),
            items: receipt.map(|r| r.items.len()).unwrap_or(0),
            source: result.extraction.as_ref().map(|e| e.source),
            processing_time_ms: result.processing_time_ms,
            error: result.error().unwrap_or(""),
        };
        wtr.serialize(row)?;
    }

    wtr.flush()?;
    Ok(())
}
