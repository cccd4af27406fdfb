//! Process command - extract receipt data from a single file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use receipt_core::{ReceiptExtraction, ReceiptPipeline};

use super::{load_config, media_kind, run_pipeline};

/// Arguments for the process command.
#[derive(Args)]
pub struct ProcessArgs {
    /// Input file (PDF or image)
    #[arg(required = true)]
    input: PathBuf,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Declared media type, e.g. "image/jpeg" (default: from the extension)
    #[arg(short, long)]
    media_type: Option<String>,

    /// Give up after this many seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Exit with an error when extraction failed
    #[arg(long)]
    strict: bool,

    /// Show which extraction path was used and how long it took
    #[arg(long)]
    show_source: bool,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// CSV output
    Csv,
    /// Plain text summary
    Text,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Text => "txt",
        }
    }
}

pub async fn run(args: ProcessArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();
    let config = load_config(config_path)?;

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }

    let kind = media_kind(&args.input, args.media_type.as_deref());
    info!("Processing file: {} ({:?})", args.input.display(), kind);

    let pipeline = Arc::new(ReceiptPipeline::from_config(&config)?);

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.set_message(format!("Extracting {}", args.input.display()));
    pb.enable_steady_tick(Duration::from_millis(100));

    let outcome = run_pipeline(
        pipeline,
        args.input.clone(),
        kind,
        args.timeout.map(Duration::from_secs),
    )
    .await;
    pb.finish_and_clear();
    let extraction = outcome?;

    if let Some(reason) = &extraction.extraction_error {
        eprintln!(
            "{} Extraction failed: {}. Enter the receipt details manually.",
            style("!").yellow(),
            reason
        );
    }

    let output = format_extraction(&args.input, &extraction, args.format)?;

    if let Some(output_path) = &args.output {
        fs::write(output_path, &output)?;
        println!(
            "{} Output written to {}",
            style("✓").green(),
            output_path.display()
        );
    } else {
        println!("{}", output);
    }

    if args.show_source {
        println!();
        println!("{} Source: {:?}", style("ℹ").blue(), extraction.source);
        println!(
            "{} Processing time: {}ms",
            style("ℹ").blue(),
            extraction.processing_time_ms
        );
    }

    debug!("Total processing time: {:?}", start.elapsed());

    if args.strict && extraction.is_failed() {
        anyhow::bail!("Extraction failed for {}", args.input.display());
    }

    Ok(())
}

pub fn format_extraction(
    path: &Path,
    extraction: &ReceiptExtraction,
    format: OutputFormat,
) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(extraction)?),
        OutputFormat::Csv => format_csv(path, extraction),
        OutputFormat::Text => Ok(format_text(extraction)),
    }
}

fn format_csv(path: &Path, extraction: &ReceiptExtraction) -> anyhow::Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record(["file", "item", "amount"])?;

    let file = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
    for item in &extraction.parsed_data.items {
        wtr.write_record([file, &item.name, &item.amount.to_string()])?;
    }

    let total = extraction
        .parsed_data
        .amount
        .map(|a| a.to_string())
        .unwrap_or_default();
    wtr.write_record([file, "TOTAL", &total])?;

    let data = String::from_utf8(wtr.into_inner()?)?;
    Ok(data)
}

fn format_text(extraction: &ReceiptExtraction) -> String {
    let receipt = &extraction.parsed_data;
    let mut output = String::new();

    output.push_str(&format!(
        "Merchant: {}\n",
        receipt.merchant_name.as_deref().unwrap_or("-")
    ));
    output.push_str(&format!(
        "Date: {}\n",
        receipt
            .date
            .map(|d| d.format("%B %-d, %Y").to_string())
            .unwrap_or_else(|| "-".to_string())
    ));
    output.push_str(&format!(
        "Total: {}\n",
        receipt
            .amount
            .map(|a| format!("${}", a))
            .unwrap_or_else(|| "-".to_string())
    ));

    if !receipt.items.is_empty() {
        output.push_str("\nItems:\n");
        for item in &receipt.items {
            output.push_str(&format!("  {:<40} ${}\n", item.name, item.amount));
        }
    }

    if let Some(reason) = &extraction.extraction_error {
        output.push_str(&format!("\nExtraction failed: {}\n", reason));
    }

    output
}
