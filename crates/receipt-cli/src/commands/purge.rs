//! Purge command - remove uploads past the retention window.

use std::path::PathBuf;

use clap::Args;
use console::style;

use receipt_core::storage::{delete_file, purge_stale_files, retention_window};

use super::load_config;

/// Arguments for the purge command.
#[derive(Args)]
pub struct PurgeArgs {
    /// Upload directory (default: retention.upload_dir)
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Maximum age in days (default: retention.max_age_days)
    #[arg(long)]
    max_age_days: Option<u64>,

    /// Remove these uploads now instead of purging by age
    #[arg(long = "file", value_name = "PATH")]
    files: Vec<PathBuf>,
}

pub async fn run(args: PurgeArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    if !args.files.is_empty() {
        return remove_uploads(&args.files);
    }

    let dir = args.dir.unwrap_or(config.retention.upload_dir);
    let days = args.max_age_days.unwrap_or(config.retention.max_age_days);

    if !dir.is_dir() {
        anyhow::bail!("Upload directory not found: {}", dir.display());
    }

    let report = purge_stale_files(&dir, retention_window(days))?;

    for path in &report.removed {
        println!("  {} {}", style("-").dim(), path.display());
    }
    println!(
        "{} Removed {} file(s) older than {} days from {}",
        style("✓").green(),
        report.removed.len(),
        days,
        dir.display()
    );

    if !report.failed.is_empty() {
        println!("{}", style("Could not remove:").red());
        for (path, reason) in &report.failed {
            println!("  - {}: {}", path.display(), reason);
        }
        anyhow::bail!("{} file(s) could not be removed", report.failed.len());
    }

    Ok(())
}

fn remove_uploads(files: &[PathBuf]) -> anyhow::Result<()> {
    let mut removed = 0;
    for path in files {
        if delete_file(path) {
            println!("  {} {}", style("-").dim(), path.display());
            removed += 1;
        } else {
            println!("  {} {} (not removed)", style("!").yellow(), path.display());
        }
    }

    println!("{} Removed {} of {} file(s)", style("✓").green(), removed, files.len());
    Ok(())
}
