//! Retention of uploaded receipt files.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

/// Files handled by one purge.
#[derive(Debug, Default)]
pub struct PurgeReport {
    pub removed: Vec<PathBuf>,
    /// Files that were due for removal but could not be removed.
    pub failed: Vec<(PathBuf, String)>,
}

/// Convert a retention window in days to a duration.
///
/// Windows too long to represent saturate, so nothing is ever purged.
pub fn retention_window(days: u64) -> Duration {
    i64::try_from(days)
        .ok()
        .and_then(chrono::Duration::try_days)
        .and_then(|window| window.to_std().ok())
        .unwrap_or(Duration::MAX)
}

/// Remove regular files in `dir` last modified more than `max_age` ago.
///
/// Subdirectories are left alone. Failing to list `dir` is an error;
/// failures on single files are collected in the report.
pub fn purge_stale_files(dir: &Path, max_age: Duration) -> io::Result<PurgeReport> {
    let now = SystemTime::now();
    let mut report = PurgeReport::default();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                report.failed.push((path, e.to_string()));
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        // Files dated in the future count as fresh
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or(Duration::ZERO);
        if age <= max_age {
            continue;
        }

        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("Deleted old file {}", path.display());
                report.removed.push(path);
            }
            Err(e) => {
                warn!("Failed to delete {}: {}", path.display(), e);
                report.failed.push((path, e.to_string()));
            }
        }
    }

    info!(
        "Purged {} file(s) from {} ({} failed)",
        report.removed.len(),
        dir.display(),
        report.failed.len()
    );
    Ok(report)
}

/// Remove an upload. Returns whether a file was removed.
pub fn delete_file(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!("Error deleting {}: {}", path.display(), e);
            false
        }
    }
}
