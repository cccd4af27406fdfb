//! CLI commands.

pub mod batch;
pub mod check;
pub mod config;
pub mod process;
pub mod purge;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use receipt_core::{CancelFlag, MediaKind, ReceiptConfig, ReceiptExtraction, ReceiptPipeline};

/// Config file used when `--config` is not given.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("receipt")
        .join("config.json")
}

pub fn resolve_config_path(config_path: Option<&str>) -> PathBuf {
    config_path
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path)
}

/// Load the configuration, falling back to defaults when the default file
/// does not exist. An explicit `--config` path must exist.
pub fn load_config(config_path: Option<&str>) -> anyhow::Result<ReceiptConfig> {
    match config_path {
        Some(path) => ReceiptConfig::from_file(Path::new(path))
            .map_err(|e| anyhow::anyhow!("Failed to load config {}: {}", path, e)),
        None => {
            let path = default_config_path();
            if path.exists() {
                Ok(ReceiptConfig::from_file(&path)?)
            } else {
                debug!("No config at {}, using defaults", path.display());
                Ok(ReceiptConfig::default())
            }
        }
    }
}

/// Media kind of `path`: the declared type if given, else its extension.
pub fn media_kind(path: &Path, media_type: Option<&str>) -> MediaKind {
    match media_type {
        Some(media_type) => MediaKind::from_media_type(media_type),
        None => MediaKind::from_extension(
            path.extension().and_then(|e| e.to_str()).unwrap_or(""),
        ),
    }
}

/// Run the blocking pipeline on a worker thread.
///
/// Ctrl-C or the timeout raise the cancel flag; the run then stops at its
/// next checkpoint and removes its temporary files before this returns.
pub async fn run_pipeline(
    pipeline: Arc<ReceiptPipeline>,
    path: PathBuf,
    kind: MediaKind,
    timeout: Option<Duration>,
) -> anyhow::Result<ReceiptExtraction> {
    let cancel = CancelFlag::new();
    let worker_cancel = cancel.clone();
    let shown = path.display().to_string();

    let mut task =
        tokio::task::spawn_blocking(move || pipeline.process_kind(&path, kind, &worker_cancel));

    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        joined = &mut task => Ok(joined??),
        _ = deadline => {
            warn!("Timed out processing {}", shown);
            cancel.cancel();
            let _ = task.await;
            anyhow::bail!(
                "Processing {} timed out after {}s",
                shown,
                timeout.map(|t| t.as_secs()).unwrap_or_default()
            )
        }
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            let _ = task.await;
            anyhow::bail!("Interrupted while processing {}", shown)
        }
    }
}
