//! Tesseract command-line backend.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use tracing::{debug, info};

use crate::error::OcrError;
use crate::models::config::OcrSettings;

use super::{expand_whitelist, OcrBackend, OcrConfig, OcrResult};

/// Runs the `tesseract` executable and reads its TSV output.
#[derive(Debug, Clone)]
pub struct TesseractBackend {
    binary: PathBuf,
    language: String,
}

impl TesseractBackend {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            language: "eng".to_string(),
        }
    }

    pub fn from_settings(settings: &OcrSettings) -> Self {
        Self {
            binary: settings.tesseract_path.clone(),
            language: settings.language.clone(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Whether the executable can be started.
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn command(&self, image: &Path, config: &OcrConfig) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("--psm")
            .arg(config.page_seg_mode.psm().to_string());

        if let Some(whitelist) = &config.char_whitelist {
            command
                .arg("-c")
                .arg(format!("tessedit_char_whitelist={}", expand_whitelist(whitelist)));
        }

        command.arg("tsv");
        command
    }
}

impl Default for TesseractBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrBackend for TesseractBackend {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, image: &Path, config: &OcrConfig) -> Result<OcrResult, OcrError> {
        let start = Instant::now();
        debug!("Running tesseract on {} ({})", image.display(), config.name);

        let output = self.command(image, config).output().map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                OcrError::EngineUnavailable(format!("{} not found", self.binary.display()))
            } else {
                OcrError::Recognition(format!("failed to start tesseract: {}", e))
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Recognition(format!(
                "tesseract failed: {}",
                stderr.trim()
            )));
        }

        let (text, confidence) = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        let processing_time_ms = start.elapsed().as_millis() as u64;

        info!(
            "Tesseract {} pass: confidence {:.1}, {} chars in {}ms",
            config.name,
            confidence,
            text.len(),
            processing_time_ms
        );

        Ok(OcrResult {
            text,
            confidence,
            processing_time_ms,
            config_name: config.name.clone(),
        })
    }
}

/// Rebuild text lines and mean word confidence from Tesseract TSV.
///
/// Word rows (level 5) are grouped by page, block, paragraph and line.
fn parse_tsv(tsv: &str) -> (String, f32) {
    let mut lines: BTreeMap<(u32, u32, u32, u32), Vec<&str>> = BTreeMap::new();
    let mut confidence_sum = 0.0f32;
    let mut word_count = 0usize;

    // First row is the header
    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }

        let text = cols[11].trim();
        let conf: f32 = cols[10].trim().parse().unwrap_or(-1.0);
        if text.is_empty() || conf < 0.0 {
            continue;
        }

        let key = (
            cols[1].parse().unwrap_or(0),
            cols[2].parse().unwrap_or(0),
            cols[3].parse().unwrap_or(0),
            cols[4].parse().unwrap_or(0),
        );
        lines.entry(key).or_default().push(text);
        confidence_sum += conf;
        word_count += 1;
    }

    let text = lines
        .values()
        .map(|words| words.join(" "))
        .collect::<Vec<_>>()
        .join("\n");

    let confidence = if word_count == 0 {
        0.0
    } else {
        confidence_sum / word_count as f32
    };

    (text, confidence)
}
