//! Configuration structures for the receipt pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ReceiptError;

/// Main configuration for the receipt pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiptConfig {
    /// Image preprocessing configuration.
    pub preprocess: PreprocessConfig,

    /// OCR engine configuration.
    pub ocr: OcrSettings,

    /// PDF processing configuration.
    pub pdf: PdfConfig,

    /// Receipt text parsing configuration.
    pub parser: ParserConfig,

    /// Upload retention configuration.
    pub retention: RetentionConfig,
}

/// Image preprocessing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Directory for temporary rasters. Defaults to the source file's directory.
    pub scratch_dir: Option<PathBuf>,

    /// Target width of the contrast-boosted variant.
    pub contrast_target_width: u32,

    /// Target width of the thresholded variant.
    pub threshold_target_width: u32,

    /// Allow enlarging images narrower than the target width.
    pub allow_upscale: bool,

    /// Upper bound on pixels in a resized variant; 0 disables the cap.
    pub max_pixels: u64,

    /// Linear contrast gain applied after normalization.
    pub contrast_gain: f32,

    /// Linear contrast offset applied after normalization.
    pub contrast_bias: f32,

    /// Median filter radius for the contrast-boosted variant.
    pub contrast_median_radius: u32,

    /// Binary threshold level (0-255).
    pub threshold_level: u8,

    /// Median filter radius for the thresholded variant.
    pub threshold_median_radius: u32,

    /// Unsharp mask sigma.
    pub sharpen_sigma: f32,

    /// Unsharp mask threshold.
    pub sharpen_threshold: i32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            scratch_dir: None,
            contrast_target_width: 2000,
            threshold_target_width: 3000,
            allow_upscale: true,
            max_pixels: 24_000_000,
            contrast_gain: 1.5,
            contrast_bias: -20.0,
            contrast_median_radius: 2,
            threshold_level: 128,
            threshold_median_radius: 1,
            sharpen_sigma: 1.0,
            sharpen_threshold: 1,
        }
    }
}

/// Which recognition engine backs the OCR step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrEngineKind {
    /// The `tesseract` executable.
    #[default]
    Tesseract,
    /// PaddleOCR models through `pure-onnx-ocr`.
    Onnx,
}

/// OCR engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Engine used for recognition.
    pub engine: OcrEngineKind,

    /// Path or name of the tesseract executable.
    pub tesseract_path: PathBuf,

    /// Recognition language.
    pub language: String,

    /// Characters the engine may emit. Empty disables the whitelist.
    pub char_whitelist: String,

    /// Directory with `det.onnx`, `latin_rec.onnx` and `latin_dict.txt`.
    pub model_dir: PathBuf,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            engine: OcrEngineKind::Tesseract,
            tesseract_path: PathBuf::from("tesseract"),
            language: "eng".to_string(),
            char_whitelist:
                "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz$.,/:-() "
                    .to_string(),
            model_dir: PathBuf::from("models"),
        }
    }
}

impl OcrSettings {
    /// Whitelist as an option, `None` when disabled.
    pub fn whitelist(&self) -> Option<&str> {
        if self.char_whitelist.is_empty() {
            None
        } else {
            Some(&self.char_whitelist)
        }
    }
}

/// PDF processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfConfig {
    /// DPI for rendering the first page when OCR fallback is needed.
    pub render_dpi: u32,

    /// Maximum rendered width in pixels.
    pub max_render_width: u32,

    /// Maximum rendered height in pixels.
    pub max_render_height: u32,

    /// Path or name of the pdftoppm executable.
    pub pdftoppm_path: PathBuf,

    /// Runs whose baselines differ by at most this much share a line.
    pub line_tolerance: f32,

    /// Horizontal gap that inserts a space between runs.
    pub space_gap: f32,

    /// Horizontal gap that inserts a column separator between runs.
    pub column_gap: f32,

    /// Glyph advance, as a fraction of the font size, for fonts without width metrics.
    pub glyph_width_ratio: f32,

    /// Try flat `pdf-extract` text before rasterizing.
    pub flat_text_fallback: bool,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            render_dpi: 300,
            max_render_width: 2000,
            max_render_height: 2000,
            pdftoppm_path: PathBuf::from("pdftoppm"),
            line_tolerance: 2.0,
            space_gap: 3.0,
            column_gap: 20.0,
            glyph_width_ratio: 0.5,
            flat_text_fallback: true,
        }
    }
}

/// Receipt text parsing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Exclusive upper bound for total amounts.
    pub max_total_amount: u32,

    /// Exclusive upper bound for line item amounts.
    pub max_item_amount: u32,

    /// Number of leading lines searched for the merchant name.
    pub merchant_scan_lines: usize,

    /// Dates in or before this year are rejected.
    pub min_year: i32,

    /// Read bare three digit prices like `515` as `15`.
    pub correct_merged_prices: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_total_amount: 10_000,
            max_item_amount: 1_000,
            merchant_scan_lines: 5,
            min_year: 2000,
            correct_merged_prices: true,
        }
    }
}

/// Upload retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Directory holding uploaded receipts.
    pub upload_dir: PathBuf,

    /// Files older than this many days are purged.
    pub max_age_days: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            max_age_days: 30,
        }
    }
}

impl ReceiptConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;
        std::fs::write(path, content)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ReceiptError> {
        let ratio = self.pdf.glyph_width_ratio;
        let checks = [
            (
                self.preprocess.contrast_target_width == 0,
                "preprocess.contrast_target_width must be positive",
            ),
            (
                self.preprocess.threshold_target_width == 0,
                "preprocess.threshold_target_width must be positive",
            ),
            (self.pdf.render_dpi == 0, "pdf.render_dpi must be positive"),
            (
                self.pdf.max_render_width == 0 || self.pdf.max_render_height == 0,
                "pdf.max_render_width and pdf.max_render_height must be positive",
            ),
            (
                !ratio.is_finite() || ratio <= 0.0,
                "pdf.glyph_width_ratio must be positive",
            ),
            (
                self.parser.merchant_scan_lines == 0,
                "parser.merchant_scan_lines must be positive",
            ),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(ReceiptError::Config(message.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ReceiptConfig =
            serde_json::from_str(r#"{ "parser": { "merchant_scan_lines": 3 } }"#).unwrap();

        assert_eq!(config.parser.merchant_scan_lines, 3);
        assert_eq!(config.parser.max_total_amount, 10_000);
        assert_eq!(config.pdf.render_dpi, 300);
        assert_eq!(config.ocr.engine, OcrEngineKind::Tesseract);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = ReceiptConfig::default();
        config.ocr.engine = OcrEngineKind::Onnx;
        config.preprocess.threshold_level = 140;
        config.save(&path).unwrap();

        let loaded = ReceiptConfig::from_file(&path).unwrap();
        assert_eq!(loaded.ocr.engine, OcrEngineKind::Onnx);
        assert_eq!(loaded.preprocess.threshold_level, 140);
    }

    #[test]
    fn test_validate() {
        assert!(ReceiptConfig::default().validate().is_ok());

        let mut config = ReceiptConfig::default();
        config.preprocess.threshold_target_width = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ReceiptError::Config(_)));
        assert!(err.to_string().contains("threshold_target_width"));

        let mut config = ReceiptConfig::default();
        config.pdf.glyph_width_ratio = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_whitelist_is_disabled() {
        let mut settings = OcrSettings::default();
        assert!(settings.whitelist().is_some());

        settings.char_whitelist.clear();
        assert_eq!(settings.whitelist(), None);
    }
}
