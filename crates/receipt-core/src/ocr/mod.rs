//! OCR over preprocessed receipt images.

mod arbitrator;
mod preprocessing;
#[cfg(feature = "onnx")]
mod pure_engine;
mod tesseract;

pub use arbitrator::{OcrArbitrator, OcrAttempt};
pub use preprocessing::{EnhancementStrategy, ImagePreprocessor, RasterImage};
#[cfg(feature = "onnx")]
pub use pure_engine::PureOnnxBackend;
pub use tesseract::TesseractBackend;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::OcrError;
use crate::models::config::{OcrEngineKind, OcrSettings};

/// Page segmentation mode for a recognition pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSegMode {
    /// Fully automatic layout analysis.
    Auto,
    /// One uniform block of text.
    SingleBlock,
    /// One text line.
    SingleLine,
    /// As much text as possible, in no particular order.
    SparseText,
}

impl PageSegMode {
    /// Tesseract `--psm` value.
    pub fn psm(self) -> u32 {
        match self {
            Self::Auto => 3,
            Self::SingleBlock => 6,
            Self::SingleLine => 7,
            Self::SparseText => 11,
        }
    }
}

/// Recognition parameters for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Name used in logs and results.
    pub name: String,

    /// Page segmentation mode.
    pub page_seg_mode: PageSegMode,

    /// Characters the engine may emit; `None` allows all.
    pub char_whitelist: Option<String>,
}

impl OcrConfig {
    pub fn new(name: impl Into<String>, page_seg_mode: PageSegMode) -> Self {
        Self {
            name: name.into(),
            page_seg_mode,
            char_whitelist: None,
        }
    }

    pub fn with_whitelist(mut self, whitelist: Option<&str>) -> Self {
        self.char_whitelist = whitelist.map(str::to_string);
        self
    }
}

/// Result of one recognition attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrResult {
    /// Recognized text, lines separated by newlines.
    pub text: String,

    /// Engine confidence, 0-100.
    pub confidence: f32,

    /// Processing time in milliseconds.
    pub processing_time_ms: u64,

    /// Name of the configuration that produced this result.
    pub config_name: String,
}

impl OcrResult {
    /// A result with no text, for runs without any attempt.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// A text recognition engine.
///
/// Low confidence is a normal result. Errors are reserved for engine level
/// failures on a single attempt, such as a missing binary or unreadable image.
pub trait OcrBackend: Send + Sync {
    /// Engine name for logs.
    fn name(&self) -> &str;

    /// Recognize text in the image at `image`.
    fn recognize(&self, image: &Path, config: &OcrConfig) -> Result<OcrResult, OcrError>;
}

impl<T: OcrBackend + ?Sized> OcrBackend for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn recognize(&self, image: &Path, config: &OcrConfig) -> Result<OcrResult, OcrError> {
        (**self).recognize(image, config)
    }
}

/// Expand `a-z` style ranges in a whitelist into the characters they cover.
///
/// A `-` that does not sit between two alphanumerics of the same class is
/// kept as a literal.
pub(crate) fn expand_whitelist(whitelist: &str) -> String {
    let chars: Vec<char> = whitelist.chars().collect();
    let mut expanded = String::with_capacity(chars.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if let (Some('-'), Some(&end)) = (chars.get(i + 1), chars.get(i + 2)) {
            let same_class = (c.is_ascii_digit() && end.is_ascii_digit())
                || (c.is_ascii_lowercase() && end.is_ascii_lowercase())
                || (c.is_ascii_uppercase() && end.is_ascii_uppercase());
            if same_class && c <= end {
                expanded.extend(c..=end);
                i += 3;
                continue;
            }
        }

        if !expanded.contains(c) {
            expanded.push(c);
        }
        i += 1;
    }

    expanded
}

/// Create the backend selected in the `ocr` config section.
pub fn create_backend(settings: &OcrSettings) -> Result<Box<dyn OcrBackend>, OcrError> {
    match settings.engine {
        OcrEngineKind::Tesseract => Ok(Box::new(TesseractBackend::from_settings(settings))),
        #[cfg(feature = "onnx")]
        OcrEngineKind::Onnx => Ok(Box::new(PureOnnxBackend::from_dir(&settings.model_dir)?)),
        #[cfg(not(feature = "onnx"))]
        OcrEngineKind::Onnx => Err(OcrError::EngineUnavailable(
            "built without the `onnx` feature".to_string(),
        )),
    }
}
