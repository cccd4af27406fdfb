//! Shared fixtures for unit tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use image::{DynamicImage, RgbImage};

use crate::error::{OcrError, PdfError};
use crate::models::config::PreprocessConfig;
use crate::ocr::{ImagePreprocessor, OcrBackend, OcrConfig, OcrResult, RasterImage};
use crate::pdf::PageRasterizer;
use crate::pipeline::CancelFlag;

type Outcome = Result<(String, f32), String>;

/// Backend replaying scripted outcomes and recording what it saw.
pub(crate) struct ScriptedBackend {
    outcomes: Mutex<VecDeque<Outcome>>,
    /// Config name of each call and whether its image existed at the time.
    pub seen: Mutex<Vec<(String, bool)>>,
    /// Raised during the first recognition, as Ctrl-C would be.
    cancel_on_call: Option<CancelFlag>,
}

impl ScriptedBackend {
    pub(crate) fn new(outcomes: Vec<Result<(&str, f32), &str>>) -> Self {
        let outcomes = outcomes
            .into_iter()
            .map(|o| o.map(|(t, c)| (t.to_string(), c)).map_err(str::to_string))
            .collect();
        Self {
            outcomes: Mutex::new(outcomes),
            seen: Mutex::new(Vec::new()),
            cancel_on_call: None,
        }
    }

    pub(crate) fn cancelling(mut self, cancel: CancelFlag) -> Self {
        self.cancel_on_call = Some(cancel);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl OcrBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn recognize(&self, image: &Path, config: &OcrConfig) -> Result<OcrResult, OcrError> {
        self.seen
            .lock()
            .unwrap()
            .push((config.name.clone(), image.exists()));
        if let Some(cancel) = &self.cancel_on_call {
            cancel.cancel();
        }

        match self.outcomes.lock().unwrap().pop_front() {
            Some(Ok((text, confidence))) => Ok(OcrResult {
                text,
                confidence,
                processing_time_ms: 0,
                config_name: config.name.clone(),
            }),
            Some(Err(message)) => Err(OcrError::Recognition(message)),
            None => Err(OcrError::EngineUnavailable("no scripted outcome".to_string())),
        }
    }
}

/// Rasterizer that writes a fixed test image, or reports itself missing.
pub(crate) struct StubRasterizer {
    available: bool,
    /// Number of rasterization requests.
    pub calls: Mutex<usize>,
}

impl StubRasterizer {
    pub(crate) fn available() -> Self {
        Self {
            available: true,
            calls: Mutex::new(0),
        }
    }

    pub(crate) fn missing() -> Self {
        Self {
            available: false,
            calls: Mutex::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl PageRasterizer for StubRasterizer {
    fn rasterize_first_page(&self, pdf: &Path, scratch_dir: &Path) -> Result<RasterImage, PdfError> {
        *self.calls.lock().unwrap() += 1;
        if !self.available {
            return Err(PdfError::RasterizerUnavailable("stub".to_string()));
        }

        let stem = pdf
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let raster = RasterImage::reserve(scratch_dir, &format!("page_{stem}_"), ".png")
            .map_err(|e| PdfError::Rasterization(e.to_string()))?;
        write_test_image(raster.path());
        Ok(raster)
    }
}

/// Write a small patterned RGB image.
pub(crate) fn write_test_image(path: &Path) {
    let image = RgbImage::from_fn(24, 12, |x, y| {
        let v = if (x + y) % 3 == 0 { 30 } else { 220 };
        image::Rgb([v, v, v])
    });
    DynamicImage::ImageRgb8(image)
        .save_with_format(path, image::ImageFormat::Png)
        .unwrap();
}

/// Preprocessor with tiny target widths.
pub(crate) fn small_preprocessor() -> ImagePreprocessor {
    ImagePreprocessor::from_config(small_preprocess_config())
}

pub(crate) fn small_preprocess_config() -> PreprocessConfig {
    PreprocessConfig {
        contrast_target_width: 48,
        threshold_target_width: 72,
        ..PreprocessConfig::default()
    }
}

/// Build a one-page PDF whose content stream is `content`, with Courier as `/F1`.
pub(crate) fn pdf_with_content(content: &str) -> Vec<u8> {
    use lopdf::{dictionary, Object};

    pdf_with_font(content, |_| {
        dictionary! {
            "Type" => Object::Name(b"Font".to_vec()),
            "Subtype" => Object::Name(b"Type1".to_vec()),
            "BaseFont" => Object::Name(b"Courier".to_vec()),
        }
    })
}

/// Build a one-page PDF whose `/F1` font is the dictionary `font` returns.
pub(crate) fn pdf_with_font(
    content: &str,
    font: impl FnOnce(&mut lopdf::Document) -> lopdf::Dictionary,
) -> Vec<u8> {
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.4");

    let font = font(&mut doc);
    let font_id = doc.add_object(font);

    let stream = Stream::new(dictionary! {}, content.as_bytes().to_vec());
    let content_id = doc.add_object(Object::Stream(stream));

    let page_id = doc.add_object(dictionary! {
        "Type" => Object::Name(b"Page".to_vec()),
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Contents" => Object::Reference(content_id),
        "Resources" => dictionary! {
            "Font" => dictionary! {
                "F1" => Object::Reference(font_id),
            },
        },
    });

    let pages_id = doc.add_object(dictionary! {
        "Type" => Object::Name(b"Pages".to_vec()),
        "Kids" => vec![Object::Reference(page_id)],
        "Count" => Object::Integer(1),
    });

    if let Ok(Object::Dictionary(dict)) = doc.get_object_mut(page_id) {
        dict.set("Parent", Object::Reference(pages_id));
    }

    let catalog_id = doc.add_object(dictionary! {
        "Type" => Object::Name(b"Catalog".to_vec()),
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

/// Content stream placing each `(x, y, text)` at font size 10.
pub(crate) fn text_content(runs: &[(f32, f32, &str)]) -> String {
    let mut content = String::from("BT /F1 10 Tf ");
    for (x, y, text) in runs {
        content.push_str(&format!("1 0 0 1 {x} {y} Tm ({text}) Tj "));
    }
    content.push_str("ET");
    content
}
