//! Pure Rust OCR backend using `pure-onnx-ocr`.

use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use tracing::{debug, info};

use crate::error::OcrError;

use super::{expand_whitelist, OcrBackend, OcrConfig, OcrResult};

/// Rows closer than this many pixels are read as one line.
const ROW_HEIGHT: f32 = 20.0;

/// OCR backend backed by `pure-onnx-ocr` (no external runtime or binary).
///
/// The model has no notion of page segmentation, so that setting is
/// ignored; the whitelist is applied as a filter on the output.
pub struct PureOnnxBackend {
    // The engine caches compiled models in `RefCell`s, so it is `Send` but not `Sync`.
    engine: Mutex<pure_onnx_ocr::engine::OcrEngine>,
}

/// A recognized region, positioned by its top-left corner.
struct Region {
    x: f32,
    y: f32,
    text: String,
    confidence: f32,
}

impl PureOnnxBackend {
    /// Load detection, recognition and dictionary files from `model_dir`.
    pub fn from_dir(model_dir: &Path) -> Result<Self, OcrError> {
        let det_path = model_dir.join("det.onnx");
        let rec_path = model_dir.join("latin_rec.onnx");
        let dict_path = model_dir.join("latin_dict.txt");

        for path in [&det_path, &rec_path, &dict_path] {
            if !path.exists() {
                return Err(OcrError::ModelLoad(format!(
                    "missing model file {}",
                    path.display()
                )));
            }
        }

        let engine = pure_onnx_ocr::engine::OcrEngineBuilder::new()
            .det_model_path(&det_path)
            .rec_model_path(&rec_path)
            .dictionary_path(&dict_path)
            .build()
            .map_err(|e| OcrError::ModelLoad(format!("pure-onnx-ocr: {}", e)))?;

        info!("Loaded pure-onnx-ocr engine from {}", model_dir.display());

        Ok(Self {
            engine: Mutex::new(engine),
        })
    }
}

impl OcrBackend for PureOnnxBackend {
    fn name(&self) -> &str {
        "onnx"
    }

    fn recognize(&self, image: &Path, config: &OcrConfig) -> Result<OcrResult, OcrError> {
        let start = Instant::now();

        let image = image::open(image)
            .map_err(|e| OcrError::InvalidImage(format!("{}: {}", image.display(), e)))?;

        let engine = self
            .engine
            .lock()
            .map_err(|_| OcrError::Recognition("pure-onnx-ocr engine lock poisoned".into()))?;
        let results = engine
            .run_from_image(&image)
            .map_err(|e| OcrError::Recognition(format!("pure-onnx-ocr: {}", e)))?;

        debug!("pure-onnx-ocr returned {} text regions", results.len());

        let allowed = config.char_whitelist.as_deref().map(expand_whitelist);
        let regions = results
            .iter()
            .map(|r| {
                let (x, y) = top_left(&r.bounding_box);
                let text = r.text.replace("[UNK]", " ");
                let text = match &allowed {
                    Some(allowed) => text.chars().filter(|c| allowed.contains(*c)).collect(),
                    None => text,
                };
                Region {
                    x,
                    y,
                    text,
                    confidence: r.confidence,
                }
            })
            .collect();

        let (text, confidence) = assemble(regions);
        let processing_time_ms = start.elapsed().as_millis() as u64;

        info!(
            "ONNX {} pass: confidence {:.1} in {}ms",
            config.name, confidence, processing_time_ms
        );

        Ok(OcrResult {
            text,
            confidence,
            processing_time_ms,
            config_name: config.name.clone(),
        })
    }
}

/// Join regions in reading order; confidence is the mean scaled to 0-100.
fn assemble(mut regions: Vec<Region>) -> (String, f32) {
    regions.sort_by(|a, b| {
        let row_a = (a.y / ROW_HEIGHT) as i32;
        let row_b = (b.y / ROW_HEIGHT) as i32;
        row_a
            .cmp(&row_b)
            .then_with(|| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal))
    });

    let confidence = if regions.is_empty() {
        0.0
    } else {
        regions.iter().map(|r| r.confidence).sum::<f32>() / regions.len() as f32 * 100.0
    };

    let text = regions
        .iter()
        .map(|r| r.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    (text, confidence)
}

fn top_left(polygon: &pure_onnx_ocr::Polygon<f64>) -> (f32, f32) {
    polygon
        .exterior()
        .coords()
        .take(4)
        .fold((f32::INFINITY, f32::INFINITY), |(x, y), c| {
            (x.min(c.x as f32), y.min(c.y as f32))
        })
}
