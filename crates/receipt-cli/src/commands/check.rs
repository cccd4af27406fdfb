//! Check command - report which external tools are usable.

use console::style;

use receipt_core::models::config::OcrEngineKind;
use receipt_core::{PdftoppmRasterizer, TesseractBackend};

use super::load_config;

fn status(available: bool) -> console::StyledObject<&'static str> {
    if available {
        style("available").green()
    } else {
        style("missing").red()
    }
}

pub async fn run(config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    let tesseract = TesseractBackend::from_settings(&config.ocr).is_available();
    let pdftoppm = PdftoppmRasterizer::from_config(&config.pdf).is_available();

    println!(
        "tesseract ({}): {}",
        config.ocr.tesseract_path.display(),
        status(tesseract)
    );
    println!(
        "pdftoppm ({}): {}",
        config.pdf.pdftoppm_path.display(),
        status(pdftoppm)
    );

    if config.ocr.engine == OcrEngineKind::Onnx {
        let models = ["det.onnx", "latin_rec.onnx", "latin_dict.txt"]
            .iter()
            .all(|name| config.ocr.model_dir.join(name).exists());
        println!(
            "onnx models ({}): {}",
            config.ocr.model_dir.display(),
            status(models)
        );
    }

    if !pdftoppm {
        println!();
        println!(
            "{} Scanned PDFs cannot be OCRed without pdftoppm (poppler-utils).",
            style("!").yellow()
        );
    }

    Ok(())
}
