//! Receipt pipeline: route an upload, extract its text, parse the fields.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, info_span, warn};

use crate::error::{PdfError, ReceiptError, Result};
use crate::models::config::{PdfConfig, ReceiptConfig};
use crate::models::receipt::{ExtractionSource, MediaKind, ParsedReceipt, ReceiptExtraction};
use crate::ocr::{create_backend, ImagePreprocessor, OcrArbitrator, OcrBackend};
use crate::pdf::{PageRasterizer, PdfTextExtractor, PdftoppmRasterizer};
use crate::receipt::ReceiptParser;

static NEXT_RUN: AtomicU64 = AtomicU64::new(1);

/// Shared flag a caller raises to abandon a run.
///
/// Checked before each stage and between OCR attempts; temporary files of
/// an abandoned run are still removed.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// `Err(Cancelled)` once the flag is raised.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ReceiptError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Turns an uploaded receipt file into text and parsed fields.
pub struct ReceiptPipeline<B = Box<dyn OcrBackend>, R = Box<dyn PageRasterizer>> {
    arbitrator: OcrArbitrator<B>,
    rasterizer: R,
    parser: ReceiptParser,
    pdf_config: PdfConfig,
}

impl ReceiptPipeline {
    /// Build a pipeline with the configured OCR engine and `pdftoppm`.
    pub fn from_config(config: &ReceiptConfig) -> Result<Self> {
        config.validate()?;
        let backend = create_backend(&config.ocr)?;
        let rasterizer: Box<dyn PageRasterizer> =
            Box::new(PdftoppmRasterizer::from_config(&config.pdf));
        Ok(Self::new(config, backend, rasterizer))
    }
}

impl<B: OcrBackend, R: PageRasterizer> ReceiptPipeline<B, R> {
    pub fn new(config: &ReceiptConfig, backend: B, rasterizer: R) -> Self {
        let preprocessor = ImagePreprocessor::from_config(config.preprocess.clone());
        let arbitrator = OcrArbitrator::new(backend, preprocessor)
            .with_whitelist(config.ocr.whitelist().map(str::to_string));

        Self {
            arbitrator,
            rasterizer,
            parser: ReceiptParser::from_config(&config.parser),
            pdf_config: config.pdf.clone(),
        }
    }

    pub fn arbitrator(&self) -> &OcrArbitrator<B> {
        &self.arbitrator
    }

    pub fn rasterizer(&self) -> &R {
        &self.rasterizer
    }

    pub fn parser(&self) -> &ReceiptParser {
        &self.parser
    }

    /// Process an upload given its declared media type.
    pub fn process(
        &self,
        path: &Path,
        media_type: &str,
        cancel: &CancelFlag,
    ) -> Result<ReceiptExtraction> {
        self.process_kind(path, MediaKind::from_media_type(media_type), cancel)
    }

    /// Process an upload of a known kind.
    ///
    /// Extraction failures are reported in `extraction_error` next to an
    /// empty `ParsedReceipt`; only cancellation is returned as an error.
    pub fn process_kind(
        &self,
        path: &Path,
        kind: MediaKind,
        cancel: &CancelFlag,
    ) -> Result<ReceiptExtraction> {
        let run = NEXT_RUN.fetch_add(1, Ordering::Relaxed);
        let span = info_span!("receipt", run);
        let _enter = span.enter();

        let start = Instant::now();
        info!("Processing {} ({:?})", path.display(), kind);

        let extraction = match self.extract_text(path, &kind, cancel) {
            Ok((text, source)) => {
                cancel.check()?;
                let parsed_data = self.parser.parse(&text);
                ReceiptExtraction {
                    extracted_text: text,
                    parsed_data,
                    extraction_error: None,
                    source,
                    processing_time_ms: start.elapsed().as_millis() as u64,
                }
            }
            Err(ReceiptError::Cancelled) => {
                warn!("Run cancelled for {}", path.display());
                return Err(ReceiptError::Cancelled);
            }
            Err(e) => {
                warn!("Extraction failed for {}: {}", path.display(), e);
                ReceiptExtraction {
                    extracted_text: String::new(),
                    parsed_data: ParsedReceipt::empty(),
                    extraction_error: Some(e.to_string()),
                    source: ExtractionSource::None,
                    processing_time_ms: start.elapsed().as_millis() as u64,
                }
            }
        };

        info!(
            "Finished {} via {:?} in {}ms",
            path.display(),
            extraction.source,
            extraction.processing_time_ms
        );
        Ok(extraction)
    }

    /// Raw text of an upload and the path that produced it.
    pub fn extract_text(
        &self,
        path: &Path,
        kind: &MediaKind,
        cancel: &CancelFlag,
    ) -> Result<(String, ExtractionSource)> {
        cancel.check()?;

        match kind {
            MediaKind::Pdf => self.extract_pdf(path, cancel),
            MediaKind::Image => {
                let scratch = self.arbitrator.preprocessor().scratch_dir_for(path);
                let result = self.arbitrator.recognize_image(path, &scratch, cancel)?;
                Ok((result.text, ExtractionSource::ImageOcr))
            }
            MediaKind::Unsupported(media_type) => {
                Err(ReceiptError::UnsupportedMedia(media_type.clone()))
            }
        }
    }

    /// Text layer first, then flat text, then OCR of the first page.
    fn extract_pdf(&self, path: &Path, cancel: &CancelFlag) -> Result<(String, ExtractionSource)> {
        let data = std::fs::read(path)?;
        let mut extractor = PdfTextExtractor::from_config(&self.pdf_config);

        match extractor.load(&data) {
            Ok(()) => {
                match extractor.extract_text() {
                    Ok(text) if !text.trim().is_empty() => {
                        debug!("Using positioned text layer ({} chars)", text.len());
                        return Ok((text, ExtractionSource::PdfText));
                    }
                    Ok(_) => debug!("No text layer in {}", path.display()),
                    Err(e) => warn!("Text layer extraction failed for {}: {}", path.display(), e),
                }

                if self.pdf_config.flat_text_fallback {
                    cancel.check()?;
                    match extractor.extract_flat_text() {
                        Ok(text) if !text.trim().is_empty() => {
                            debug!("Using flat text ({} chars)", text.len());
                            return Ok((text, ExtractionSource::PdfFlatText));
                        }
                        Ok(_) => debug!("Flat text of {} is empty", path.display()),
                        Err(e) => warn!("Flat text extraction failed for {}: {}", path.display(), e),
                    }
                }
            }
            Err(e) => warn!("Cannot read text layer of {}: {}", path.display(), e),
        }

        cancel.check()?;
        self.ocr_first_page(path, cancel)
    }

    fn ocr_first_page(&self, path: &Path, cancel: &CancelFlag) -> Result<(String, ExtractionSource)> {
        let scratch = self.arbitrator.preprocessor().scratch_dir_for(path);

        let raster = self
            .rasterizer
            .rasterize_first_page(path, &scratch)
            .map_err(|e| PdfError::ExtractionFailed(format!("no text layer and {}", e)))?;

        let outcome = self.arbitrator.recognize_image(raster.path(), &scratch, cancel);

        if let Err(e) = raster.delete() {
            warn!("Failed to delete rasterized page: {}", e);
        }

        match outcome {
            Ok(result) => Ok((result.text, ExtractionSource::PdfOcr)),
            Err(ReceiptError::Cancelled) => Err(ReceiptError::Cancelled),
            Err(e) => Err(PdfError::ExtractionFailed(e.to_string()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        pdf_with_content, small_preprocess_config, text_content, write_test_image,
        ScriptedBackend, StubRasterizer,
    };
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use std::fs;
    use std::str::FromStr;

    const SCENARIO_A: &str = "Walmart\nTOTAL: $37.40\nSUBTOTAL: $35.00\n01/15/2024";

    fn config() -> ReceiptConfig {
        ReceiptConfig {
            preprocess: small_preprocess_config(),
            ..ReceiptConfig::default()
        }
    }

    fn pipeline(
        outcomes: Vec<std::result::Result<(&str, f32), &str>>,
        rasterizer: StubRasterizer,
    ) -> ReceiptPipeline<ScriptedBackend, StubRasterizer> {
        ReceiptPipeline::new(&config(), ScriptedBackend::new(outcomes), rasterizer)
    }

    fn entries(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_cancel_flag_shared_between_clones() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(flag.check().is_ok());

        clone.cancel();
        assert!(flag.is_cancelled());
        assert!(matches!(flag.check(), Err(ReceiptError::Cancelled)));
    }

    #[test]
    fn test_image_upload() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("receipt.png");
        write_test_image(&source);

        let pipeline = pipeline(
            vec![Ok(("W4lm", 20.0)), Ok((SCENARIO_A, 88.0))],
            StubRasterizer::missing(),
        );
        let extraction = pipeline
            .process(&source, "image/png", &CancelFlag::new())
            .unwrap();

        assert_eq!(extraction.source, ExtractionSource::ImageOcr);
        assert_eq!(extraction.extracted_text, SCENARIO_A);
        assert_eq!(extraction.extraction_error, None);
        assert_eq!(
            extraction.parsed_data.amount,
            Some(Decimal::from_str("37.40").unwrap())
        );
        assert_eq!(extraction.parsed_data.merchant_name.as_deref(), Some("Walmart"));
        assert_eq!(extraction.parsed_data.date, NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(pipeline.rasterizer().calls(), 0);
        assert_eq!(entries(dir.path()), 1);
    }

    #[test]
    fn test_pdf_text_layer_skips_ocr() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("receipt.pdf");
        let content = text_content(&[
            (72.0, 700.0, "Corner Cafe"),
            (72.0, 680.0, "Latte"),
            (300.0, 680.0, "$4.50"),
            (72.0, 660.0, "TOTAL:"),
            (300.0, 660.0, "$4.50"),
            (72.0, 640.0, "03/02/2024"),
        ]);
        fs::write(&source, pdf_with_content(&content)).unwrap();

        let pipeline = pipeline(Vec::new(), StubRasterizer::available());
        let extraction = pipeline
            .process(&source, "application/pdf", &CancelFlag::new())
            .unwrap();

        assert_eq!(extraction.source, ExtractionSource::PdfText);
        assert_eq!(
            extraction.extracted_text,
            "Corner Cafe\nLatte\t$4.50\nTOTAL:\t$4.50\n03/02/2024\n"
        );

        let parsed = &extraction.parsed_data;
        assert_eq!(parsed.amount, Some(Decimal::from_str("4.50").unwrap()));
        assert_eq!(parsed.merchant_name.as_deref(), Some("Corner Cafe"));
        assert_eq!(parsed.date, NaiveDate::from_ymd_opt(2024, 3, 2));
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].name, "Latte");

        assert_eq!(pipeline.rasterizer().calls(), 0);
        assert_eq!(pipeline.arbitrator().backend().calls(), 0);
    }

    #[test]
    fn test_image_only_pdf_falls_back_to_ocr() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("scan.pdf");
        fs::write(&source, pdf_with_content("q 100 0 0 100 0 0 cm Q")).unwrap();

        let mut config = config();
        config.pdf.flat_text_fallback = false;
        let pipeline = ReceiptPipeline::new(
            &config,
            ScriptedBackend::new(vec![Ok(("TOTAL $12.00", 71.0)), Err("engine crashed")]),
            StubRasterizer::available(),
        );

        let extraction = pipeline
            .process(&source, "application/pdf", &CancelFlag::new())
            .unwrap();

        assert_eq!(extraction.source, ExtractionSource::PdfOcr);
        assert_eq!(
            extraction.parsed_data.amount,
            Some(Decimal::from_str("12.00").unwrap())
        );
        assert_eq!(pipeline.rasterizer().calls(), 1);
        // Only the upload remains: page raster and both variants are gone
        assert_eq!(entries(dir.path()), 1);
    }

    #[test]
    fn test_unreadable_pdf_falls_back_to_ocr() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("broken.pdf");
        fs::write(&source, b"%PDF-1.4 truncated").unwrap();

        let pipeline = pipeline(
            vec![Ok(("Coffee $4.50", 60.0)), Ok(("Coffee", 30.0))],
            StubRasterizer::available(),
        );
        let extraction = pipeline
            .process(&source, "application/pdf", &CancelFlag::new())
            .unwrap();

        assert_eq!(extraction.source, ExtractionSource::PdfOcr);
        assert_eq!(extraction.extracted_text, "Coffee $4.50");
        assert_eq!(entries(dir.path()), 1);
    }

    #[test]
    fn test_pdf_without_text_or_rasterizer_fails_softly() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("scan.pdf");
        fs::write(&source, pdf_with_content("q Q")).unwrap();

        let mut config = config();
        config.pdf.flat_text_fallback = false;
        let pipeline = ReceiptPipeline::new(
            &config,
            ScriptedBackend::new(Vec::new()),
            StubRasterizer::missing(),
        );

        let extraction = pipeline
            .process(&source, "application/pdf", &CancelFlag::new())
            .unwrap();

        assert!(extraction.is_failed());
        assert!(extraction
            .extraction_error
            .as_deref()
            .unwrap()
            .contains("PDF extraction failed"));
        assert_eq!(extraction.parsed_data, ParsedReceipt::empty());
        assert_eq!(extraction.source, ExtractionSource::None);
        assert!(source.exists());
    }

    #[test]
    fn test_all_ocr_attempts_failing_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("receipt.png");
        write_test_image(&source);

        let pipeline = pipeline(vec![Err("a"), Err("b")], StubRasterizer::missing());
        let extraction = pipeline
            .process(&source, "image/png", &CancelFlag::new())
            .unwrap();

        assert!(extraction
            .extraction_error
            .as_deref()
            .unwrap()
            .contains("OCR extraction failed"));
        assert!(extraction.parsed_data.is_empty());
        assert_eq!(entries(dir.path()), 1);
    }

    #[test]
    fn test_unsupported_media_type() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("notes.txt");
        fs::write(&source, "TOTAL: $5.00").unwrap();

        let pipeline = pipeline(Vec::new(), StubRasterizer::missing());
        let extraction = pipeline
            .process(&source, "text/plain", &CancelFlag::new())
            .unwrap();

        assert_eq!(
            extraction.extraction_error.as_deref(),
            Some("unsupported media type: text/plain")
        );
        assert_eq!(extraction.parsed_data.amount, None);
    }

    #[test]
    fn test_cancelled_run_propagates_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("receipt.png");
        write_test_image(&source);

        let cancel = CancelFlag::new();
        cancel.cancel();
        let pipeline = pipeline(vec![Ok(("text", 90.0))], StubRasterizer::missing());

        let err = pipeline.process(&source, "image/png", &cancel).unwrap_err();

        assert!(matches!(err, ReceiptError::Cancelled));
        assert_eq!(pipeline.arbitrator().backend().calls(), 0);
        assert_eq!(entries(dir.path()), 1);
    }

    #[test]
    fn test_empty_ocr_text_yields_empty_receipt() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("blank.png");
        write_test_image(&source);

        let pipeline = pipeline(vec![Ok(("", 0.0)), Ok(("  ", 0.0))], StubRasterizer::missing());
        let extraction = pipeline
            .process(&source, "image/png", &CancelFlag::new())
            .unwrap();

        assert_eq!(extraction.extraction_error, None);
        assert!(extraction.parsed_data.is_empty());
    }
}
