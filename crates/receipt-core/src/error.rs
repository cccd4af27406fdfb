//! Error types for the receipt-core library.

use thiserror::Error;

/// Main error type for the receipt library.
#[derive(Error, Debug)]
pub enum ReceiptError {
    /// PDF processing error.
    #[error("PDF error: {0}")]
    Pdf(#[from] PdfError),

    /// OCR processing error.
    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Declared media type is neither a PDF nor an image.
    #[error("unsupported media type: {0}")]
    UnsupportedMedia(String),

    /// The caller abandoned the run.
    #[error("receipt processing was cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors related to PDF processing.
#[derive(Error, Debug)]
pub enum PdfError {
    /// Failed to open/parse the PDF file.
    #[error("failed to parse PDF: {0}")]
    Parse(String),

    /// Failed to extract text from PDF.
    #[error("failed to extract text: {0}")]
    TextExtraction(String),

    /// The PDF is encrypted and cannot be processed.
    #[error("PDF is encrypted")]
    Encrypted,

    /// The PDF is empty or has no pages.
    #[error("PDF has no pages")]
    NoPages,

    /// No page rasterizer is installed.
    #[error("PDF rasterizer unavailable: {0}")]
    RasterizerUnavailable(String),

    /// The rasterizer ran but did not produce an image.
    #[error("failed to rasterize page: {0}")]
    Rasterization(String),

    /// Neither the embedded text nor the OCR fallback produced a result.
    #[error("PDF extraction failed: {0}")]
    ExtractionFailed(String),
}

/// Errors related to OCR processing.
#[derive(Error, Debug)]
pub enum OcrError {
    /// One enhancement strategy could not be produced.
    #[error("preprocessing failed: {0}")]
    Preprocessing(String),

    /// The recognition engine is not installed or could not be started.
    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Failed to load OCR models.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// The engine failed on a single attempt.
    #[error("text recognition failed: {0}")]
    Recognition(String),

    /// Invalid image format or dimensions.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// Every configured attempt errored.
    #[error("OCR extraction failed: all {attempts} attempts errored")]
    AllAttemptsFailed { attempts: usize },
}

/// Result type for the receipt library.
pub type Result<T> = std::result::Result<T, ReceiptError>;
