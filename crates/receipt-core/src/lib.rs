//! Core library for receipt OCR processing.
//!
//! This crate provides:
//! - Image preprocessing into OCR-friendly variants
//! - Multi-pass OCR with confidence arbitration (tesseract or pure-onnx-ocr)
//! - PDF text-layer reconstruction with rasterize-and-OCR fallback
//! - Receipt field extraction (total, merchant, date, line items)
//! - Upload retention helpers

pub mod error;
pub mod models;
pub mod ocr;
pub mod pdf;
pub mod pipeline;
pub mod receipt;
pub mod storage;

#[cfg(test)]
mod test_support;

pub use error::{OcrError, PdfError, ReceiptError, Result};
pub use models::config::ReceiptConfig;
pub use models::receipt::{ExtractionSource, MediaKind, ParsedReceipt, ReceiptExtraction, ReceiptItem};
pub use ocr::{create_backend, OcrBackend, OcrResult, TesseractBackend};
#[cfg(feature = "onnx")]
pub use ocr::PureOnnxBackend;
pub use pdf::{PageRasterizer, PdfTextExtractor, PdftoppmRasterizer};
pub use pipeline::{CancelFlag, ReceiptPipeline};
pub use receipt::ReceiptParser;
