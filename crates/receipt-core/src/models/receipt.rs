//! Receipt data models handed to the transaction store.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Structured fields recovered from receipt text.
///
/// Every field that could not be found is `None` (or empty for `items`);
/// the parser never fails on unparsable text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedReceipt {
    /// Total amount paid.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub amount: Option<Decimal>,

    /// Merchant name, usually from the receipt header.
    pub merchant_name: Option<String>,

    /// Purchase date.
    pub date: Option<NaiveDate>,

    /// Line items in receipt order, without duplicates.
    pub items: Vec<ReceiptItem>,

    /// Text the fields were parsed from.
    pub raw_text: String,
}

impl ParsedReceipt {
    /// A result with no fields, used when extraction produced nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when no field was recovered.
    pub fn is_empty(&self) -> bool {
        self.amount.is_none()
            && self.merchant_name.is_none()
            && self.date.is_none()
            && self.items.is_empty()
    }
}

/// A purchased item with its price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptItem {
    /// Item description as printed.
    pub name: String,

    /// Item price.
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

impl ReceiptItem {
    pub fn new(name: impl Into<String>, amount: Decimal) -> Self {
        Self {
            name: name.into(),
            amount,
        }
    }
}

/// Which path produced the extracted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    /// OCR over a photographed or scanned image.
    ImageOcr,
    /// Reading-order reconstruction of the PDF text layer.
    PdfText,
    /// Flat text from the PDF text layer.
    PdfFlatText,
    /// OCR over the rasterized first PDF page.
    PdfOcr,
    /// Nothing was extracted.
    #[default]
    None,
}

/// Outcome of one receipt run, returned to the caller.
///
/// A failed extraction is still a valid outcome: the upload stays saved
/// and the caller falls back to manual entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptExtraction {
    /// Raw extracted text (possibly empty).
    pub extracted_text: String,

    /// Fields parsed from the extracted text.
    pub parsed_data: ParsedReceipt,

    /// Why extraction failed, for display.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_error: Option<String>,

    /// Path that produced the text.
    pub source: ExtractionSource,

    /// Processing time in milliseconds.
    pub processing_time_ms: u64,
}

impl ReceiptExtraction {
    /// True when extraction failed and only the upload survived.
    pub fn is_failed(&self) -> bool {
        self.extraction_error.is_some()
    }
}

/// Kind of uploaded file, from its declared media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaKind {
    /// `application/pdf`.
    Pdf,
    /// `image/*`.
    Image,
    /// Anything else, with the declared type.
    Unsupported(String),
}

impl MediaKind {
    /// Classify a declared media type such as `image/jpeg`.
    pub fn from_media_type(media_type: &str) -> Self {
        let essence = media_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "application/pdf" | "application/x-pdf" => Self::Pdf,
            s if s.starts_with("image/") => Self::Image,
            _ => Self::Unsupported(media_type.to_string()),
        }
    }

    /// Guess the media kind from a file extension.
    pub fn from_extension(extension: &str) -> Self {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Self::Pdf,
            "png" | "jpg" | "jpeg" | "webp" | "tiff" | "tif" | "bmp" | "gif" => Self::Image,
            other => Self::Unsupported(other.to_string()),
        }
    }
}
