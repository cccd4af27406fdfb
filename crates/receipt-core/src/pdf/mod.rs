//! PDF text recovery and first-page rasterization.

mod extractor;
mod fonts;
mod layout;
mod rasterizer;

pub use extractor::PdfTextExtractor;
pub use layout::{reconstruct_lines, LayoutOptions, PositionedTextRun};
pub use rasterizer::{PageRasterizer, PdftoppmRasterizer};

use crate::error::PdfError;

/// Result type for PDF operations.
pub type Result<T> = std::result::Result<T, PdfError>;
