//! Rule-based field extractors for receipts.

pub mod amounts;
pub mod dates;
pub mod items;
pub mod merchant;
pub mod patterns;

pub use amounts::{collect_candidates, parse_amount, select_total, AmountExtractor, AmountRule, CandidateAmount, AMOUNT_RULES};
pub use dates::DateExtractor;
pub use items::{dedup_items, ItemExtractor, MergedPriceCorrection};
pub use merchant::MerchantExtractor;

/// Trait for field extractors.
pub trait FieldExtractor {
    /// The type of value this extractor produces.
    type Output;

    /// Extract the field from text.
    fn extract(&self, text: &str) -> Option<Self::Output>;

    /// Extract all occurrences of the field.
    fn extract_all(&self, text: &str) -> Vec<Self::Output>;
}

/// A value found in the text, with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionMatch<T> {
    /// Extracted value.
    pub value: T,
    /// Byte range in the source text.
    pub position: Option<(usize, usize)>,
    /// Source text that was matched.
    pub source: String,
}

impl<T> ExtractionMatch<T> {
    pub fn new(value: T, source: impl Into<String>) -> Self {
        Self {
            value,
            position: None,
            source: source.into(),
        }
    }

    pub fn with_position(mut self, start: usize, end: usize) -> Self {
        self.position = Some((start, end));
        self
    }
}

/// Slice of `text` reaching `before` bytes ahead of `start` and `after`
/// bytes past `end`, widened to char boundaries.
pub(crate) fn context_window(text: &str, start: usize, end: usize, before: usize, after: usize) -> &str {
    let from = floor_char_boundary(text, start.saturating_sub(before));
    let to = ceil_char_boundary(text, end.saturating_add(after).min(text.len()));
    &text[from..to]
}

/// Same as [`context_window`] but never crossing the lines that hold the match.
pub(crate) fn line_window(text: &str, start: usize, end: usize, before: usize, after: usize) -> &str {
    let line_start = text[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = text[end..].find('\n').map(|i| end + i).unwrap_or(text.len());

    let from = floor_char_boundary(text, start.saturating_sub(before).max(line_start));
    let to = ceil_char_boundary(text, end.saturating_add(after).min(line_end));
    &text[from..to]
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

/// True when `text` mentions "total" outside of a "subtotal".
pub(crate) fn mentions_total(lowercase: &str) -> bool {
    lowercase.replace("subtotal", "").contains("total")
}
