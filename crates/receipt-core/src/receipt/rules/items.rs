//! Line item extraction.
//!
//! Each line is matched on its own against three shapes, in order:
//! a trailing dollar price, a dollar price anywhere, and a trailing bare
//! number with no dollar sign at all.

use std::collections::HashSet;
use std::str::FromStr;

use rust_decimal::Decimal;
use tracing::trace;

use super::amounts::parse_amount;
use super::patterns::{ITEM_DOLLAR_ANYWHERE, ITEM_TRAILING_DOLLAR, ITEM_TRAILING_NUMBER};
use super::FieldExtractor;
use crate::models::receipt::ReceiptItem;

/// Name fragments that mark a summary line, not a purchase.
const SUMMARY_WORDS: &[&str] = &["total", "tax", "subtotal", "discount"];

/// Extra fragments rejected for bare-number lines.
const BARE_NUMBER_WORDS: &[&str] = &["card", "receipt"];

/// Rewrites a three-digit whole number such as `515` to `15`.
///
/// OCR often reads a `$` glyph as a leading `5` or `8`. The rule only sees
/// bare numbers from lines without any dollar sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergedPriceCorrection {
    enabled: bool,
}

impl MergedPriceCorrection {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Corrected amount for the raw number text, or the parsed amount as is.
    pub fn apply(&self, raw: &str, amount: Decimal) -> Decimal {
        if !self.enabled || raw.contains('.') {
            return amount;
        }

        if amount < Decimal::from(100) || amount > Decimal::from(999) {
            return amount;
        }

        match raw.get(1..).and_then(|rest| Decimal::from_str(rest).ok()) {
            Some(corrected) => {
                trace!("Correcting merged price {} to {}", raw, corrected);
                corrected
            }
            None => amount,
        }
    }
}

impl Default for MergedPriceCorrection {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Line item extractor.
pub struct ItemExtractor {
    max_amount: Decimal,
    correction: MergedPriceCorrection,
}

impl ItemExtractor {
    pub fn new() -> Self {
        Self {
            max_amount: Decimal::from(1_000),
            correction: MergedPriceCorrection::default(),
        }
    }

    /// Set the exclusive upper bound for item prices.
    pub fn with_max_amount(mut self, max_amount: Decimal) -> Self {
        self.max_amount = max_amount;
        self
    }

    pub fn with_correction(mut self, correction: MergedPriceCorrection) -> Self {
        self.correction = correction;
        self
    }

    /// Extract an item from one line, if it has one.
    pub fn extract_line(&self, line: &str) -> Option<ReceiptItem> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        // A trailing-price line never falls through to the looser shapes
        if let Some(caps) = ITEM_TRAILING_DOLLAR.captures(line) {
            let name = caps[1].trim();
            let amount = parse_amount(&caps[2])?;
            return self.accept(name, amount, 2);
        }

        if line.contains('$') {
            let caps = ITEM_DOLLAR_ANYWHERE.captures(line)?;
            let name = caps[1].replace('$', "");
            let amount = parse_amount(&caps[2])?;
            return self.accept(name.trim(), amount, 2);
        }

        let caps = ITEM_TRAILING_NUMBER.captures(line)?;
        let name = caps[1].trim();
        let lower = name.to_lowercase();
        if BARE_NUMBER_WORDS.iter().any(|word| lower.contains(word)) {
            return None;
        }

        let raw = &caps[2];
        let amount = self.correction.apply(raw, parse_amount(raw)?);
        self.accept(name, amount, 4)
    }

    fn accept(&self, name: &str, amount: Decimal, min_name_len: usize) -> Option<ReceiptItem> {
        let length = name.chars().count();
        if length < min_name_len || length >= 100 {
            return None;
        }

        let lower = name.to_lowercase();
        if SUMMARY_WORDS.iter().any(|word| lower.contains(word)) {
            return None;
        }

        if amount <= Decimal::ZERO || amount >= self.max_amount {
            return None;
        }

        Some(ReceiptItem::new(name, amount))
    }
}

impl Default for ItemExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldExtractor for ItemExtractor {
    type Output = ReceiptItem;

    fn extract(&self, text: &str) -> Option<Self::Output> {
        text.lines().find_map(|line| self.extract_line(line))
    }

    /// Items in line order, duplicates removed.
    fn extract_all(&self, text: &str) -> Vec<Self::Output> {
        dedup_items(text.lines().filter_map(|line| self.extract_line(line)))
    }
}

/// Drop items repeating an earlier `(name, amount)` pair.
pub fn dedup_items(items: impl IntoIterator<Item = ReceiptItem>) -> Vec<ReceiptItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert((item.name.clone(), item.amount)))
        .collect()
}
