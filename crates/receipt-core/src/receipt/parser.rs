//! Rule-based receipt parser.

use rust_decimal::Decimal;
use tracing::debug;

use crate::models::config::ParserConfig;
use crate::models::receipt::ParsedReceipt;

use super::rules::{
    AmountExtractor, DateExtractor, FieldExtractor, ItemExtractor, MergedPriceCorrection,
    MerchantExtractor,
};

/// Turns raw receipt text into a [`ParsedReceipt`].
///
/// Parsing is a pure function of the text: fields that cannot be found are
/// left empty and no input makes it fail.
#[derive(Debug, Clone)]
pub struct ReceiptParser {
    /// Exclusive upper bound for the total.
    max_total_amount: Decimal,
    /// Exclusive upper bound for item prices.
    max_item_amount: Decimal,
    /// Leading lines searched for the merchant.
    merchant_scan_lines: usize,
    /// Dates must be after this year.
    min_year: i32,
    /// Whether bare `515` item prices are read as `15`.
    correct_merged_prices: bool,
}

impl ReceiptParser {
    /// Create a parser with default settings.
    pub fn new() -> Self {
        Self::from_config(&ParserConfig::default())
    }

    /// Create a parser from the `parser` config section.
    pub fn from_config(config: &ParserConfig) -> Self {
        Self {
            max_total_amount: Decimal::from(config.max_total_amount),
            max_item_amount: Decimal::from(config.max_item_amount),
            merchant_scan_lines: config.merchant_scan_lines,
            min_year: config.min_year,
            correct_merged_prices: config.correct_merged_prices,
        }
    }

    pub fn with_max_total_amount(mut self, amount: Decimal) -> Self {
        self.max_total_amount = amount;
        self
    }

    pub fn with_max_item_amount(mut self, amount: Decimal) -> Self {
        self.max_item_amount = amount;
        self
    }

    pub fn with_merchant_scan_lines(mut self, lines: usize) -> Self {
        self.merchant_scan_lines = lines;
        self
    }

    pub fn with_min_year(mut self, year: i32) -> Self {
        self.min_year = year;
        self
    }

    /// Enable or disable the merged-price item correction.
    pub fn with_merged_price_correction(mut self, enabled: bool) -> Self {
        self.correct_merged_prices = enabled;
        self
    }

    /// Parse receipt text.
    pub fn parse(&self, text: &str) -> ParsedReceipt {
        if text.trim().is_empty() {
            debug!("Empty receipt text, nothing to parse");
            return ParsedReceipt {
                raw_text: text.to_string(),
                ..ParsedReceipt::empty()
            };
        }

        let amount = AmountExtractor::new()
            .with_max_amount(self.max_total_amount)
            .extract(text)
            .map(|candidate| {
                debug!(
                    "Selected total {} from {:?} (priority {}, explicit {})",
                    candidate.amount,
                    candidate.context_text,
                    candidate.priority,
                    candidate.is_explicit_total
                );
                candidate.amount
            });

        let merchant_name = MerchantExtractor::new()
            .with_scan_lines(self.merchant_scan_lines)
            .extract(text)
            .map(|m| m.value);

        let date = DateExtractor::new()
            .with_min_year(self.min_year)
            .extract(text)
            .map(|m| m.value);

        let items = ItemExtractor::new()
            .with_max_amount(self.max_item_amount)
            .with_correction(MergedPriceCorrection::new(self.correct_merged_prices))
            .extract_all(text);

        debug!(
            "Parsed receipt: amount={:?}, merchant={:?}, date={:?}, {} items",
            amount,
            merchant_name,
            date,
            items.len()
        );

        ParsedReceipt {
            amount,
            merchant_name,
            date,
            items,
            raw_text: text.to_string(),
        }
    }
}

impl Default for ReceiptParser {
    fn default() -> Self {
        Self::new()
    }
}
