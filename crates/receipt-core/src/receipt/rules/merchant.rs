//! Merchant name extraction from the receipt header.

use super::patterns::{ALL_CAPS_LINE, DATE_MDY, DATE_MONTH_NAME, DATE_YMD};
use super::{ExtractionMatch, FieldExtractor};

/// Legal suffixes; matched as whole words only.
const COMPANY_SUFFIXES: &[&str] = &["llc", "inc", "corp", "ltd"];

/// Words that mark a business name, also inside compounds like "Supermarket".
const BUSINESS_KEYWORDS: &[&str] = &["store", "shop", "market", "restaurant", "cafe"];

/// Words that mark a line as a heading rather than a name.
const EXCLUDED_WORDS: &[&str] = &["receipt", "invoice", "total"];

/// Merchant name extractor.
pub struct MerchantExtractor {
    scan_lines: usize,
}

impl MerchantExtractor {
    pub fn new() -> Self {
        Self { scan_lines: 5 }
    }

    /// Number of leading non-empty lines considered.
    pub fn with_scan_lines(mut self, scan_lines: usize) -> Self {
        self.scan_lines = scan_lines;
        self
    }

    fn qualifying_lines<'a>(&self, text: &'a str) -> impl Iterator<Item = &'a str> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .take(self.scan_lines)
            .filter(|line| is_candidate(line))
    }
}

impl Default for MerchantExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldExtractor for MerchantExtractor {
    type Output = ExtractionMatch<String>;

    /// The first business-looking line, else the first qualifying line.
    fn extract(&self, text: &str) -> Option<Self::Output> {
        let preferred = self.qualifying_lines(text).find(|line| looks_like_business(line));

        preferred
            .or_else(|| self.qualifying_lines(text).next())
            .map(|line| ExtractionMatch::new(line.to_string(), line))
    }

    fn extract_all(&self, text: &str) -> Vec<Self::Output> {
        self.qualifying_lines(text)
            .map(|line| ExtractionMatch::new(line.to_string(), line))
            .collect()
    }
}

fn is_candidate(line: &str) -> bool {
    let length = line.chars().count();
    if !(2..=50).contains(&length) {
        return false;
    }

    if line.starts_with(|c: char| c.is_ascii_digit()) || line.contains('$') {
        return false;
    }

    if DATE_MDY.is_match(line) || DATE_YMD.is_match(line) || DATE_MONTH_NAME.is_match(line) {
        return false;
    }

    let lower = line.to_lowercase();
    !EXCLUDED_WORDS.iter().any(|word| lower.contains(word))
}

fn looks_like_business(line: &str) -> bool {
    let lower = line.to_lowercase();
    let has_suffix = lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| COMPANY_SUFFIXES.contains(&word));
    let has_keyword = BUSINESS_KEYWORDS.iter().any(|keyword| lower.contains(keyword));

    has_suffix || has_keyword || ALL_CAPS_LINE.is_match(line)
}
