//! Purchase date extraction.

use chrono::{Datelike, NaiveDate};
use regex::Captures;

use super::patterns::{DATE_MDY, DATE_MONTH_NAME, DATE_YMD};
use super::{ExtractionMatch, FieldExtractor};

/// Date field extractor.
///
/// Numeric dates are read month-first, falling back to day-first when the
/// month-first reading is not a calendar date. Only dates after `min_year`
/// are accepted.
pub struct DateExtractor {
    min_year: i32,
}

impl DateExtractor {
    pub fn new() -> Self {
        Self { min_year: 2000 }
    }

    /// Accept only dates whose year is strictly greater than `min_year`.
    pub fn with_min_year(mut self, min_year: i32) -> Self {
        self.min_year = min_year;
        self
    }

    fn accept(&self, date: NaiveDate, caps: &Captures<'_>) -> Option<ExtractionMatch<NaiveDate>> {
        if date.year() <= self.min_year {
            return None;
        }

        let full_match = caps.get(0)?;
        Some(
            ExtractionMatch::new(date, full_match.as_str())
                .with_position(full_match.start(), full_match.end()),
        )
    }
}

impl Default for DateExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldExtractor for DateExtractor {
    type Output = ExtractionMatch<NaiveDate>;

    fn extract(&self, text: &str) -> Option<Self::Output> {
        self.extract_all(text).into_iter().next()
    }

    /// All acceptable dates, numeric forms first, in text order per form.
    fn extract_all(&self, text: &str) -> Vec<Self::Output> {
        let mut results = Vec::new();

        // 01/15/2024, 1-15-24, or 15/01/2024 read day-first
        for caps in DATE_MDY.captures_iter(text) {
            let first: u32 = caps[1].parse().unwrap_or(0);
            let second: u32 = caps[2].parse().unwrap_or(0);
            let year = parse_year(&caps[3]);

            let date = NaiveDate::from_ymd_opt(year, first, second)
                .or_else(|| NaiveDate::from_ymd_opt(year, second, first));

            if let Some(found) = date.and_then(|d| self.accept(d, &caps)) {
                results.push(found);
            }
        }

        // 2024-01-15
        for caps in DATE_YMD.captures_iter(text) {
            let year: i32 = caps[1].parse().unwrap_or(0);
            let month: u32 = caps[2].parse().unwrap_or(0);
            let day: u32 = caps[3].parse().unwrap_or(0);

            if let Some(found) =
                NaiveDate::from_ymd_opt(year, month, day).and_then(|d| self.accept(d, &caps))
            {
                results.push(found);
            }
        }

        // Jan 15, 2024
        for caps in DATE_MONTH_NAME.captures_iter(text) {
            let month = month_to_number(&caps[1]);
            let day: u32 = caps[2].parse().unwrap_or(0);
            let year = parse_year(&caps[3]);

            if let Some(found) =
                NaiveDate::from_ymd_opt(year, month, day).and_then(|d| self.accept(d, &caps))
            {
                results.push(found);
            }
        }

        results
    }
}

fn parse_year(s: &str) -> i32 {
    let year: i32 = s.parse().unwrap_or(0);
    if s.len() <= 2 {
        // Two-digit year: 00-50 is 2000s, 51-99 is 1900s
        if year <= 50 {
            2000 + year
        } else {
            1900 + year
        }
    } else {
        year
    }
}

fn month_to_number(name: &str) -> u32 {
    match name.to_ascii_lowercase().get(..3).unwrap_or("") {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => 0,
    }
}
