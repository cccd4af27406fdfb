//! Common regex patterns for receipt field extraction.

use lazy_static::lazy_static;
use regex::Regex;

/// A money figure: `12`, `12.50` or `1,234.56`.
pub const NUMBER: &str = r"(\d{1,3}(?:,\d{3})+(?:\.\d{2})?|\d+(?:\.\d{2})?)";

lazy_static! {
    // Labelled totals, most specific first
    pub static ref TOTAL_EXACT: Regex =
        Regex::new(&format!(r"(?i)\bTOTAL:\s*\$?{NUMBER}")).unwrap();

    pub static ref TOTAL_GENERIC: Regex =
        Regex::new(&format!(r"(?i)\btotal[:\s]*\$?{NUMBER}")).unwrap();

    pub static ref GRAND_TOTAL: Regex =
        Regex::new(&format!(r"(?i)grand\s*total[:\s]*\$?{NUMBER}")).unwrap();

    pub static ref FINAL_AMOUNT: Regex =
        Regex::new(&format!(r"(?i)final[:\s]*\$?{NUMBER}")).unwrap();

    pub static ref AMOUNT_LABEL: Regex =
        Regex::new(&format!(r"(?i)amount[:\s]*\$?{NUMBER}")).unwrap();

    pub static ref BALANCE: Regex =
        Regex::new(&format!(r"(?i)balance[:\s]*\$?{NUMBER}")).unwrap();

    pub static ref AMOUNT_DUE: Regex =
        Regex::new(&format!(r"(?i)due[:\s]*\$?{NUMBER}")).unwrap();

    pub static ref CHARGE: Regex =
        Regex::new(&format!(r"(?i)charge[:\s]*\$?{NUMBER}")).unwrap();

    // Any dollar figure
    pub static ref DOLLAR_AMOUNT: Regex =
        Regex::new(&format!(r"\${NUMBER}")).unwrap();

    // Dates
    pub static ref DATE_MDY: Regex = Regex::new(
        r"\b(\d{1,2})[/\-](\d{1,2})[/\-](\d{4}|\d{2})\b"
    ).unwrap();

    pub static ref DATE_YMD: Regex = Regex::new(
        r"\b(\d{4})[/\-](\d{1,2})[/\-](\d{1,2})\b"
    ).unwrap();

    pub static ref DATE_MONTH_NAME: Regex = Regex::new(
        r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(\d{1,2}),?\s+(\d{4}|\d{2})\b"
    ).unwrap();

    // Merchant header lines
    pub static ref ALL_CAPS_LINE: Regex = Regex::new(
        r"^[A-Z][A-Z\s&]+$"
    ).unwrap();

    // Line items
    pub static ref ITEM_TRAILING_DOLLAR: Regex =
        Regex::new(&format!(r"^(.+?)\s*\${NUMBER}\s*$")).unwrap();

    pub static ref ITEM_DOLLAR_ANYWHERE: Regex =
        Regex::new(&format!(r"^(.*?)\$\s*{NUMBER}")).unwrap();

    pub static ref ITEM_TRAILING_NUMBER: Regex =
        Regex::new(&format!(r"^(.+?)\s+{NUMBER}\s*$")).unwrap();
}
