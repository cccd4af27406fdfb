//! Total amount extraction.
//!
//! Candidates are collected from a ranked table of labelled patterns and from
//! every bare dollar figure, then ranked by one total ordering.

use std::cmp::Ordering;

use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::trace;

use super::patterns::{
    AMOUNT_DUE, AMOUNT_LABEL, BALANCE, CHARGE, DOLLAR_AMOUNT, FINAL_AMOUNT, GRAND_TOTAL,
    TOTAL_EXACT, TOTAL_GENERIC,
};
use super::{context_window, line_window, mentions_total, FieldExtractor};

/// Bytes around a labelled match searched for "subtotal".
const LABEL_SUBTOTAL_RADIUS: usize = 10;

/// Bytes around a bare dollar figure searched for context words.
const DOLLAR_CONTEXT_RADIUS: usize = 30;

/// One row of the ranked pattern table.
pub struct AmountRule {
    /// Short rule name, used in logs.
    pub name: &'static str,
    /// Pattern whose first group is the amount.
    pub pattern: &'static Regex,
}

lazy_static! {
    /// Labelled total patterns; the index is the candidate priority.
    pub static ref AMOUNT_RULES: Vec<AmountRule> = vec![
        AmountRule { name: "total_exact", pattern: &TOTAL_EXACT },
        AmountRule { name: "total", pattern: &TOTAL_GENERIC },
        AmountRule { name: "grand_total", pattern: &GRAND_TOTAL },
        AmountRule { name: "final", pattern: &FINAL_AMOUNT },
        AmountRule { name: "amount", pattern: &AMOUNT_LABEL },
        AmountRule { name: "balance", pattern: &BALANCE },
        AmountRule { name: "due", pattern: &AMOUNT_DUE },
        AmountRule { name: "charge", pattern: &CHARGE },
    ];
}

/// A provisional total considered during disambiguation.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateAmount {
    /// Parsed amount.
    pub amount: Decimal,
    /// Matched text.
    pub context_text: String,
    /// Rank of the rule that produced it; lower wins.
    pub priority: usize,
    /// The context explicitly labels this as the total.
    pub is_explicit_total: bool,
}

impl CandidateAmount {
    /// Ranking: priority ascending, explicit totals first, larger amounts first.
    pub fn rank(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.is_explicit_total.cmp(&self.is_explicit_total))
            .then_with(|| other.amount.cmp(&self.amount))
    }
}

/// Total amount extractor.
pub struct AmountExtractor {
    max_amount: Decimal,
}

impl AmountExtractor {
    pub fn new() -> Self {
        Self {
            max_amount: Decimal::from(10_000),
        }
    }

    /// Set the exclusive upper bound for accepted amounts.
    pub fn with_max_amount(mut self, max_amount: Decimal) -> Self {
        self.max_amount = max_amount;
        self
    }
}

impl Default for AmountExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldExtractor for AmountExtractor {
    type Output = CandidateAmount;

    /// The selected total, as the candidate it came from.
    fn extract(&self, text: &str) -> Option<Self::Output> {
        select_total(&collect_candidates(text, self.max_amount))
    }

    fn extract_all(&self, text: &str) -> Vec<Self::Output> {
        collect_candidates(text, self.max_amount)
    }
}

/// Collect every total candidate in `text`, labelled rules first.
pub fn collect_candidates(text: &str, max_amount: Decimal) -> Vec<CandidateAmount> {
    let accept = |amount: &Decimal| *amount > Decimal::ZERO && *amount < max_amount;

    let labelled = AMOUNT_RULES.iter().enumerate().flat_map(|(priority, rule)| {
        rule.pattern.captures_iter(text).filter_map(move |caps| {
            let full = caps.get(0)?;
            let window = line_window(
                text,
                full.start(),
                full.end(),
                LABEL_SUBTOTAL_RADIUS,
                LABEL_SUBTOTAL_RADIUS,
            )
            .to_lowercase();
            if window.contains("subtotal") {
                trace!("Skipping subtotal match for rule {}: {:?}", rule.name, full.as_str());
                return None;
            }

            let amount = parse_amount(&caps[1])?;
            let context = full.as_str().to_lowercase();
            let is_explicit_total = mentions_total(&context)
                || context.contains("grand total")
                || context.contains("final");

            Some(CandidateAmount {
                amount,
                context_text: full.as_str().to_string(),
                priority,
                is_explicit_total,
            })
        })
    });

    let bare_priority = AMOUNT_RULES.len();
    let bare = DOLLAR_AMOUNT.captures_iter(text).filter_map(|caps| {
        let full = caps.get(0)?;
        let nearby = line_window(
            text,
            full.start(),
            full.end(),
            DOLLAR_CONTEXT_RADIUS,
            DOLLAR_CONTEXT_RADIUS,
        )
        .to_lowercase();
        if nearby.contains("subtotal") {
            trace!("Skipping subtotal dollar amount: {:?}", full.as_str());
            return None;
        }

        let amount = parse_amount(&caps[1])?;
        let context = context_window(
            text,
            full.start(),
            full.end(),
            DOLLAR_CONTEXT_RADIUS,
            DOLLAR_CONTEXT_RADIUS,
        )
        .to_lowercase();
        let is_explicit_total =
            mentions_total(&context) || context.contains("due") || context.contains("charge");

        Some(CandidateAmount {
            amount,
            context_text: full.as_str().to_string(),
            priority: bare_priority,
            is_explicit_total,
        })
    });

    labelled
        .chain(bare)
        .filter(|candidate| accept(&candidate.amount))
        .collect()
}

/// Pick the total from ranked candidates.
///
/// The best-ranked explicit total wins; without one, the largest amount is
/// taken since a receipt's total is usually its biggest figure.
pub fn select_total(candidates: &[CandidateAmount]) -> Option<CandidateAmount> {
    let mut ranked = candidates.to_vec();
    ranked.sort_by(CandidateAmount::rank);

    if let Some(explicit) = ranked.iter().find(|c| c.is_explicit_total) {
        return Some(explicit.clone());
    }

    // First of the largest keeps the ranking stable among equal amounts
    let max = ranked.iter().map(|c| c.amount).max()?;
    ranked.into_iter().find(|c| c.amount == max)
}

/// Parse a dollar figure such as `1,234.56`.
pub fn parse_amount(s: &str) -> Option<Decimal> {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    Decimal::from_str(&cleaned).ok()
}
