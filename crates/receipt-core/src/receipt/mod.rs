//! Receipt field extraction from raw text.

mod parser;
pub mod rules;

pub use parser::ReceiptParser;
