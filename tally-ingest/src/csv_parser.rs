//! CSV statement ingestion.
//!
//! Expects a header row naming at least `date`, `amount`, and
//! `description` (any casing, any column order). Unparseable rows are
//! skipped rather than failing the file.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use std::path::Path;

use tally_core::Transaction;

use crate::amount::parse_amount;

/// Parse a CSV statement export, returning all valid transactions in
/// file order.
pub fn parse_statement_csv(path: impl AsRef<Path>) -> Result<Vec<Transaction>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(false)
        .from_path(path.as_ref())
        .with_context(|| format!("opening {}", path.as_ref().display()))?;

    let mut columns: Option<(usize, usize, usize)> = None;
    let mut txns = Vec::new();

    for result in rdr.records() {
        let record = result?;

        // Scan forward to the header row; some exports lead with blank
        // or preamble rows.
        let Some((date_col, amount_col, desc_col)) = columns else {
            columns = find_columns(&record);
            continue;
        };

        let date_str = record.get(date_col).unwrap_or("").trim();
        if date_str.is_empty() {
            continue;
        }
        let Some(date) = parse_csv_date(date_str) else {
            continue;
        };

        let Some(amount) = record.get(amount_col).and_then(parse_amount) else {
            continue;
        };
        if amount == 0.0 {
            continue;
        }

        let description = record.get(desc_col).unwrap_or("").trim().to_string();
        if description.is_empty() {
            continue;
        }

        txns.push(Transaction::new(date, amount, description));
    }

    if columns.is_none() {
        bail!(
            "{}: no header row with date/amount/description columns",
            path.as_ref().display()
        );
    }
    Ok(txns)
}

fn find_columns(record: &csv::StringRecord) -> Option<(usize, usize, usize)> {
    let position = |name: &str| {
        record
            .iter()
            .position(|field| field.trim().eq_ignore_ascii_case(name))
    };
    Some((position("date")?, position("amount")?, position("description")?))
}

fn parse_csv_date(s: &str) -> Option<NaiveDate> {
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y", "%m-%d-%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    None
}
