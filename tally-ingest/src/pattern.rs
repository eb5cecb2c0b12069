//! Deterministic regex/heuristic transaction-line extractor.
//!
//! Works on PDF-extracted statement text of the shape:
//!   Withdrawals and Debits
//!          06/12  TARGET T-9801 S - 966175                         50.93
//!          06/13  CVS/PHARMACY #06                                 50.00
//!   Deposits and Credits
//!          06/14  PAYROLL ACME INC                              2,500.00
//!
//! Amount sign is forced by the section an entry falls under, not by the
//! literal text. Always available, never calls out, and identical input
//! always yields the identical record sequence.

use anyhow::Result;
use chrono::NaiveDate;
use regex::Regex;

use tally_core::{StatementPeriod, Transaction};

use crate::amount::parse_amount;

/// Maximum wrapped description lines merged into one record.
const MAX_CONTINUATION_LINES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Debits,
    Credits,
}

pub struct PatternExtractor {
    period: Option<StatementPeriod>,
    fallback_year: i32,
    txn_re: Regex,
    date_lead_re: Regex,
    debit_header_re: Regex,
    credit_header_re: Regex,
    skip_re: Regex,
    summary_desc_re: Regex,
}

impl PatternExtractor {
    /// `fallback_year` applies to `MM/DD` dates when no statement period
    /// is known.
    pub fn new(period: Option<StatementPeriod>, fallback_year: i32) -> Result<Self> {
        // DATE DESCRIPTION ... AMOUNT (amount anchored at line end)
        let txn_re = Regex::new(concat!(
            r"^\s*(?P<month>\d{1,2})[/\-](?P<day>\d{1,2})(?:[/\-](?P<year>\d{2,4}))?\s+",
            r"(?P<desc>.+?)\s+",
            r"(?P<amt>\(?-?\s?\$?[\d,]+\.\d{2}\)?)\s*$"
        ))?;
        let date_lead_re = Regex::new(r"^\s*\d{1,2}[/\-]\d{1,2}")?;
        let debit_header_re =
            Regex::new(r"(?i)\b(withdrawals|debits|checks\s+paid|purchases)\b")?;
        let credit_header_re = Regex::new(r"(?i)\b(deposits|credits|additions)\b")?;
        // Boilerplate rows without a transaction shape. Checked only on
        // lines the transaction regex did not claim, so a merchant named
        // "TOTAL WINE" or "BALANCE FITNESS" still parses.
        let skip_re = Regex::new(concat!(
            r"(?i)\b(balance|statement\s+period|page\s+\d|account\s+number|",
            r"summary|total|beginning|ending|previous|available)\b"
        ))?;
        // Dated summary rows ("06/30  Ending balance  2,399.07") match the
        // transaction shape; reject them by their leading summary phrase.
        let summary_desc_re = Regex::new(concat!(
            r"(?i)^(beginning|ending|previous|available|daily)\s+balance\b",
            r"|^balance\s+(forward|brought|as\s+of|on)\b",
            r"|^total\s+(withdrawals|deposits|debits|credits|fees)\b"
        ))?;

        Ok(Self {
            period,
            fallback_year,
            txn_re,
            date_lead_re,
            debit_header_re,
            credit_header_re,
            skip_re,
            summary_desc_re,
        })
    }

    /// Extract every recognizable transaction line. An input with no
    /// transaction-like lines yields an empty vec, not an error.
    pub fn extract(&self, text: &str) -> Vec<Transaction> {
        let mut out: Vec<Transaction> = Vec::new();
        let mut section: Option<Section> = None;
        // Index into `out` of the record open for continuation lines.
        let mut open: Option<(usize, usize)> = None;

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                open = None;
                continue;
            }

            if let Some(caps) = self.txn_re.captures(trimmed) {
                if self.summary_desc_re.is_match(caps["desc"].trim()) {
                    open = None;
                    continue;
                }
                if let Some(txn) = self.build_record(&caps, section) {
                    out.push(txn);
                    open = Some((out.len() - 1, 0));
                } else {
                    open = None;
                }
                continue;
            }

            if self.skip_re.is_match(trimmed) {
                // Section headers often double as summary labels
                // ("Total withdrawals"), so track the section either way.
                self.track_section(trimmed, &mut section);
                open = None;
                continue;
            }

            if self.track_section(trimmed, &mut section) {
                open = None;
                continue;
            }

            // A line with no leading date continues the prior description.
            if !self.date_lead_re.is_match(trimmed) {
                if let Some((idx, used)) = open {
                    if used < MAX_CONTINUATION_LINES {
                        let desc = &mut out[idx].description;
                        desc.push(' ');
                        desc.push_str(&collapse_whitespace(trimmed));
                        open = Some((idx, used + 1));
                    }
                    continue;
                }
            }
            open = None;
        }

        out
    }

    /// Update the running section from a header line. Returns true when the
    /// line named a section.
    fn track_section(&self, line: &str, section: &mut Option<Section>) -> bool {
        if self.debit_header_re.is_match(line) {
            *section = Some(Section::Debits);
            true
        } else if self.credit_header_re.is_match(line) {
            *section = Some(Section::Credits);
            true
        } else {
            false
        }
    }

    fn build_record(&self, caps: &regex::Captures<'_>, section: Option<Section>) -> Option<Transaction> {
        let month: u32 = caps["month"].parse().ok()?;
        let day: u32 = caps["day"].parse().ok()?;
        let date = match caps.name("year") {
            Some(y) => {
                let mut year: i32 = y.as_str().parse().ok()?;
                if year < 100 {
                    year += 2000;
                }
                NaiveDate::from_ymd_opt(year, month, day)?
            }
            None => self.resolve_year(month, day)?,
        };

        let raw = parse_amount(&caps["amt"])?;
        if raw == 0.0 {
            return None;
        }
        let amount = match section {
            Some(Section::Debits) => -raw.abs(),
            Some(Section::Credits) => raw.abs(),
            None => raw,
        };

        let description = collapse_whitespace(caps["desc"].trim());
        if description.len() < 3 {
            return None;
        }

        Some(Transaction::new(date, amount, description))
    }

    fn resolve_year(&self, month: u32, day: u32) -> Option<NaiveDate> {
        match &self.period {
            Some(p) => p.resolve(month, day),
            None => NaiveDate::from_ymd_opt(self.fallback_year, month, day),
        }
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
