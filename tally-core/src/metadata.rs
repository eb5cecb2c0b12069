//! Optional per-document statement metadata and the reporting period,
//! which carries the year-inference rule for dates printed as MM/DD.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Metadata extracted once per document. Every field is optional; a
/// statement with no recoverable metadata is still fully processable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatementMetadata {
    pub bank_name: Option<String>,
    /// Masked account identifier (e.g. "****1234").
    pub account_number: Option<String>,
    pub period: Option<StatementPeriod>,
    pub opening_balance: Option<f64>,
    pub closing_balance: Option<f64>,
}

/// The statement's reporting period.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StatementPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl StatementPeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Infer the year for a month/day printed without one.
    ///
    /// Picks the period year that places the date inside [start, end].
    /// For a period spanning December into January, months at or after the
    /// start month belong to the start year and the rest to the end year.
    pub fn infer_year(&self, month: u32) -> i32 {
        if self.start.year() == self.end.year() {
            return self.start.year();
        }
        if month >= self.start.month() {
            self.start.year()
        } else {
            self.end.year()
        }
    }

    /// Resolve a month/day into a full date using [`infer_year`]. Returns
    /// `None` when the day is out of range for that month.
    ///
    /// [`infer_year`]: StatementPeriod::infer_year
    pub fn resolve(&self, month: u32, day: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.infer_year(month), month, day)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}
