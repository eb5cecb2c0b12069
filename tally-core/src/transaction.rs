//! The normalized transaction record produced by the extraction pipeline
//! and enriched by the categorization pipeline.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A single normalized statement transaction.
///
/// `date`, `amount` and `description` are fixed at extraction time; the
/// category fields are filled in later by the categorizer and are the only
/// parts that ever change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub date: NaiveDate,
    /// Negative = debit/outflow, positive = credit/inflow. Never zero.
    pub amount: f64,
    pub description: String,
    pub category: Option<Category>,
    pub subcategory: Option<String>,
    /// Which strategy produced this record's values.
    pub source: SourceConfidence,
}

impl Transaction {
    pub fn new(date: NaiveDate, amount: f64, description: impl Into<String>) -> Self {
        Self {
            date,
            amount,
            description: description.into(),
            category: None,
            subcategory: None,
            source: SourceConfidence::Pattern,
        }
    }

    /// Returns true if this is an outflow (negative amount)
    pub fn is_debit(&self) -> bool {
        self.amount < 0.0
    }

    /// Returns true if this is an inflow (positive amount)
    pub fn is_credit(&self) -> bool {
        self.amount > 0.0
    }
}

/// Which extraction/categorization strategy produced a value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SourceConfidence {
    /// The model-assisted path.
    #[serde(rename = "model")]
    Model,
    /// The deterministic pattern extractor.
    #[serde(rename = "pattern")]
    Pattern,
    /// The deterministic rule categorizer.
    #[serde(rename = "rule")]
    Rule,
    /// The `Other` catch-all assigned after the model path failed.
    #[serde(rename = "fallback")]
    Fallback,
}

/// Closed set of transaction categories plus the `Other` catch-all.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Category {
    #[serde(rename = "entertainment")]
    Entertainment,
    #[serde(rename = "groceries")]
    Groceries,
    #[serde(rename = "transportation")]
    Transportation,
    #[serde(rename = "income")]
    Income,
    #[serde(rename = "housing")]
    Housing,
    #[serde(rename = "subscriptions")]
    Subscriptions,
    #[serde(rename = "dining")]
    Dining,
    #[serde(rename = "utilities")]
    Utilities,
    #[serde(rename = "healthcare")]
    Healthcare,
    #[serde(rename = "shopping")]
    Shopping,
    #[serde(rename = "other")]
    Other,
}

impl Category {
    /// Every category, in rule-priority order (Income first).
    pub const ALL: [Category; 11] = [
        Category::Income,
        Category::Entertainment,
        Category::Groceries,
        Category::Transportation,
        Category::Housing,
        Category::Subscriptions,
        Category::Dining,
        Category::Utilities,
        Category::Healthcare,
        Category::Shopping,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Entertainment => "Entertainment",
            Category::Groceries => "Groceries",
            Category::Transportation => "Transportation",
            Category::Income => "Income",
            Category::Housing => "Housing",
            Category::Subscriptions => "Subscriptions",
            Category::Dining => "Dining",
            Category::Utilities => "Utilities",
            Category::Healthcare => "Healthcare",
            Category::Shopping => "Shopping",
            Category::Other => "Other",
        }
    }

    /// Case-insensitive parse against the closed set. Returns `None` for
    /// anything outside the enumeration.
    pub fn parse(s: &str) -> Option<Category> {
        let s = s.trim();
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
    }
}
