//! tally-classify: transaction categorization.
//!
//! Mirrors the extraction pipeline's hybrid shape at the record level:
//! a deterministic keyword categorizer runs first, the model-assisted
//! categorizer handles what it could not match, and a failed model call
//! degrades to `Other` instead of blocking the batch.

pub mod error;
pub mod model;
pub mod orchestrator;
pub mod rules;

pub use error::ClassifyError;
pub use model::ModelCategorizer;
pub use orchestrator::{category_stats, Categorizer, CategorizerConfig};
pub use rules::{RuleCategorizer, RuleSet};
