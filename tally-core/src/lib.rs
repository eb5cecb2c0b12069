//! tally-core: canonical transaction and statement types shared by
//! the extraction and categorization pipelines.

pub mod metadata;
pub mod transaction;

pub use metadata::{StatementMetadata, StatementPeriod};
pub use transaction::{Category, SourceConfidence, Transaction};
