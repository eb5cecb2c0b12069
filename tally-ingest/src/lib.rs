//! tally-ingest: statement text/CSV ingestion.
//!
//! Two extraction strategies feed one orchestrator: a model-assisted
//! extractor for irregular layouts, and a deterministic regex extractor
//! that is always available and takes over when the model path fails.

pub mod amount;
pub mod csv_parser;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod pattern;

pub use csv_parser::parse_statement_csv;
pub use error::ExtractError;
pub use model::{ModelExtractor, ModelExtractorConfig};
pub use orchestrator::{Extraction, ExtractionPipeline};
pub use pattern::PatternExtractor;
