//! Categorization error taxonomy.

use thiserror::Error;

/// Failure of the model-assisted categorization path for one record.
/// Always recovered by the orchestrator assigning `Other`; never blocks
/// the rest of the batch.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// The capability was unreachable or answered with a category outside
    /// the closed enumeration.
    #[error("classification capability unavailable: {0}")]
    Unavailable(String),
}
