//! Extraction error taxonomy.

use thiserror::Error;

/// Failure of the model-assisted extraction path. Always recovered by the
/// orchestrator's pattern fallback, never surfaced to the pipeline caller.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The capability was unreachable, returned unparseable output after
    /// retry, or validated zero records from non-empty input.
    #[error("extraction capability unavailable: {0}")]
    Unavailable(String),
}
