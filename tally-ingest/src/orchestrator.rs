//! Extraction orchestrator.
//!
//! Drives `TryModel -> Validate -> (Accept | FallbackToPattern) -> Done`
//! and returns a tagged [`Extraction`] instead of signaling failure through
//! control flow. Extraction failure never reaches the caller as an error;
//! it is visible only as the `FellBack` tag plus a diagnostic reason.

use tally_core::{SourceConfidence, StatementMetadata, Transaction};
use tally_llm::ChatModel;

use crate::error::ExtractError;
use crate::model::ModelExtractor;
use crate::pattern::PatternExtractor;

/// Outcome of one extraction run.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// The model-assisted path produced the records.
    Accepted { records: Vec<Transaction> },
    /// The deterministic pattern path produced the records, with the
    /// reason the model path was abandoned.
    FellBack {
        records: Vec<Transaction>,
        reason: String,
    },
    /// Neither path found transaction content. A valid outcome, not an
    /// error: an empty statement is still a statement.
    Empty { reason: String },
}

impl Extraction {
    pub fn records(&self) -> &[Transaction] {
        match self {
            Extraction::Accepted { records } | Extraction::FellBack { records, .. } => records,
            Extraction::Empty { .. } => &[],
        }
    }

    pub fn into_records(self) -> Vec<Transaction> {
        match self {
            Extraction::Accepted { records } | Extraction::FellBack { records, .. } => records,
            Extraction::Empty { .. } => Vec::new(),
        }
    }

    pub fn fell_back(&self) -> bool {
        matches!(self, Extraction::FellBack { .. })
    }
}

enum Step {
    TryModel,
    Validate(Result<Vec<Transaction>, ExtractError>),
    Accept(Vec<Transaction>),
    FallbackToPattern(String),
}

pub struct ExtractionPipeline<M> {
    model: Option<ModelExtractor<M>>,
    pattern: PatternExtractor,
}

impl<M: ChatModel> ExtractionPipeline<M> {
    pub fn new(model: ModelExtractor<M>, pattern: PatternExtractor) -> Self {
        Self {
            model: Some(model),
            pattern,
        }
    }

    /// A pipeline with no capability configured; every run takes the
    /// pattern path directly.
    pub fn pattern_only(pattern: PatternExtractor) -> Self {
        Self {
            model: None,
            pattern,
        }
    }

    /// Run the full extraction state machine over raw statement text.
    pub async fn extract(&self, text: &str) -> Extraction {
        if text.trim().is_empty() {
            return Extraction::Empty {
                reason: "input contained no text".to_string(),
            };
        }

        let mut step = match &self.model {
            Some(_) => Step::TryModel,
            None => Step::FallbackToPattern("no extraction capability configured".to_string()),
        };

        loop {
            step = match step {
                Step::TryModel => {
                    match &self.model {
                        Some(model) => Step::Validate(model.extract(text).await),
                        None => Step::FallbackToPattern(
                            "no extraction capability configured".to_string(),
                        ),
                    }
                }
                Step::Validate(result) => match result {
                    Ok(records) if !records.is_empty() => Step::Accept(records),
                    Ok(_) => {
                        Step::FallbackToPattern("model returned zero records".to_string())
                    }
                    Err(e) => Step::FallbackToPattern(e.to_string()),
                },
                Step::Accept(records) => {
                    return Extraction::Accepted {
                        records: finalize(records, SourceConfidence::Model),
                    };
                }
                Step::FallbackToPattern(reason) => {
                    tracing::warn!(%reason, "model extraction abandoned, using pattern extractor");
                    let records = self.pattern.extract(text);
                    if records.is_empty() {
                        return Extraction::Empty {
                            reason: format!("no transaction content found ({reason})"),
                        };
                    }
                    return Extraction::FellBack {
                        records: finalize(records, SourceConfidence::Pattern),
                        reason,
                    };
                }
            };
        }
    }

    /// Per-document metadata, model path only. Failure (or a pattern-only
    /// pipeline) yields the empty default and never blocks extraction.
    pub async fn metadata(&self, text: &str) -> StatementMetadata {
        match &self.model {
            Some(model) => model.extract_metadata(text).await,
            None => StatementMetadata::default(),
        }
    }
}

/// Tag provenance and apply the output ordering contract: sorted by date
/// ascending, document order preserved within a date (stable sort).
fn finalize(mut records: Vec<Transaction>, source: SourceConfidence) -> Vec<Transaction> {
    for r in &mut records {
        r.source = source;
    }
    records.sort_by_key(|r| r.date);
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelExtractorConfig;
    use chrono::NaiveDate;
    use std::time::Duration;
    use tally_core::StatementPeriod;
    use tally_llm::LlmError;

    struct FixedModel(Result<String, ()>);

    impl ChatModel for FixedModel {
        fn complete(
            &self,
            _system: String,
            _user: String,
        ) -> impl std::future::Future<Output = Result<String, LlmError>> + Send {
            let reply = self.0.clone();
            async move { reply.map_err(|_| LlmError::Empty) }
        }
    }

    fn period() -> StatementPeriod {
        StatementPeriod::new(
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
        )
    }

    fn pattern() -> PatternExtractor {
        PatternExtractor::new(Some(period()), 2025).unwrap()
    }

    fn config() -> ModelExtractorConfig {
        ModelExtractorConfig {
            retry_backoff: Duration::from_millis(1),
            period: Some(period()),
            ..ModelExtractorConfig::default()
        }
    }

    const TEXT: &str = "Withdrawals and Debits\n06/13  CVS/PHARMACY #06  50.00\n06/12  TARGET T-9801  50.93\n";

    #[tokio::test]
    async fn test_accepts_model_records_sorted_and_tagged() {
        let reply = r#"[
            {"date": "2025-06-13", "amount": -50.00, "description": "CVS/PHARMACY #06"},
            {"date": "2025-06-12", "amount": -50.93, "description": "TARGET T-9801"}
        ]"#;
        let pipeline = ExtractionPipeline::new(
            ModelExtractor::new(FixedModel(Ok(reply.to_string())), config()),
            pattern(),
        );

        let out = pipeline.extract(TEXT).await;
        let records = out.records();
        assert!(matches!(out, Extraction::Accepted { .. }));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].description, "TARGET T-9801");
        assert!(records.iter().all(|r| r.source == SourceConfidence::Model));
    }

    #[tokio::test]
    async fn test_model_failure_falls_back_with_reason() {
        let pipeline = ExtractionPipeline::new(
            ModelExtractor::new(FixedModel(Err(())), config()),
            pattern(),
        );

        let out = pipeline.extract(TEXT).await;
        match &out {
            Extraction::FellBack { records, reason } => {
                assert_eq!(records.len(), 2);
                assert!(records.iter().all(|r| r.source == SourceConfidence::Pattern));
                assert!(reason.contains("unavailable"), "reason: {reason}");
            }
            other => panic!("expected FellBack, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fallback_matches_direct_pattern_call() {
        let pipeline = ExtractionPipeline::new(
            ModelExtractor::new(FixedModel(Err(())), config()),
            pattern(),
        );

        let direct = finalize(pattern().extract(TEXT), SourceConfidence::Pattern);
        let via_pipeline = pipeline.extract(TEXT).await.into_records();
        assert_eq!(via_pipeline, direct);
    }

    #[tokio::test]
    async fn test_empty_input_reports_empty_without_model_call() {
        let pipeline = ExtractionPipeline::new(
            ModelExtractor::new(FixedModel(Ok("[]".to_string())), config()),
            pattern(),
        );
        let out = pipeline.extract("   \n\n").await;
        assert!(matches!(out, Extraction::Empty { .. }));
        assert!(out.records().is_empty());
    }

    #[tokio::test]
    async fn test_no_content_anywhere_reports_empty() {
        let pipeline = ExtractionPipeline::new(
            ModelExtractor::new(FixedModel(Err(())), config()),
            pattern(),
        );
        let out = pipeline.extract("Thank you for banking with us.\n").await;
        assert!(matches!(out, Extraction::Empty { .. }));
    }

    #[tokio::test]
    async fn test_pattern_only_pipeline() {
        let pipeline: ExtractionPipeline<FixedModel> =
            ExtractionPipeline::pattern_only(pattern());
        let out = pipeline.extract(TEXT).await;
        assert!(out.fell_back());
        assert_eq!(out.records().len(), 2);
    }

    #[tokio::test]
    async fn test_stable_sort_preserves_document_order_within_date() {
        let reply = r#"[
            {"date": "2025-06-12", "amount": -1.00, "description": "FIRST"},
            {"date": "2025-06-12", "amount": -2.00, "description": "SECOND"},
            {"date": "2025-06-11", "amount": -3.00, "description": "EARLIER"}
        ]"#;
        let pipeline = ExtractionPipeline::new(
            ModelExtractor::new(FixedModel(Ok(reply.to_string())), config()),
            pattern(),
        );
        let records = pipeline.extract(TEXT).await.into_records();
        let descs: Vec<_> = records.iter().map(|r| r.description.as_str()).collect();
        assert_eq!(descs, ["EARLIER", "FIRST", "SECOND"]);
    }
}
