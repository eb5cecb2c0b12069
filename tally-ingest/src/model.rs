//! Model-assisted transaction extraction.
//!
//! Sends statement text to the external structured-extraction capability
//! with a fixed schema instruction and parses the reply into canonical
//! records. Oversized documents are chunked on line boundaries, preferring
//! blank-line breaks, so a transaction line is never split. Each chunk gets
//! one retry; a chunk that fails twice contributes zero records.

use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;

use tally_core::{StatementMetadata, StatementPeriod, Transaction};
use tally_llm::ChatModel;

use crate::amount::parse_amount;
use crate::error::ExtractError;

const EXTRACTION_SYSTEM: &str = "You are a financial document parser. \
You convert raw bank-statement text into a machine-readable transaction list.";

const METADATA_SYSTEM: &str = "You are a financial document parser. \
You extract account-level metadata from bank-statement text.";

#[derive(Debug, Clone)]
pub struct ModelExtractorConfig {
    /// Chunk size budget in characters.
    pub max_chunk_chars: usize,
    /// Backoff before the single per-chunk retry.
    pub retry_backoff: Duration,
    /// Statement period used to resolve `MM/DD` candidate dates.
    pub period: Option<StatementPeriod>,
    /// Year for `MM/DD` candidates when no period is known.
    pub fallback_year: i32,
}

impl Default for ModelExtractorConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 24_000,
            retry_backoff: Duration::from_millis(500),
            period: None,
            fallback_year: 2025,
        }
    }
}

pub struct ModelExtractor<M> {
    model: M,
    config: ModelExtractorConfig,
}

/// One raw candidate from the capability. `amount` arrives as a JSON
/// number or a string like `"-50.93"` or `"$50.93"`.
#[derive(Debug, Deserialize)]
struct Candidate {
    date: Option<String>,
    amount: Option<serde_json::Value>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    bank_name: Option<String>,
    account_number: Option<String>,
    statement_period_start: Option<String>,
    statement_period_end: Option<String>,
    beginning_balance: Option<f64>,
    ending_balance: Option<f64>,
}

impl<M: ChatModel> ModelExtractor<M> {
    pub fn new(model: M, config: ModelExtractorConfig) -> Self {
        Self { model, config }
    }

    /// Extract transactions from statement text.
    ///
    /// Errors with [`ExtractError::Unavailable`] when every chunk failed or
    /// when non-empty input validated to zero records; the orchestrator
    /// recovers by falling back to the pattern extractor.
    pub async fn extract(&self, text: &str) -> Result<Vec<Transaction>, ExtractError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let chunks = chunk_text(text, self.config.max_chunk_chars);
        let total_chunks = chunks.len();
        let mut records = Vec::new();
        let mut failed_chunks = 0usize;
        let mut last_error = String::new();

        // Chunks are awaited in document order so concatenation preserves
        // the original sequence regardless of per-call latency.
        for (i, chunk) in chunks.iter().enumerate() {
            match self.extract_chunk(chunk, i).await {
                Ok(candidates) => records.extend(self.validate_candidates(candidates)),
                Err(reason) => {
                    tracing::warn!(chunk = i, %reason, "chunk failed after retry, dropping it");
                    failed_chunks += 1;
                    last_error = reason;
                }
            }
        }

        if failed_chunks == total_chunks {
            return Err(ExtractError::Unavailable(format!(
                "all {total_chunks} chunk(s) failed: {last_error}"
            )));
        }
        if records.is_empty() {
            return Err(ExtractError::Unavailable(
                "capability validated zero records from non-empty input".to_string(),
            ));
        }
        Ok(records)
    }

    /// One chunk, at most two attempts. A transport failure and an
    /// unparseable reply are retried alike; the second miss drops the
    /// chunk rather than aborting the document.
    async fn extract_chunk(&self, chunk: &str, index: usize) -> Result<Vec<Candidate>, String> {
        let prompt = extraction_prompt(chunk);
        let mut reason = String::new();

        for attempt in 0..2u8 {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_backoff).await;
            }
            match self
                .model
                .complete(EXTRACTION_SYSTEM.to_string(), prompt.clone())
                .await
            {
                Ok(body) => match parse_candidates(&body) {
                    Some(candidates) => return Ok(candidates),
                    None => {
                        tracing::debug!(chunk = index, attempt, "unparseable extraction reply");
                        reason = "unparseable reply".to_string();
                    }
                },
                Err(e) => {
                    tracing::debug!(chunk = index, attempt, error = %e, "extraction call failed");
                    reason = e.to_string();
                }
            }
        }
        Err(reason)
    }

    /// Best-effort statement metadata. Never blocks transaction extraction:
    /// any failure yields the empty default.
    pub async fn extract_metadata(&self, text: &str) -> StatementMetadata {
        if text.trim().is_empty() {
            return StatementMetadata::default();
        }

        let head: String = text.chars().take(self.config.max_chunk_chars).collect();
        let reply = self
            .model
            .complete(METADATA_SYSTEM.to_string(), metadata_prompt(&head))
            .await;

        let body = match reply {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!(error = %e, "metadata extraction failed");
                return StatementMetadata::default();
            }
        };

        let Some(raw) = parse_json_object::<RawMetadata>(&body) else {
            tracing::debug!("unparseable metadata reply");
            return StatementMetadata::default();
        };

        let period = match (
            raw.statement_period_start.as_deref().and_then(parse_iso_date),
            raw.statement_period_end.as_deref().and_then(parse_iso_date),
        ) {
            (Some(start), Some(end)) if start <= end => Some(StatementPeriod::new(start, end)),
            _ => None,
        };

        StatementMetadata {
            bank_name: raw.bank_name.filter(|s| !s.trim().is_empty()),
            account_number: raw.account_number.map(|s| mask_account(&s)),
            period,
            opening_balance: raw.beginning_balance,
            closing_balance: raw.ending_balance,
        }
    }

    /// Promote candidates that satisfy the canonical schema; drop the rest.
    /// A malformed candidate never aborts the surviving ones.
    fn validate_candidates(&self, candidates: Vec<Candidate>) -> Vec<Transaction> {
        let mut out = Vec::with_capacity(candidates.len());
        for c in candidates {
            let Some(date) = c.date.as_deref().and_then(|d| self.parse_candidate_date(d)) else {
                tracing::debug!(date = ?c.date, "candidate rejected: bad date");
                continue;
            };
            let Some(amount) = c.amount.as_ref().and_then(candidate_amount) else {
                tracing::debug!(amount = ?c.amount, "candidate rejected: bad amount");
                continue;
            };
            if amount == 0.0 {
                continue;
            }
            let description = c
                .description
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .to_string();
            if description.is_empty() {
                tracing::debug!("candidate rejected: empty description");
                continue;
            }
            out.push(Transaction::new(date, amount, description));
        }
        out
    }

    fn parse_candidate_date(&self, s: &str) -> Option<NaiveDate> {
        let s = s.trim();
        if let Some(d) = parse_iso_date(s) {
            return Some(d);
        }
        for fmt in ["%m/%d/%Y", "%m/%d/%y", "%m-%d-%Y"] {
            if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
                return Some(d);
            }
        }
        // MM/DD with the year inferred from the statement period.
        let mut it = s.split(['/', '-']);
        let month: u32 = it.next()?.parse().ok()?;
        let day: u32 = it.next()?.parse().ok()?;
        if it.next().is_some() {
            return None;
        }
        match &self.config.period {
            Some(p) => p.resolve(month, day),
            None => NaiveDate::from_ymd_opt(self.config.fallback_year, month, day),
        }
    }
}

fn parse_iso_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

fn candidate_amount(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => parse_amount(s),
        _ => None,
    }
}

/// Mask an account identifier down to its last four characters.
fn mask_account(s: &str) -> String {
    let tail: Vec<char> = s.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    if tail.len() <= 4 {
        return format!("****{}", tail.iter().collect::<String>());
    }
    format!("****{}", tail[tail.len() - 4..].iter().collect::<String>())
}

fn extraction_prompt(chunk: &str) -> String {
    format!(
        r#"Extract every transaction from this bank statement text.

Rules:
1. Transaction sections are usually labeled "Withdrawals/Debits", "Deposits/Credits", or "Transactions".
2. For each transaction report date (YYYY-MM-DD where the year is printed; otherwise MM/DD), amount (decimal, negative for debits/withdrawals, positive for credits/deposits), and description (merchant name and location, verbatim).
3. Ignore headers, account summaries, balances, and totals.

Bank statement text:
{chunk}

Return ONLY a JSON array in this exact shape, with no other text:
[
  {{"date": "2025-06-12", "amount": -50.93, "description": "TARGET T-9801 S - 966175 9801 Sam Furr Rd Huntersville NC"}},
  {{"date": "2025-06-13", "amount": -50.00, "description": "CVS/PHARMACY #06 - 127 SOUTH MAIN S DAVIDSON NC"}}
]"#
    )
}

fn metadata_prompt(text: &str) -> String {
    format!(
        r#"Extract account-level metadata from this bank statement text.

Bank statement text:
{text}

Return ONLY a JSON object in this exact shape, with null for anything missing:
{{
  "bank_name": "Bank Name",
  "account_number": "1234",
  "statement_period_start": "YYYY-MM-DD",
  "statement_period_end": "YYYY-MM-DD",
  "beginning_balance": 0.00,
  "ending_balance": 0.00
}}"#
    )
}

/// Recover a JSON array of candidates from a possibly chatty reply.
/// Tolerates code fences and surrounding prose.
fn parse_candidates(reply: &str) -> Option<Vec<Candidate>> {
    let body = strip_fences(reply);
    let start = body.find('[')?;
    let end = body.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&body[start..=end]).ok()
}

fn parse_json_object<T: serde::de::DeserializeOwned>(reply: &str) -> Option<T> {
    let body = strip_fences(reply);
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&body[start..=end]).ok()
}

fn strip_fences(reply: &str) -> &str {
    let s = reply.trim();
    let s = s.strip_prefix("```json").unwrap_or(s);
    let s = s.strip_prefix("```").unwrap_or(s);
    let s = s.strip_suffix("```").unwrap_or(s);
    s.trim()
}

/// Split text into chunks of at most `max_chars`, breaking only on line
/// boundaries and preferring blank-line (paragraph/section) boundaries.
pub(crate) fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    if text.len() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut block = String::new();

    let mut flush_block = |current: &mut String, block: &mut String, chunks: &mut Vec<String>| {
        if block.is_empty() {
            return;
        }
        if !current.is_empty() && current.len() + block.len() > max_chars {
            chunks.push(std::mem::take(current));
        }
        current.push_str(block);
        block.clear();
        // A single block larger than the budget becomes its own chunk
        // rather than being split mid-line.
        if current.len() > max_chars {
            chunks.push(std::mem::take(current));
        }
    };

    for line in text.lines() {
        if line.trim().is_empty() {
            block.push('\n');
            flush_block(&mut current, &mut block, &mut chunks);
            continue;
        }
        // No blank line in sight: flush on the plain line boundary before
        // the block would overflow the budget.
        if !block.is_empty() && block.len() + line.len() + 1 > max_chars {
            flush_block(&mut current, &mut block, &mut chunks);
        }
        block.push_str(line);
        block.push('\n');
    }
    flush_block(&mut current, &mut block, &mut chunks);
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tally_llm::LlmError;

    /// Scripted capability: replies in order, then repeats the last one.
    struct FakeModel {
        replies: Vec<Result<String, ()>>,
        calls: AtomicUsize,
    }

    impl FakeModel {
        fn new(replies: Vec<Result<String, ()>>) -> Self {
            Self {
                replies,
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ChatModel for FakeModel {
        fn complete(
            &self,
            _system: String,
            _user: String,
        ) -> impl std::future::Future<Output = Result<String, LlmError>> + Send {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self
                .replies
                .get(n.min(self.replies.len().saturating_sub(1)))
                .cloned()
                .unwrap_or(Err(()));
            async move { reply.map_err(|_| LlmError::Empty) }
        }
    }

    fn config() -> ModelExtractorConfig {
        ModelExtractorConfig {
            retry_backoff: Duration::from_millis(1),
            ..ModelExtractorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_valid_reply_parses_with_fence_and_prose() {
        let reply = "Here you go:\n```json\n[\n {\"date\": \"2025-06-12\", \"amount\": -50.93, \"description\": \"TARGET T-9801\"},\n {\"date\": \"06/13\", \"amount\": \"-50.00\", \"description\": \"CVS/PHARMACY\"}\n]\n```";
        let period = StatementPeriod::new(
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
        );
        let ex = ModelExtractor::new(
            FakeModel::new(vec![Ok(reply.to_string())]),
            ModelExtractorConfig {
                period: Some(period),
                ..config()
            },
        );

        let txns = ex.extract("06/12 stuff\n06/13 stuff\n").await.unwrap();
        assert_eq!(txns.len(), 2);
        assert_eq!(txns[0].amount, -50.93);
        assert_eq!(txns[1].date, NaiveDate::from_ymd_opt(2025, 6, 13).unwrap());
        assert_eq!(txns[1].amount, -50.00);
    }

    #[tokio::test]
    async fn test_invalid_candidates_dropped_order_preserved() {
        let reply = r#"[
            {"date": "2025-06-12", "amount": -50.93, "description": "TARGET"},
            {"date": "not a date", "amount": -1.00, "description": "BAD DATE"},
            {"date": "2025-06-13", "amount": "oops", "description": "BAD AMOUNT"},
            {"date": "2025-06-14", "amount": -3.00, "description": ""},
            {"date": "2025-06-15", "amount": 0.0, "description": "ZERO"},
            {"date": "2025-06-16", "amount": 2500.00, "description": "PAYROLL"}
        ]"#;
        let ex = ModelExtractor::new(FakeModel::new(vec![Ok(reply.to_string())]), config());

        let txns = ex.extract("some statement text").await.unwrap();
        assert_eq!(txns.len(), 2);
        assert_eq!(txns[0].description, "TARGET");
        assert_eq!(txns[1].description, "PAYROLL");
    }

    #[tokio::test]
    async fn test_retries_once_then_fails_unavailable() {
        let fake = FakeModel::new(vec![Err(()), Err(())]);
        let ex = ModelExtractor::new(fake, config());
        let err = ex.extract("06/12 TARGET 50.93").await.unwrap_err();
        assert!(matches!(err, ExtractError::Unavailable(_)));
        assert_eq!(ex.model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_failure() {
        let reply = r#"[{"date": "2025-06-12", "amount": -50.93, "description": "TARGET"}]"#;
        let fake = FakeModel::new(vec![Err(()), Ok(reply.to_string())]);
        let ex = ModelExtractor::new(fake, config());
        let txns = ex.extract("06/12 TARGET 50.93").await.unwrap();
        assert_eq!(txns.len(), 1);
        assert_eq!(ex.model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_unparseable_reply_retried_then_recovers() {
        let good = r#"[{"date": "2025-06-12", "amount": -50.93, "description": "TARGET"}]"#;
        let fake = FakeModel::new(vec![
            Ok("I could not find any transactions, sorry!".to_string()),
            Ok(good.to_string()),
        ]);
        let ex = ModelExtractor::new(fake, config());
        let txns = ex.extract("06/12 TARGET 50.93").await.unwrap();
        assert_eq!(txns.len(), 1);
        assert_eq!(ex.model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_zero_validated_records_is_unavailable() {
        let ex = ModelExtractor::new(FakeModel::new(vec![Ok("[]".to_string())]), config());
        let err = ex.extract("06/12 TARGET 50.93").await.unwrap_err();
        assert!(matches!(err, ExtractError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_empty_input_short_circuits() {
        let fake = FakeModel::new(vec![Ok("[]".to_string())]);
        let ex = ModelExtractor::new(fake, config());
        let txns = ex.extract("   \n  ").await.unwrap();
        assert!(txns.is_empty());
        assert_eq!(ex.model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_metadata_extraction_and_masking() {
        let reply = r#"{
            "bank_name": "First Example Bank",
            "account_number": "123456789",
            "statement_period_start": "2025-06-01",
            "statement_period_end": "2025-06-30",
            "beginning_balance": 1000.00,
            "ending_balance": 2399.07
        }"#;
        let ex = ModelExtractor::new(FakeModel::new(vec![Ok(reply.to_string())]), config());
        let meta = ex.extract_metadata("statement text").await;
        assert_eq!(meta.bank_name.as_deref(), Some("First Example Bank"));
        assert_eq!(meta.account_number.as_deref(), Some("****6789"));
        let p = meta.period.unwrap();
        assert_eq!(p.start, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
        assert_eq!(meta.closing_balance, Some(2399.07));
    }

    #[tokio::test]
    async fn test_metadata_failure_yields_default() {
        let ex = ModelExtractor::new(FakeModel::new(vec![Err(())]), config());
        assert_eq!(ex.extract_metadata("text").await, StatementMetadata::default());
    }

    #[test]
    fn test_chunking_respects_line_boundaries() {
        let mut text = String::new();
        for i in 0..200 {
            text.push_str(&format!("06/12  MERCHANT NUMBER {i:04}  10.00\n"));
            if i % 10 == 9 {
                text.push('\n');
            }
        }
        let chunks = chunk_text(&text, 1000);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            for line in chunk.lines().filter(|l| !l.trim().is_empty()) {
                assert!(line.starts_with("06/12"), "split mid-line: {line:?}");
            }
        }
        let rejoined: String = chunks.concat();
        assert_eq!(
            rejoined.split_whitespace().collect::<Vec<_>>(),
            text.split_whitespace().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_chunking_without_blank_lines_stays_under_budget() {
        let mut text = String::new();
        for i in 0..200 {
            text.push_str(&format!("06/12  MERCHANT NUMBER {i:04}  10.00\n"));
        }
        let chunks = chunk_text(&text, 1000);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 1000, "oversized chunk: {} chars", chunk.len());
            for line in chunk.lines() {
                assert!(line.starts_with("06/12"), "split mid-line: {line:?}");
            }
        }
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("one line\n", 1000);
        assert_eq!(chunks, vec!["one line\n".to_string()]);
    }
}
