//! Categorization orchestrator.
//!
//! Per record: rule table first, model second, `Other` fallback last.
//! Records are independent, so the batch fans out across tasks and the
//! output is re-joined by original index, never by completion order.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use tally_core::{Category, SourceConfidence, Transaction};
use tally_llm::ChatModel;

use crate::model::ModelCategorizer;
use crate::rules::RuleCategorizer;

#[derive(Debug, Clone)]
pub struct CategorizerConfig {
    /// Cap on concurrent capability calls; rule-matched records are not
    /// throttled.
    pub max_in_flight: usize,
}

impl Default for CategorizerConfig {
    fn default() -> Self {
        Self { max_in_flight: 8 }
    }
}

struct Inner<M> {
    rules: RuleCategorizer,
    model: Option<ModelCategorizer<M>>,
    permits: Semaphore,
}

pub struct Categorizer<M> {
    inner: Arc<Inner<M>>,
}

impl<M> Clone for Categorizer<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ChatModel + 'static> Categorizer<M> {
    pub fn new(rules: RuleCategorizer, model: ModelCategorizer<M>, config: CategorizerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                rules,
                model: Some(model),
                permits: Semaphore::new(config.max_in_flight),
            }),
        }
    }

    /// A categorizer with no capability configured; unmatched records get
    /// the `Other` fallback directly.
    pub fn rules_only(rules: RuleCategorizer) -> Self {
        Self {
            inner: Arc::new(Inner {
                rules,
                model: None,
                permits: Semaphore::new(1),
            }),
        }
    }

    /// Categorize one record. The record's date/amount/description are
    /// never touched; only the category fields and source tag change.
    pub async fn categorize_one(&self, txn: Transaction) -> Transaction {
        categorize_record(&self.inner, txn).await
    }

    /// Categorize a batch. Always returns exactly one record per input
    /// record, in input order, regardless of per-record completion order.
    pub async fn categorize_batch(&self, records: Vec<Transaction>) -> Vec<Transaction> {
        let mut slots: Vec<Option<Transaction>> = records.iter().map(|_| None).collect();
        let mut set: JoinSet<(usize, Transaction)> = JoinSet::new();

        for (idx, txn) in records.iter().cloned().enumerate() {
            let inner = Arc::clone(&self.inner);
            set.spawn(async move { (idx, categorize_record(&inner, txn).await) });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, txn)) => slots[idx] = Some(txn),
                Err(e) => tracing::error!(error = %e, "categorization task failed"),
            }
        }

        // A task that died still owes the caller a record.
        records
            .into_iter()
            .zip(slots)
            .map(|(orig, slot)| slot.unwrap_or_else(|| other_fallback(orig)))
            .collect()
    }
}

async fn categorize_record<M: ChatModel>(inner: &Inner<M>, mut txn: Transaction) -> Transaction {
    if let Some((category, subcategory)) = inner.rules.categorize(&txn.description, txn.amount) {
        txn.category = Some(category);
        txn.subcategory = subcategory;
        txn.source = SourceConfidence::Rule;
        return txn;
    }

    let Some(model) = &inner.model else {
        return other_fallback(txn);
    };

    let Ok(_permit) = inner.permits.acquire().await else {
        return other_fallback(txn);
    };
    match model.categorize(&txn.description, txn.amount).await {
        Ok((category, subcategory)) => {
            txn.category = Some(category);
            txn.subcategory = subcategory;
            txn.source = SourceConfidence::Model;
            txn
        }
        Err(e) => {
            tracing::warn!(description = %txn.description, error = %e, "model categorization failed");
            other_fallback(txn)
        }
    }
}

fn other_fallback(mut txn: Transaction) -> Transaction {
    txn.category = Some(Category::Other);
    txn.subcategory = None;
    txn.source = SourceConfidence::Fallback;
    txn
}

/// Count records per category, `Uncategorized` for records that never went
/// through the orchestrator.
pub fn category_stats(records: &[Transaction]) -> BTreeMap<&'static str, usize> {
    let mut stats = BTreeMap::new();
    for r in records {
        let key = r.category.map(|c| c.as_str()).unwrap_or("Uncategorized");
        *stats.entry(key).or_insert(0) += 1;
    }
    stats
}
